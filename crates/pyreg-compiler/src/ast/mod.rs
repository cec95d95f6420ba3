// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Input syntax tree.
//!
//! This is the tree handed over by the external front end, already checked
//! against the supported grammar. Nodes are tagged by kind (`"kind"` in the
//! JSON form) and carry the source line they start on.
//!
//! The tree is never mutated; the desugarer reads it and produces the
//! compiler's own IR.

mod build;

pub use build::*;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A whole module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    /// Top-level statements
    pub body: Vec<Stmt>,
}

/// A statement with its source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// Line the statement starts on
    #[serde(default)]
    pub line: u32,
    /// The statement itself
    #[serde(flatten)]
    pub kind: StmtKind,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StmtKind {
    /// `def name(args): body`
    FunctionDef {
        /// Function name
        name: String,
        /// Parameter list
        #[serde(default)]
        args: Arguments,
        /// Body statements
        body: Vec<Stmt>,
        /// Decorators, outermost first
        #[serde(default)]
        decorator_list: Vec<Expr>,
    },
    /// `class name(bases, keywords): body`
    ClassDef {
        /// Class name
        name: String,
        /// Base class expressions
        #[serde(default)]
        bases: Vec<Expr>,
        /// Keyword arguments such as `metaclass=`
        #[serde(default)]
        keywords: Vec<Keyword>,
        /// Body statements
        body: Vec<Stmt>,
        /// Decorators, outermost first
        #[serde(default)]
        decorator_list: Vec<Expr>,
    },
    /// `return [value]`
    Return {
        /// Returned value
        #[serde(default)]
        value: Option<Expr>,
    },
    /// `del targets`
    Delete {
        /// Deleted targets
        targets: Vec<Expr>,
    },
    /// `t1 = t2 = value`
    Assign {
        /// Targets, left to right
        targets: Vec<Expr>,
        /// Assigned value
        value: Expr,
    },
    /// `target op= value`
    AugAssign {
        /// Name, attribute or subscript
        target: Expr,
        /// Operator
        op: BinOperator,
        /// Right-hand side
        value: Expr,
    },
    /// `for target in iter: body else: orelse`
    For {
        /// Loop target
        target: Expr,
        /// Iterated expression
        iter: Expr,
        /// Loop body
        body: Vec<Stmt>,
        /// Runs when the loop is exhausted
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// `while test: body else: orelse`
    While {
        /// Loop condition
        test: Expr,
        /// Loop body
        body: Vec<Stmt>,
        /// Runs when the condition turns false
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// `if test: body else: orelse`
    If {
        /// Condition
        test: Expr,
        /// Taken branch
        body: Vec<Stmt>,
        /// Other branch
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// `with a as x, b: body`
    With {
        /// Context managers, outermost first
        items: Vec<WithItem>,
        /// Managed body
        body: Vec<Stmt>,
    },
    /// `raise [exc [from cause]]`
    Raise {
        /// Raised exception
        #[serde(default)]
        exc: Option<Expr>,
        /// Explicit cause
        #[serde(default)]
        cause: Option<Expr>,
    },
    /// `try: ... except: ... else: ... finally: ...`
    Try {
        /// Protected body
        body: Vec<Stmt>,
        /// Except clauses in order
        #[serde(default)]
        handlers: Vec<ExceptHandler>,
        /// Runs when the body raised nothing
        #[serde(default)]
        orelse: Vec<Stmt>,
        /// Runs on every exit
        #[serde(default)]
        finalbody: Vec<Stmt>,
    },
    /// `assert test, msg`
    Assert {
        /// Checked condition
        test: Expr,
        /// Message
        #[serde(default)]
        msg: Option<Expr>,
    },
    /// `import a.b as c, d`
    Import {
        /// Imported modules
        names: Vec<Alias>,
    },
    /// `from ..module import a as b`
    ImportFrom {
        /// Module, absent for `from . import x`
        #[serde(default)]
        module: Option<String>,
        /// Imported names
        names: Vec<Alias>,
        /// Number of leading dots
        #[serde(default)]
        level: u32,
    },
    /// `global a, b`
    Global {
        /// Declared names
        names: Vec<String>,
    },
    /// `nonlocal a, b`
    Nonlocal {
        /// Declared names
        names: Vec<String>,
    },
    /// Expression evaluated for its side effects
    Expr {
        /// The expression
        value: Expr,
    },
    /// `pass`
    Pass,
    /// `break`
    Break,
    /// `continue`
    Continue,
}

/// An expression with its source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Line the expression starts on
    #[serde(default)]
    pub line: u32,
    /// The expression itself
    #[serde(flatten)]
    pub kind: ExprKind,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExprKind {
    /// `a and b and c`
    BoolOp {
        /// `and` / `or`
        op: BoolOperator,
        /// Operands, at least two
        values: Vec<Expr>,
    },
    /// `target := value`
    NamedExpr {
        /// Bound name
        target: String,
        /// Bound value
        value: Box<Expr>,
    },
    /// `left op right`
    BinOp {
        /// Left operand
        left: Box<Expr>,
        /// Operator
        op: BinOperator,
        /// Right operand
        right: Box<Expr>,
    },
    /// `op operand`
    UnaryOp {
        /// Operator
        op: UnaryOperator,
        /// Operand
        operand: Box<Expr>,
    },
    /// `lambda args: body`
    Lambda {
        /// Parameter list
        #[serde(default)]
        args: Arguments,
        /// Returned expression
        body: Box<Expr>,
    },
    /// `body if test else orelse`
    IfExp {
        /// Condition
        test: Box<Expr>,
        /// Value when true
        body: Box<Expr>,
        /// Value when false
        orelse: Box<Expr>,
    },
    /// `{k: v, **m}`; a missing key marks `**` unpacking
    Dict {
        /// Keys, `None` for `**value`
        keys: Vec<Option<Expr>>,
        /// Values
        values: Vec<Expr>,
    },
    /// `{a, *b}`
    Set {
        /// Elements
        elts: Vec<Expr>,
    },
    /// `[a, *b]`
    List {
        /// Elements
        elts: Vec<Expr>,
    },
    /// `(a, *b)`
    Tuple {
        /// Elements
        elts: Vec<Expr>,
    },
    /// `[elt for ...]`
    ListComp {
        /// Produced element
        elt: Box<Expr>,
        /// `for`/`if` clauses
        generators: Vec<Comprehension>,
    },
    /// `{elt for ...}`
    SetComp {
        /// Produced element
        elt: Box<Expr>,
        /// `for`/`if` clauses
        generators: Vec<Comprehension>,
    },
    /// `{key: value for ...}`
    DictComp {
        /// Produced key
        key: Box<Expr>,
        /// Produced value
        value: Box<Expr>,
        /// `for`/`if` clauses
        generators: Vec<Comprehension>,
    },
    /// `(elt for ...)`
    GeneratorExp {
        /// Produced element
        elt: Box<Expr>,
        /// `for`/`if` clauses
        generators: Vec<Comprehension>,
    },
    /// `yield [value]`
    Yield {
        /// Yielded value
        #[serde(default)]
        value: Option<Box<Expr>>,
    },
    /// `yield from value`
    YieldFrom {
        /// Delegated iterable
        value: Box<Expr>,
    },
    /// `left op1 c1 op2 c2 ...`
    Compare {
        /// First operand
        left: Box<Expr>,
        /// Operators
        ops: Vec<CmpOperator>,
        /// Remaining operands
        comparators: Vec<Expr>,
    },
    /// `func(args, keywords)`
    Call {
        /// Callee
        func: Box<Expr>,
        /// Positional arguments, possibly starred
        #[serde(default)]
        args: Vec<Expr>,
        /// Keyword arguments, possibly `**`
        #[serde(default)]
        keywords: Vec<Keyword>,
    },
    /// Literal value
    Constant {
        /// The value
        value: Constant,
    },
    /// `value.attr`
    Attribute {
        /// Owner
        value: Box<Expr>,
        /// Attribute name
        attr: String,
    },
    /// `value[slice]`
    Subscript {
        /// Container
        value: Box<Expr>,
        /// Index or slice
        slice: Box<Expr>,
    },
    /// `*value`
    Starred {
        /// Unpacked value
        value: Box<Expr>,
    },
    /// Identifier
    Name {
        /// The identifier
        id: String,
    },
    /// `lower:upper:step`
    Slice {
        /// Start
        #[serde(default)]
        lower: Option<Box<Expr>>,
        /// Stop
        #[serde(default)]
        upper: Option<Box<Expr>>,
        /// Step
        #[serde(default)]
        step: Option<Box<Expr>>,
    },
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Constant {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Arbitrary precision integer, a decimal string in JSON
    Int(#[serde(with = "decimal")] BigInt),
    /// Float
    Float(f64),
    /// Complex number
    Complex {
        /// Real part
        re: f64,
        /// Imaginary part
        im: f64,
    },
    /// Text
    Str(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// `...`
    Ellipsis,
}

pub(crate) mod decimal {
    use num_bigint::BigInt;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| D::Error::custom(format!("invalid integer literal '{text}'")))
    }
}

/// Function parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Arguments {
    /// Positional-only parameters
    pub posonlyargs: Vec<String>,
    /// Regular parameters
    pub args: Vec<String>,
    /// `*args`
    pub vararg: Option<String>,
    /// Keyword-only parameters
    pub kwonlyargs: Vec<String>,
    /// One entry per keyword-only parameter, `None` when it has no default
    pub kw_defaults: Vec<Option<Expr>>,
    /// `**kwargs`
    pub kwarg: Option<String>,
    /// Defaults of the trailing positional parameters
    pub defaults: Vec<Expr>,
}

/// One `for ... in ... if ...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    /// Loop target
    pub target: Expr,
    /// Iterated expression
    pub iter: Expr,
    /// Filters
    #[serde(default)]
    pub ifs: Vec<Expr>,
}

/// Keyword argument; `arg` is absent for `**value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// Keyword name
    #[serde(default)]
    pub arg: Option<String>,
    /// Passed value
    pub value: Expr,
}

/// `name as asname` in imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Imported (possibly dotted) name
    pub name: String,
    /// Local binding
    #[serde(default)]
    pub asname: Option<String>,
}

/// One context manager of a `with` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    /// Context manager expression
    pub context_expr: Expr,
    /// `as` target
    #[serde(default)]
    pub optional_vars: Option<Expr>,
}

/// `except type as name: body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Line of the `except` keyword
    #[serde(default)]
    pub line: u32,
    /// Matched type, absent for a bare `except:`
    #[serde(default, rename = "type")]
    pub type_: Option<Expr>,
    /// Bound name
    #[serde(default)]
    pub name: Option<String>,
    /// Handler body
    pub body: Vec<Stmt>,
}

/// `and` / `or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOperator {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mult,
    /// `@`
    MatMult,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Pow,
    /// `<<`
    LShift,
    /// `>>`
    RShift,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,
    /// `//`
    FloorDiv,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    /// `~`
    Invert,
    /// `not`
    Not,
    /// unary `+`
    UAdd,
    /// unary `-`
    USub,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOperator {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `is`
    Is,
    /// `is not`
    IsNot,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

impl Module {
    /// Decodes a module from its JSON form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
