// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core IR consumed by the scope analyzer and the code generator.
//!
//! Compared to the input tree there are no asserts, lambdas, decorators,
//! comprehensions or multi-item `with` statements. Function and class
//! definitions are expressions, and three accumulator updates plus an
//! iterator binding exist for the lowered comprehensions.

pub use crate::ast::{Alias, BinOperator, BoolOperator, CmpOperator, Constant, UnaryOperator};

/// Identifies a function or class body; assigned in pre-order by the
/// desugarer, so the module is never one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// A desugared module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Top-level statements
    pub body: Vec<Stmt>,
    /// Module docstring
    pub docstring: Option<String>,
    /// Number of function/class bodies
    pub nscopes: u32,
}

/// Statement with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Source line
    pub line: u32,
    /// The statement
    pub kind: StmtKind,
}

/// Core statements.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `return [value]`
    Return(Option<Expr>),
    /// `del targets`
    Delete(Vec<Expr>),
    /// `t1 = t2 = value`
    Assign {
        /// Targets, left to right
        targets: Vec<Expr>,
        /// Value
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
        /// Body
        body: Vec<Stmt>,
        /// Exhaustion branch
        orelse: Vec<Stmt>,
    },
    /// `while test: body else: orelse`
    While {
        /// Condition
        test: Expr,
        /// Body
        body: Vec<Stmt>,
        /// Exhaustion branch
        orelse: Vec<Stmt>,
    },
    /// `if test: body else: orelse`
    If {
        /// Condition
        test: Expr,
        /// Taken branch
        body: Vec<Stmt>,
        /// Other branch
        orelse: Vec<Stmt>,
    },
    /// `with context as target: body`
    With {
        /// Context manager
        context: Expr,
        /// Optional binding target
        target: Option<Expr>,
        /// Managed body
        body: Vec<Stmt>,
    },
    /// `raise [exc [from cause]]`
    Raise {
        /// Raised exception
        exc: Option<Expr>,
        /// Explicit cause
        cause: Option<Expr>,
    },
    /// `try` with any combination of handlers, else and finally
    Try {
        /// Protected body
        body: Vec<Stmt>,
        /// Except clauses
        handlers: Vec<ExceptHandler>,
        /// No-exception branch
        orelse: Vec<Stmt>,
        /// Cleanup
        finalbody: Vec<Stmt>,
    },
    /// `import ...`
    Import(Vec<Alias>),
    /// `from module import ...`
    ImportFrom {
        /// Module name, empty for `from . import x`
        module: Option<String>,
        /// Imported names
        names: Vec<Alias>,
        /// Relative level
        level: u32,
    },
    /// `global names`
    Global(Vec<String>),
    /// `nonlocal names`
    Nonlocal(Vec<String>),
    /// Expression evaluated for effect
    Expr(Expr),
    /// `pass`
    Pass,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `list.append(value)` on a comprehension accumulator
    ListAppend {
        /// Accumulator local
        list: String,
        /// Appended value
        value: Expr,
    },
    /// `set.add(value)` on a comprehension accumulator
    SetAdd {
        /// Accumulator local
        set: String,
        /// Added value
        value: Expr,
    },
    /// `dict[key] = value` on a comprehension accumulator
    DictInsert {
        /// Accumulator local
        dict: String,
        /// Key
        key: Expr,
        /// Value
        value: Expr,
    },
}

/// `except type as name: body`
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Line of the clause
    pub line: u32,
    /// Matched type; `None` catches everything
    pub type_: Option<Expr>,
    /// Bound name
    pub name: Option<String>,
    /// Handler body
    pub body: Vec<Stmt>,
}

/// Expression with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Source line
    pub line: u32,
    /// The expression
    pub kind: ExprKind,
}

/// Core expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `a and b` / `a or b`
    BoolOp {
        /// Operator
        op: BoolOperator,
        /// Operands
        values: Vec<Expr>,
    },
    /// `target := value`
    NamedExpr {
        /// Bound name
        target: String,
        /// Value
        value: Box<Expr>,
    },
    /// Binary arithmetic
    BinOp {
        /// Left operand
        left: Box<Expr>,
        /// Operator
        op: BinOperator,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary arithmetic
    UnaryOp {
        /// Operator
        op: UnaryOperator,
        /// Operand
        operand: Box<Expr>,
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
    /// Dict display; `None` keys are `**` unpackings
    Dict {
        /// Keys
        keys: Vec<Option<Expr>>,
        /// Values
        values: Vec<Expr>,
    },
    /// Set display
    Set(Vec<Expr>),
    /// List display
    List(Vec<Expr>),
    /// Tuple display
    Tuple(Vec<Expr>),
    /// `yield [value]`
    Yield(Option<Box<Expr>>),
    /// `yield from value`
    YieldFrom(Box<Expr>),
    /// Comparison chain
    Compare {
        /// First operand
        left: Box<Expr>,
        /// Operators
        ops: Vec<CmpOperator>,
        /// Remaining operands
        comparators: Vec<Expr>,
    },
    /// Call
    Call {
        /// Callee
        func: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        keywords: Vec<Keyword>,
    },
    /// Literal
    Constant(Constant),
    /// `value.attr`
    Attribute {
        /// Owner
        value: Box<Expr>,
        /// Attribute
        attr: String,
    },
    /// `value[slice]`
    Subscript {
        /// Container
        value: Box<Expr>,
        /// Index
        slice: Box<Expr>,
    },
    /// `*value`
    Starred(Box<Expr>),
    /// Identifier
    Name(String),
    /// `lower:upper:step`
    Slice {
        /// Start
        lower: Option<Box<Expr>>,
        /// Stop
        upper: Option<Box<Expr>>,
        /// Step
        step: Option<Box<Expr>>,
    },
    /// Function object creation
    Function(Box<FunctionDef>),
    /// Class object creation
    Class(Box<ClassDef>),
    /// Iterator over the value, evaluated in the enclosing scope
    Iter(Box<Expr>),
}

/// Keyword argument; `arg` is `None` for `**value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Name
    pub arg: Option<String>,
    /// Value
    pub value: Expr,
}

/// Function parameters, defaults included.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    /// Positional-only
    pub posonly: Vec<String>,
    /// Regular
    pub args: Vec<String>,
    /// `*args`
    pub vararg: Option<String>,
    /// Keyword-only
    pub kwonly: Vec<String>,
    /// `**kwargs`
    pub kwarg: Option<String>,
    /// Defaults of the trailing positional parameters
    pub defaults: Vec<Expr>,
    /// One per keyword-only parameter
    pub kw_defaults: Vec<Option<Expr>>,
}

impl Parameters {
    /// Parameter names in frame order: positional-only, regular,
    /// keyword-only, `*args`, `**kwargs`.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.posonly
            .iter()
            .chain(&self.args)
            .chain(&self.kwonly)
            .chain(&self.vararg)
            .chain(&self.kwarg)
    }
}

/// A function body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Scope of the body
    pub id: ScopeId,
    /// Function name (`<lambda>`, `<listcomp>`, ...)
    pub name: String,
    /// Parameters
    pub params: Parameters,
    /// Body
    pub body: Vec<Stmt>,
    /// Docstring
    pub docstring: Option<String>,
    /// First line, decorators included
    pub line: u32,
    /// Synthesized from a comprehension or generator expression
    pub comprehension: bool,
}

/// A class body.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Scope of the body
    pub id: ScopeId,
    /// Class name
    pub name: String,
    /// Base expressions
    pub bases: Vec<Expr>,
    /// Class keywords
    pub keywords: Vec<Keyword>,
    /// Body
    pub body: Vec<Stmt>,
    /// Docstring
    pub docstring: Option<String>,
    /// First line, decorators included
    pub line: u32,
}

impl Expr {
    /// Creates an expression on `line`.
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Self { line, kind }
    }

    /// Name reference on `line`.
    pub fn name(id: &str, line: u32) -> Self {
        Self::new(ExprKind::Name(id.to_string()), line)
    }

    /// Whether this is a literal.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }
}

impl Stmt {
    /// Creates a statement on `line`.
    pub fn new(kind: StmtKind, line: u32) -> Self {
        Self { line, kind }
    }
}
