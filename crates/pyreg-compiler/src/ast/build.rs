// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shorthand constructors for building trees in code.
//!
//! Every constructor produces a node on line 0; chain `.at(line)` to place
//! it.
//!
//! ```
//! use pyreg_compiler::ast::*;
//!
//! // x = 1 + 2
//! let stmt = assign(name("x"), binop(int(1), BinOperator::Add, int(2))).at(1);
//! assert_eq!(stmt.line, 1);
//! ```

use num_bigint::BigInt;

use super::*;

impl Stmt {
    /// Moves the statement to `line`.
    pub fn at(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

impl Expr {
    /// Moves the expression to `line`.
    pub fn at(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

impl From<StmtKind> for Stmt {
    fn from(kind: StmtKind) -> Self {
        Stmt { line: 0, kind }
    }
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr { line: 0, kind }
    }
}

fn boxed(e: Expr) -> Box<Expr> {
    Box::new(e)
}

// ============================================================================
// Expressions
// ============================================================================

/// Identifier reference.
pub fn name(id: &str) -> Expr {
    ExprKind::Name { id: id.to_string() }.into()
}

/// Literal of any kind.
pub fn constant(value: Constant) -> Expr {
    ExprKind::Constant { value }.into()
}

/// Integer literal.
pub fn int(value: i64) -> Expr {
    constant(Constant::Int(BigInt::from(value)))
}

/// Float literal.
pub fn float(value: f64) -> Expr {
    constant(Constant::Float(value))
}

/// String literal.
pub fn string(value: &str) -> Expr {
    constant(Constant::Str(value.to_string()))
}

/// `None`.
pub fn none() -> Expr {
    constant(Constant::None)
}

/// `left op right`
pub fn binop(left: Expr, op: BinOperator, right: Expr) -> Expr {
    ExprKind::BinOp {
        left: boxed(left),
        op,
        right: boxed(right),
    }
    .into()
}

/// `op operand`
pub fn unary(op: UnaryOperator, operand: Expr) -> Expr {
    ExprKind::UnaryOp {
        op,
        operand: boxed(operand),
    }
    .into()
}

/// `left op right` with a single comparison.
pub fn compare(left: Expr, op: CmpOperator, right: Expr) -> Expr {
    ExprKind::Compare {
        left: boxed(left),
        ops: vec![op],
        comparators: vec![right],
    }
    .into()
}

/// `func(args)`
pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    call_kw(func, args, Vec::new())
}

/// `func(args, keywords)`
pub fn call_kw(func: Expr, args: Vec<Expr>, keywords: Vec<Keyword>) -> Expr {
    ExprKind::Call {
        func: boxed(func),
        args,
        keywords,
    }
    .into()
}

/// `arg=value`, or `**value` when `arg` is `None`.
pub fn keyword(arg: Option<&str>, value: Expr) -> Keyword {
    Keyword {
        arg: arg.map(str::to_string),
        value,
    }
}

/// `value.attr`
pub fn attr(value: Expr, attr: &str) -> Expr {
    ExprKind::Attribute {
        value: boxed(value),
        attr: attr.to_string(),
    }
    .into()
}

/// `value[slice]`
pub fn subscript(value: Expr, slice: Expr) -> Expr {
    ExprKind::Subscript {
        value: boxed(value),
        slice: boxed(slice),
    }
    .into()
}

/// `*value`
pub fn starred(value: Expr) -> Expr {
    ExprKind::Starred { value: boxed(value) }.into()
}

/// `(elts)`
pub fn tuple(elts: Vec<Expr>) -> Expr {
    ExprKind::Tuple { elts }.into()
}

/// `[elts]`
pub fn list(elts: Vec<Expr>) -> Expr {
    ExprKind::List { elts }.into()
}

/// `lambda args: body`
pub fn lambda(args: Arguments, body: Expr) -> Expr {
    ExprKind::Lambda {
        args,
        body: boxed(body),
    }
    .into()
}

/// `(target := value)`
pub fn named_expr(target: &str, value: Expr) -> Expr {
    ExprKind::NamedExpr {
        target: target.to_string(),
        value: boxed(value),
    }
    .into()
}

/// `yield [value]`
pub fn yield_(value: Option<Expr>) -> Expr {
    ExprKind::Yield {
        value: value.map(boxed),
    }
    .into()
}

/// One comprehension clause.
pub fn comp_for(target: Expr, iter: Expr, ifs: Vec<Expr>) -> Comprehension {
    Comprehension { target, iter, ifs }
}

/// `[elt for ...]`
pub fn list_comp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    ExprKind::ListComp {
        elt: boxed(elt),
        generators,
    }
    .into()
}

/// `(elt for ...)`
pub fn generator_exp(elt: Expr, generators: Vec<Comprehension>) -> Expr {
    ExprKind::GeneratorExp {
        elt: boxed(elt),
        generators,
    }
    .into()
}

/// Plain positional parameters.
pub fn params(names: &[&str]) -> Arguments {
    Arguments {
        args: names.iter().map(|n| n.to_string()).collect(),
        ..Arguments::default()
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Expression statement.
pub fn expr_stmt(value: Expr) -> Stmt {
    StmtKind::Expr { value }.into()
}

/// `target = value`
pub fn assign(target: Expr, value: Expr) -> Stmt {
    StmtKind::Assign {
        targets: vec![target],
        value,
    }
    .into()
}

/// `target op= value`
pub fn aug_assign(target: Expr, op: BinOperator, value: Expr) -> Stmt {
    StmtKind::AugAssign { target, op, value }.into()
}

/// `return [value]`
pub fn ret(value: Option<Expr>) -> Stmt {
    StmtKind::Return { value }.into()
}

/// `def name(args): body`
pub fn def(name: &str, args: Arguments, body: Vec<Stmt>) -> Stmt {
    StmtKind::FunctionDef {
        name: name.to_string(),
        args,
        body,
        decorator_list: Vec::new(),
    }
    .into()
}

/// `class name(bases): body`
pub fn class(name: &str, bases: Vec<Expr>, body: Vec<Stmt>) -> Stmt {
    StmtKind::ClassDef {
        name: name.to_string(),
        bases,
        keywords: Vec::new(),
        body,
        decorator_list: Vec::new(),
    }
    .into()
}

/// `for target in iter: body`
pub fn for_(target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    StmtKind::For {
        target,
        iter,
        body,
        orelse,
    }
    .into()
}

/// `while test: body`
pub fn while_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    StmtKind::While { test, body, orelse }.into()
}

/// `if test: body else: orelse`
pub fn if_(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
    StmtKind::If { test, body, orelse }.into()
}

/// `try: body except...: else: finally:`
pub fn try_(
    body: Vec<Stmt>,
    handlers: Vec<ExceptHandler>,
    orelse: Vec<Stmt>,
    finalbody: Vec<Stmt>,
) -> Stmt {
    StmtKind::Try {
        body,
        handlers,
        orelse,
        finalbody,
    }
    .into()
}

/// `except type as name: body`
pub fn except(type_: Option<Expr>, name: Option<&str>, body: Vec<Stmt>) -> ExceptHandler {
    ExceptHandler {
        line: 0,
        type_,
        name: name.map(str::to_string),
        body,
    }
}

/// `with context as target: body`
pub fn with(items: Vec<(Expr, Option<Expr>)>, body: Vec<Stmt>) -> Stmt {
    StmtKind::With {
        items: items
            .into_iter()
            .map(|(context_expr, optional_vars)| WithItem {
                context_expr,
                optional_vars,
            })
            .collect(),
        body,
    }
    .into()
}

/// `raise [exc [from cause]]`
pub fn raise(exc: Option<Expr>, cause: Option<Expr>) -> Stmt {
    StmtKind::Raise { exc, cause }.into()
}

/// `global names`
pub fn global(names: &[&str]) -> Stmt {
    StmtKind::Global {
        names: names.iter().map(|n| n.to_string()).collect(),
    }
    .into()
}

/// `nonlocal names`
pub fn nonlocal(names: &[&str]) -> Stmt {
    StmtKind::Nonlocal {
        names: names.iter().map(|n| n.to_string()).collect(),
    }
    .into()
}

/// `pass`
pub fn pass() -> Stmt {
    StmtKind::Pass.into()
}

/// `break`
pub fn break_() -> Stmt {
    StmtKind::Break.into()
}

/// `continue`
pub fn continue_() -> Stmt {
    StmtKind::Continue.into()
}
