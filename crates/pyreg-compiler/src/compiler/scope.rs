// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scope analysis for name resolution.
//!
//! Builds one [`Scope`] per module, function and class body, classifies every
//! name and assigns registers. Closures do not box captured variables: a
//! free variable gets a register of its own, paired in `free2reg` with the
//! register of the enclosing scope it aliases.
//!
//! Analysis runs in three steps:
//!
//! 1. collection walks each body, recording definitions, uses and
//!    `global`/`nonlocal` declarations
//! 2. classification computes `local_defs`, `cellvars` and `freevars`
//!    bottom-up
//! 3. register assignment walks top-down, handing each scope the register
//!    map of its parent

use std::borrow::Cow;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::desugar::ir::{self, ExprKind, ScopeId, StmtKind};
use crate::error::{CompileError, Result};

/// Name of the synthetic register holding the namespace of module and class
/// bodies.
pub const LOCALS: &str = "<locals>";

/// Implicit class reference used by zero-argument `super()`.
pub const CLASS_CELL: &str = "__class__";

/// Kind of body a scope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Module body
    Module,
    /// Function body
    Function,
    /// Class body
    Class,
}

/// How a name is read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Fixed register of this frame
    Fast,
    /// Register shared with an enclosing or nested scope
    Deref,
    /// Class namespace first, then the shared register
    ClassDeref,
    /// Module globals, then builtins
    Global,
    /// Local namespace, then globals, then builtins
    Name,
}

/// Insertion-ordered set of names.
#[derive(Debug, Clone, Default)]
pub struct NameSet {
    order: Vec<String>,
    members: FxHashSet<String>,
}

impl NameSet {
    /// Adds `name`; returns false if it was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.members.contains(name) {
            return false;
        }
        self.members.insert(name.to_string());
        self.order.push(name.to_string());
        true
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Names in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<'a> Extend<&'a String> for NameSet {
    fn extend<I: IntoIterator<Item = &'a String>>(&mut self, iter: I) {
        for name in iter {
            self.insert(name);
        }
    }
}

/// A captured variable: its register in the enclosing scope and here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeVar {
    /// Variable name
    pub name: String,
    /// Register in the enclosing scope
    pub parent_reg: u32,
    /// Register in this scope
    pub reg: u32,
}

/// Names and registers of one body.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Name used in diagnostics and qualified names
    pub name: String,
    /// Body kind
    pub kind: ScopeKind,
    /// Class whose name mangles private identifiers in this body
    pub private: Option<String>,
    /// Set when the body contains `yield` or `yield from`
    pub generator: bool,
    /// Nested inside a function
    pub nested: bool,
    /// Synthesized body of a comprehension or generator expression
    pub comprehension: bool,
    parent: Option<usize>,

    defs: NameSet,
    uses: NameSet,
    globals: NameSet,
    nonlocals: NameSet,

    /// Names bound here, for function scopes
    pub local_defs: NameSet,
    /// Local names read by a nested scope
    pub cellvars: NameSet,
    /// Names read here and bound in an enclosing function
    pub freevars: NameSet,

    regs: FxHashMap<String, u32>,
    /// Register names in register order
    pub varnames: Vec<String>,
    /// Captured variables in `freevars` order
    pub free2reg: Vec<FreeVar>,
    /// Fixed registers
    pub nlocals: u32,

    children: Vec<usize>,
}

impl Scope {
    fn new(name: &str, kind: ScopeKind, private: Option<String>, nested: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            private,
            generator: false,
            nested,
            comprehension: false,
            parent: None,
            defs: NameSet::default(),
            uses: NameSet::default(),
            globals: NameSet::default(),
            nonlocals: NameSet::default(),
            local_defs: NameSet::default(),
            cellvars: NameSet::default(),
            freevars: NameSet::default(),
            regs: FxHashMap::default(),
            varnames: Vec::new(),
            free2reg: Vec::new(),
            nlocals: 0,
            children: Vec::new(),
        }
    }

    /// Whether `name` is a cell or free variable.
    pub fn is_deref(&self, name: &str) -> bool {
        self.cellvars.contains(name) || self.freevars.contains(name)
    }

    /// Whether `name` was declared `global` here.
    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    /// Resolves how `name` is read.
    pub fn access(&self, name: &str) -> Access {
        if self.is_deref(name) {
            if self.kind == ScopeKind::Class {
                Access::ClassDeref
            } else {
                Access::Deref
            }
        } else if self.local_defs.contains(name) {
            Access::Fast
        } else if self.globals.contains(name) || self.kind == ScopeKind::Function {
            Access::Global
        } else {
            Access::Name
        }
    }

    /// Resolves how `name` is written. A class body binds into its own
    /// namespace even when an enclosing function has a variable of that name.
    pub fn store_access(&self, name: &str) -> Access {
        match self.access(name) {
            Access::ClassDeref if self.defs.contains(name) => Access::Name,
            access => access,
        }
    }

    /// Register of `name`, if it has one.
    pub fn reg(&self, name: &str) -> Option<u32> {
        self.regs.get(name).copied()
    }

    /// Registers of the cell variables, in `cellvars` order.
    pub fn cell2reg(&self) -> Vec<u32> {
        self.cellvars.iter().filter_map(|name| self.reg(name)).collect()
    }

    /// Mangles a private identifier with the enclosing class name.
    pub fn mangle<'a>(&self, name: &'a str) -> Cow<'a, str> {
        mangle(self.private.as_deref(), name)
    }

    fn display_name(&self) -> String {
        match self.kind {
            ScopeKind::Module => "<module>".to_string(),
            _ => self.name.clone(),
        }
    }
}

/// `__spam` inside `class Ham` becomes `_Ham__spam`. Dunder names, dotted
/// names and classes made only of underscores are left alone.
pub fn mangle<'a>(private: Option<&str>, name: &'a str) -> Cow<'a, str> {
    let Some(class) = private else {
        return Cow::Borrowed(name);
    };
    if !name.starts_with("__") || name.ends_with("__") || name.contains('.') {
        return Cow::Borrowed(name);
    }
    let class = class.trim_start_matches('_');
    if class.is_empty() {
        return Cow::Borrowed(name);
    }
    Cow::Owned(format!("_{class}{name}"))
}

/// Every scope of a module, the module itself at index 0.
#[derive(Debug, Clone)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    by_id: FxHashMap<ScopeId, usize>,
}

impl ScopeTable {
    /// Collects, classifies and assigns registers for a whole module.
    pub fn build(module: &ir::Module) -> Result<Self> {
        let mut table = ScopeTable {
            scopes: vec![Scope::new("<module>", ScopeKind::Module, None, false)],
            by_id: FxHashMap::default(),
        };
        Collector {
            table: &mut table,
            current: 0,
        }
        .body(&module.body)?;

        table.analyze(0, &NameSet::default())?;
        table.assign_regs(0, &FxHashMap::default())?;
        Ok(table)
    }

    /// The module scope.
    pub fn module(&self) -> &Scope {
        &self.scopes[0]
    }

    /// Scope of a function or class body.
    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.by_id.get(&id).map(|&index| &self.scopes[index])
    }

    /// Number of scopes, module included.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false; the module scope exists.
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    // ========================================================================
    // Classification
    // ========================================================================

    fn analyze(&mut self, index: usize, parent_defs: &NameSet) -> Result<()> {
        let scope = &self.scopes[index];
        let local_defs = if scope.kind == ScopeKind::Function {
            scope.defs.clone()
        } else {
            NameSet::default()
        };

        for name in scope.nonlocals.iter() {
            if !parent_defs.contains(name) {
                return Err(CompileError::UnboundNonlocal {
                    name: name.clone(),
                    scope: scope.display_name(),
                });
            }
        }

        let mut child_defs = parent_defs.clone();
        child_defs.extend(local_defs.iter());
        if scope.kind == ScopeKind::Class {
            child_defs.insert(CLASS_CELL);
        }

        let children = scope.children.clone();
        let mut child_uses = NameSet::default();
        for &child in &children {
            self.analyze(child, &child_defs)?;
            child_uses.extend(self.scopes[child].freevars.iter());
        }

        let scope = &mut self.scopes[index];
        let mut uses = scope.uses.clone();
        uses.extend(scope.nonlocals.iter());
        uses.extend(child_uses.iter());

        let mut cellvars = NameSet::default();
        for name in local_defs.iter() {
            if child_uses.contains(name) {
                cellvars.insert(name);
            }
        }
        if scope.kind == ScopeKind::Class && child_uses.contains(CLASS_CELL) {
            cellvars.insert(CLASS_CELL);
        }

        let mut freevars = NameSet::default();
        for name in uses.iter() {
            if parent_defs.contains(name)
                && !local_defs.contains(name)
                && !scope.globals.contains(name)
                && !cellvars.contains(name)
            {
                freevars.insert(name);
            }
        }

        trace!(
            scope = %scope.display_name(),
            cellvars = ?cellvars.order,
            freevars = ?freevars.order,
            "classified scope"
        );

        scope.local_defs = local_defs;
        scope.cellvars = cellvars;
        scope.freevars = freevars;
        Ok(())
    }

    // ========================================================================
    // Register assignment
    // ========================================================================

    fn assign_regs(&mut self, index: usize, parent_regs: &FxHashMap<String, u32>) -> Result<()> {
        let scope = &mut self.scopes[index];
        let mut varnames: Vec<String> = match scope.kind {
            ScopeKind::Function => scope.local_defs.iter().cloned().collect(),
            ScopeKind::Module | ScopeKind::Class => {
                let mut names = vec![LOCALS.to_string()];
                if scope.cellvars.contains(CLASS_CELL) {
                    names.push(CLASS_CELL.to_string());
                }
                names
            }
        };

        let mut free2reg = Vec::with_capacity(scope.freevars.len());
        for name in scope.freevars.iter() {
            let parent_reg = parent_regs.get(name).copied().ok_or_else(|| {
                CompileError::internal(format!(
                    "free variable '{}' of {} has no register in the enclosing scope",
                    name,
                    scope.display_name()
                ))
            })?;
            free2reg.push(FreeVar {
                name: name.clone(),
                parent_reg,
                reg: varnames.len() as u32,
            });
            varnames.push(name.clone());
        }

        scope.regs = varnames
            .iter()
            .enumerate()
            .map(|(reg, name)| (name.clone(), reg as u32))
            .collect();
        scope.nlocals = varnames.len() as u32;
        scope.varnames = varnames;
        scope.free2reg = free2reg;

        let regs = scope.regs.clone();
        let children = scope.children.clone();
        for child in children {
            self.assign_regs(child, &regs)?;
        }
        Ok(())
    }
}

// ============================================================================
// Collection
// ============================================================================

struct Collector<'t> {
    table: &'t mut ScopeTable,
    current: usize,
}

impl Collector<'_> {
    fn scope(&mut self) -> &mut Scope {
        &mut self.table.scopes[self.current]
    }

    fn mangled(&self, name: &str) -> String {
        self.table.scopes[self.current].mangle(name).into_owned()
    }

    fn def(&mut self, name: &str) {
        let name = self.mangled(name);
        let scope = self.scope();
        if !scope.globals.contains(&name) && !scope.nonlocals.contains(&name) {
            scope.defs.insert(&name);
        }
    }

    /// Binds an assignment expression target. Inside a comprehension the
    /// name belongs to the nearest enclosing body that is not one; every
    /// comprehension in between sees it as nonlocal, or as global when that
    /// body is the module or declares the name global.
    fn named(&mut self, target: &str, line: u32) -> Result<()> {
        if !self.scope().comprehension {
            self.def(target);
            return Ok(());
        }
        let name = self.mangled(target);
        let mut chain = Vec::new();
        let mut index = self.current;
        while self.table.scopes[index].comprehension {
            let scope = &self.table.scopes[index];
            if scope.defs.contains(&name) {
                return Err(CompileError::syntax(
                    format!(
                        "assignment expression cannot rebind comprehension iteration variable '{name}'"
                    ),
                    line,
                ));
            }
            chain.push(index);
            index = scope
                .parent
                .ok_or_else(|| CompileError::internal("comprehension without an enclosing scope"))?;
        }

        let owner = &mut self.table.scopes[index];
        if owner.kind == ScopeKind::Class {
            return Err(CompileError::syntax(
                "assignment expression within a comprehension cannot be used in a class body",
                line,
            ));
        }
        let global = owner.kind == ScopeKind::Module || owner.globals.contains(&name);
        if !owner.globals.contains(&name) && !owner.nonlocals.contains(&name) {
            owner.defs.insert(&name);
        }
        for index in chain {
            let scope = &mut self.table.scopes[index];
            if global {
                scope.globals.insert(&name);
            } else {
                scope.nonlocals.insert(&name);
            }
        }
        Ok(())
    }

    fn use_(&mut self, name: &str) {
        let name = self.mangled(name);
        let scope = self.scope();
        scope.uses.insert(&name);
        if name == "super" && scope.kind == ScopeKind::Function {
            scope.uses.insert(CLASS_CELL);
        }
    }

    fn declare(&mut self, names: &[String], nonlocal: bool, line: u32) -> Result<()> {
        let declaration = if nonlocal { "nonlocal" } else { "global" };
        for name in names {
            let name = self.mangled(name);
            let scope = self.scope();
            if nonlocal && scope.kind == ScopeKind::Module {
                return Err(CompileError::syntax(
                    "nonlocal declaration not allowed at module level",
                    line,
                ));
            }
            let usage = if scope.defs.contains(&name) {
                Some("assigned")
            } else if scope.uses.contains(&name) {
                Some("used")
            } else {
                None
            };
            if let Some(usage) = usage {
                return Err(CompileError::ScopeOrder {
                    name,
                    scope: scope.display_name(),
                    usage,
                    declaration,
                });
            }
            if nonlocal {
                scope.nonlocals.insert(&name);
            } else {
                scope.globals.insert(&name);
            }
        }
        Ok(())
    }

    fn body(&mut self, body: &[ir::Stmt]) -> Result<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &ir::Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Return(value) => self.opt_expr(value.as_ref())?,
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.target(target)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value)?;
                for target in targets {
                    self.target(target)?;
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value)?;
                if let ExprKind::Name(name) = &target.kind {
                    self.use_(name);
                }
                self.target(target)?;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(iter)?;
                self.target(target)?;
                self.body(body)?;
                self.body(orelse)?;
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.body(body)?;
                self.body(orelse)?;
            }
            StmtKind::With {
                context,
                target,
                body,
            } => {
                self.expr(context)?;
                if let Some(target) = target {
                    self.target(target)?;
                }
                self.body(body)?;
            }
            StmtKind::Raise { exc, cause } => {
                self.opt_expr(exc.as_ref())?;
                self.opt_expr(cause.as_ref())?;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.body(body)?;
                for handler in handlers {
                    self.opt_expr(handler.type_.as_ref())?;
                    if let Some(name) = &handler.name {
                        self.def(name);
                    }
                    self.body(&handler.body)?;
                }
                self.body(orelse)?;
                self.body(finalbody)?;
            }
            StmtKind::Import(names) => {
                for alias in names {
                    match &alias.asname {
                        Some(asname) => self.def(asname),
                        None => {
                            let first = alias.name.split('.').next().unwrap_or(&alias.name);
                            self.def(first);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    self.def(alias.asname.as_ref().unwrap_or(&alias.name));
                }
            }
            StmtKind::Global(names) => self.declare(names, false, stmt.line)?,
            StmtKind::Nonlocal(names) => self.declare(names, true, stmt.line)?,
            StmtKind::Expr(value) => self.expr(value)?,
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::ListAppend { list: acc, value } | StmtKind::SetAdd { set: acc, value } => {
                self.use_(acc);
                self.expr(value)?;
            }
            StmtKind::DictInsert { dict, key, value } => {
                self.use_(dict);
                self.expr(key)?;
                self.expr(value)?;
            }
        }
        Ok(())
    }

    /// Assignment and deletion targets.
    fn target(&mut self, target: &ir::Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => self.def(name),
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.target(elt)?;
                }
            }
            ExprKind::Starred(value) => self.target(value)?,
            _ => self.expr(target)?,
        }
        Ok(())
    }

    fn opt_expr(&mut self, expr: Option<&ir::Expr>) -> Result<()> {
        match expr {
            Some(expr) => self.expr(expr),
            None => Ok(()),
        }
    }

    fn exprs(&mut self, exprs: &[ir::Expr]) -> Result<()> {
        for expr in exprs {
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &ir::Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::BoolOp { values, .. } => self.exprs(values)?,
            ExprKind::NamedExpr { target, value } => {
                self.expr(value)?;
                self.named(target, expr.line)?;
            }
            ExprKind::BinOp { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)?;
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand)?,
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)?;
            }
            ExprKind::Dict { keys, values } => {
                for key in keys.iter().flatten() {
                    self.expr(key)?;
                }
                self.exprs(values)?;
            }
            ExprKind::Set(elts) | ExprKind::List(elts) | ExprKind::Tuple(elts) => {
                self.exprs(elts)?
            }
            ExprKind::Yield(value) => {
                self.scope().generator = true;
                self.opt_expr(value.as_deref())?;
            }
            ExprKind::YieldFrom(value) => {
                self.scope().generator = true;
                self.expr(value)?;
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left)?;
                self.exprs(comparators)?;
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                self.exprs(args)?;
                for keyword in keywords {
                    self.expr(&keyword.value)?;
                }
            }
            ExprKind::Constant(_) => {}
            ExprKind::Attribute { value, .. } => self.expr(value)?,
            ExprKind::Subscript { value, slice } => {
                self.expr(value)?;
                self.expr(slice)?;
            }
            ExprKind::Starred(value) | ExprKind::Iter(value) => self.expr(value)?,
            ExprKind::Name(name) => self.use_(name),
            ExprKind::Slice { lower, upper, step } => {
                self.opt_expr(lower.as_deref())?;
                self.opt_expr(upper.as_deref())?;
                self.opt_expr(step.as_deref())?;
            }
            ExprKind::Function(function) => self.function(function)?,
            ExprKind::Class(class) => self.class(class)?,
        }
        Ok(())
    }

    fn function(&mut self, function: &ir::FunctionDef) -> Result<()> {
        let params = &function.params;
        self.exprs(&params.defaults)?;
        for default in params.kw_defaults.iter().flatten() {
            self.expr(default)?;
        }

        let parent = &self.table.scopes[self.current];
        let nested = parent.kind == ScopeKind::Function || parent.nested;
        let mut scope = Scope::new(
            &function.name,
            ScopeKind::Function,
            parent.private.clone(),
            nested,
        );
        scope.comprehension = function.comprehension;
        for name in params.names() {
            let name = scope.mangle(name).into_owned();
            scope.defs.insert(&name);
        }
        self.sprout(function.id, scope, &function.body)
    }

    fn class(&mut self, class: &ir::ClassDef) -> Result<()> {
        self.exprs(&class.bases)?;
        for keyword in &class.keywords {
            self.expr(&keyword.value)?;
        }
        let parent = &self.table.scopes[self.current];
        let nested = parent.kind == ScopeKind::Function || parent.nested;
        let scope = Scope::new(
            &class.name,
            ScopeKind::Class,
            Some(class.name.clone()),
            nested,
        );
        self.sprout(class.id, scope, &class.body)
    }

    fn sprout(&mut self, id: ScopeId, mut scope: Scope, body: &[ir::Stmt]) -> Result<()> {
        scope.parent = Some(self.current);
        let index = self.table.scopes.len();
        self.table.scopes.push(scope);
        self.table.scopes[self.current].children.push(index);
        self.table.by_id.insert(id, index);

        let parent = std::mem::replace(&mut self.current, index);
        let result = self.body(body);
        self.current = parent;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self as a, BinOperator};
    use crate::config::CompileOptions;
    use crate::desugar::desugar;

    fn analyze(body: Vec<a::Stmt>) -> Result<ScopeTable> {
        let module = desugar(&a::Module { body }, &CompileOptions::default());
        ScopeTable::build(&module)
    }

    fn scope<'t>(table: &'t ScopeTable, id: u32) -> &'t Scope {
        table.get(ScopeId(id)).unwrap()
    }

    #[test]
    fn test_module_names() {
        let table = analyze(vec![a::assign(a::name("x"), a::int(1))]).unwrap();
        let module = table.module();
        assert_eq!(module.access("x"), Access::Name);
        assert_eq!(module.varnames, vec![LOCALS]);
        assert_eq!(module.nlocals, 1);
    }

    #[test]
    fn test_function_locals_and_globals() {
        let table = analyze(vec![a::def(
            "f",
            a::params(&["a"]),
            vec![
                a::assign(a::name("b"), a::name("a")),
                a::ret(Some(a::binop(a::name("b"), BinOperator::Add, a::name("len")))),
            ],
        )])
        .unwrap();
        let f = scope(&table, 0);
        assert_eq!(f.access("a"), Access::Fast);
        assert_eq!(f.access("b"), Access::Fast);
        assert_eq!(f.access("len"), Access::Global);
        assert_eq!(f.varnames, vec!["a", "b"]);
        assert_eq!(f.reg("a"), Some(0));
    }

    #[test]
    fn test_closure_aliasing() {
        // def outer(a):
        //     def inner(): return a
        //     return inner
        let table = analyze(vec![a::def(
            "outer",
            a::params(&["a"]),
            vec![
                a::def("inner", a::params(&[]), vec![a::ret(Some(a::name("a")))]),
                a::ret(Some(a::name("inner"))),
            ],
        )])
        .unwrap();
        let outer = scope(&table, 0);
        let inner = scope(&table, 1);
        assert!(outer.cellvars.contains("a"));
        assert_eq!(outer.access("a"), Access::Deref);
        assert!(inner.freevars.contains("a"));
        assert_eq!(inner.access("a"), Access::Deref);
        assert_eq!(
            inner.free2reg,
            vec![FreeVar {
                name: "a".into(),
                parent_reg: outer.reg("a").unwrap(),
                reg: 0,
            }]
        );
        assert_eq!(outer.cell2reg(), vec![0]);
    }

    #[test]
    fn test_class_cell_for_super() {
        // class C:
        //     def f(self): return super()
        let table = analyze(vec![a::class(
            "C",
            vec![],
            vec![a::def(
                "f",
                a::params(&["self"]),
                vec![a::ret(Some(a::call(a::name("super"), vec![])))],
            )],
        )])
        .unwrap();
        let class = scope(&table, 0);
        let method = scope(&table, 1);
        assert!(class.cellvars.contains(CLASS_CELL));
        assert!(!class.freevars.contains(CLASS_CELL));
        assert_eq!(class.reg(CLASS_CELL), Some(1));
        assert_eq!(method.access(CLASS_CELL), Access::Deref);
        assert_eq!(method.free2reg[0].parent_reg, 1);
        assert!(table.module().freevars.is_empty());
    }

    #[test]
    fn test_global_after_use_is_error() {
        let err = analyze(vec![a::def(
            "f",
            a::params(&[]),
            vec![a::expr_stmt(a::name("x")), a::global(&["x"])],
        )])
        .unwrap_err();
        assert!(matches!(
            &err,
            CompileError::ScopeOrder { name, usage: "used", declaration: "global", .. } if name == "x"
        ));
        assert!(err.to_string().contains("in f"));
    }

    #[test]
    fn test_nonlocal_after_assignment_is_error() {
        let err = analyze(vec![a::def(
            "f",
            a::params(&["x"]),
            vec![a::def(
                "g",
                a::params(&[]),
                vec![a::assign(a::name("x"), a::int(1)), a::nonlocal(&["x"])],
            )],
        )])
        .unwrap_err();
        assert!(matches!(err, CompileError::ScopeOrder { usage: "assigned", .. }));
    }

    #[test]
    fn test_unbound_nonlocal() {
        let err = analyze(vec![a::def(
            "g",
            a::params(&[]),
            vec![a::nonlocal(&["y"])],
        )])
        .unwrap_err();
        assert!(matches!(err, CompileError::UnboundNonlocal { .. }));
    }

    #[test]
    fn test_nonlocal_store_is_deref() {
        let table = analyze(vec![a::def(
            "f",
            a::params(&[]),
            vec![
                a::assign(a::name("n"), a::int(0)),
                a::def(
                    "g",
                    a::params(&[]),
                    vec![a::nonlocal(&["n"]), a::assign(a::name("n"), a::int(1))],
                ),
            ],
        )])
        .unwrap();
        assert_eq!(scope(&table, 1).access("n"), Access::Deref);
        assert_eq!(scope(&table, 0).access("n"), Access::Deref);
    }

    #[test]
    fn test_declared_global_not_captured() {
        let table = analyze(vec![a::def(
            "f",
            a::params(&[]),
            vec![
                a::global(&["g"]),
                a::assign(a::name("g"), a::int(1)),
                a::def("h", a::params(&[]), vec![a::ret(Some(a::name("g")))]),
            ],
        )])
        .unwrap();
        let f = scope(&table, 0);
        assert_eq!(f.access("g"), Access::Global);
        assert!(f.cellvars.is_empty());
        assert!(scope(&table, 1).freevars.is_empty());
    }

    #[test]
    fn test_named_expr_in_comprehension_binds_function() {
        // def f(xs):
        //     return [(y := x) for x in xs], y
        let table = analyze(vec![a::def(
            "f",
            a::params(&["xs"]),
            vec![a::ret(Some(a::tuple(vec![
                a::list_comp(
                    a::named_expr("y", a::name("x")),
                    vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
                ),
                a::name("y"),
            ])))],
        )])
        .unwrap();
        let f = scope(&table, 0);
        let listcomp = scope(&table, 1);
        assert!(listcomp.comprehension);
        assert!(f.local_defs.contains("y"));
        assert!(f.cellvars.contains("y"));
        assert_eq!(f.access("y"), Access::Deref);
        assert!(!listcomp.local_defs.contains("y"));
        assert!(listcomp.freevars.contains("y"));
        assert_eq!(listcomp.access("y"), Access::Deref);
        assert_eq!(listcomp.access("x"), Access::Fast);
    }

    #[test]
    fn test_named_expr_in_nested_comprehension() {
        // def f(xs):
        //     return [[(y := b) for b in a] for a in xs]
        let table = analyze(vec![a::def(
            "f",
            a::params(&["xs"]),
            vec![a::ret(Some(a::list_comp(
                a::list_comp(
                    a::named_expr("y", a::name("b")),
                    vec![a::comp_for(a::name("b"), a::name("a"), vec![])],
                ),
                vec![a::comp_for(a::name("a"), a::name("xs"), vec![])],
            )))],
        )])
        .unwrap();
        let f = scope(&table, 0);
        let outer = scope(&table, 1);
        let inner = scope(&table, 2);
        assert!(f.cellvars.contains("y"));
        assert!(outer.freevars.contains("y"));
        assert!(!outer.local_defs.contains("y"));
        assert_eq!(inner.access("y"), Access::Deref);
    }

    #[test]
    fn test_named_expr_in_module_comprehension_is_global() {
        // [(y := x) for x in xs]
        let table = analyze(vec![a::expr_stmt(a::list_comp(
            a::named_expr("y", a::name("x")),
            vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
        ))])
        .unwrap();
        let listcomp = scope(&table, 0);
        assert_eq!(listcomp.access("y"), Access::Global);
        assert!(listcomp.freevars.is_empty());
        assert!(!listcomp.varnames.iter().any(|name| name == "y"));
        assert_eq!(table.module().access("y"), Access::Name);
    }

    #[test]
    fn test_named_expr_rebinding_iteration_variable() {
        // [(x := 1) for x in xs]
        let err = analyze(vec![a::expr_stmt(a::list_comp(
            a::named_expr("x", a::int(1)),
            vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
        ))])
        .unwrap_err();
        assert!(matches!(&err, CompileError::Syntax { message, .. } if message.contains("iteration variable 'x'")));
    }

    #[test]
    fn test_named_expr_in_class_comprehension() {
        // class C:
        //     [(y := x) for x in xs]
        let err = analyze(vec![a::class(
            "C",
            vec![],
            vec![a::expr_stmt(a::list_comp(
                a::named_expr("y", a::name("x")),
                vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
            ))],
        )])
        .unwrap_err();
        assert!(matches!(&err, CompileError::Syntax { message, .. } if message.contains("class body")));
    }

    #[test]
    fn test_mangling() {
        assert_eq!(mangle(Some("Ham"), "__spam"), "_Ham__spam");
        assert_eq!(mangle(Some("_Ham"), "__spam"), "_Ham__spam");
        assert_eq!(mangle(Some("Ham"), "__init__"), "__init__");
        assert_eq!(mangle(Some("Ham"), "__a.b"), "__a.b");
        assert_eq!(mangle(Some("___"), "__spam"), "__spam");
        assert_eq!(mangle(None, "__spam"), "__spam");
        assert_eq!(mangle(Some("Ham"), "_spam"), "_spam");
    }

    #[test]
    fn test_access_is_total() {
        let table = analyze(vec![a::def(
            "f",
            a::params(&["p"]),
            vec![
                a::global(&["g"]),
                a::assign(a::name("l"), a::name("unknown")),
                a::def("h", a::params(&[]), vec![a::ret(Some(a::name("p")))]),
            ],
        )])
        .unwrap();
        let f = scope(&table, 0);
        for name in ["p", "l", "g", "unknown", "h"] {
            let expected = if f.is_deref(name) {
                Access::Deref
            } else if f.local_defs.contains(name) {
                Access::Fast
            } else {
                Access::Global
            };
            assert_eq!(f.access(name), expected, "{name}");
        }
        assert_eq!(f.access("p"), Access::Deref);
    }
}
