// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lowering of surface syntax into the core IR.
//!
//! Rewrites performed here:
//!
//! - `assert e, m` becomes `if not e: raise AssertionError(m)`
//! - `lambda` becomes an anonymous `<lambda>` function returning its body
//! - decorators become calls wrapping the plain definition, which is then
//!   assigned to its name
//! - comprehensions become a one-parameter function over `.0`, called with
//!   the iterator of the outermost source
//! - `with a, b:` nests into single-item `with` statements
//! - docstrings move out of the body into the definition
//!
//! Every synthesized node takes the line of the construct it replaces.

pub mod ir;

use crate::ast;
use crate::config::CompileOptions;
use ir::{ClassDef, Expr, ExprKind, FunctionDef, Keyword, Parameters, ScopeId, Stmt, StmtKind};

/// Parameter holding the iterator of a comprehension's outermost source.
pub const COMPREHENSION_ARG: &str = ".0";

/// Local accumulating the result of a list/set/dict comprehension.
pub const COMPREHENSION_ACC: &str = ".acc";

/// Lowers a module into the core IR.
pub fn desugar(module: &ast::Module, options: &CompileOptions) -> ir::Module {
    let mut desugarer = Desugarer::new(options);
    let mut body = module.body.as_slice();
    let docstring = desugarer.docstring(&mut body);
    let body = desugarer.stmts(body);
    ir::Module {
        body,
        docstring,
        nscopes: desugarer.next_scope,
    }
}

/// Comprehension flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comp {
    List,
    Set,
    Dict,
    Generator,
}

impl Comp {
    fn name(self) -> &'static str {
        match self {
            Comp::List => "<listcomp>",
            Comp::Set => "<setcomp>",
            Comp::Dict => "<dictcomp>",
            Comp::Generator => "<genexpr>",
        }
    }
}

struct Desugarer {
    keep_asserts: bool,
    keep_docstrings: bool,
    next_scope: u32,
}

impl Desugarer {
    fn new(options: &CompileOptions) -> Self {
        Self {
            keep_asserts: options.keep_asserts(),
            keep_docstrings: options.keep_docstrings(),
            next_scope: 0,
        }
    }

    fn scope_id(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        id
    }

    /// Strips a leading string constant statement off `body`.
    fn docstring(&self, body: &mut &[ast::Stmt]) -> Option<String> {
        let (first, rest) = body.split_first()?;
        let ast::StmtKind::Expr { value } = &first.kind else {
            return None;
        };
        let ast::ExprKind::Constant {
            value: ast::Constant::Str(doc),
        } = &value.kind
        else {
            return None;
        };
        *body = rest;
        self.keep_docstrings.then(|| doc.clone())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn stmts(&mut self, stmts: &[ast::Stmt]) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.stmt(stmt, &mut out);
        }
        out
    }

    fn stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<Stmt>) {
        let line = stmt.line;
        let kind = match &stmt.kind {
            ast::StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
            } => {
                let decorators = self.exprs(decorator_list);
                let first_line = decorator_list.first().map_or(line, |d| d.line);
                let function = self.function(name, args, body, first_line);
                StmtKind::Assign {
                    targets: vec![Expr::name(name, line)],
                    value: decorate(decorators, Expr::new(function, line)),
                }
            }
            ast::StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => {
                let decorators = self.exprs(decorator_list);
                let first_line = decorator_list.first().map_or(line, |d| d.line);
                let bases = self.exprs(bases);
                let keywords = self.keywords(keywords);
                let id = self.scope_id();
                let mut body = body.as_slice();
                let docstring = self.docstring(&mut body);
                let class = ClassDef {
                    id,
                    name: name.clone(),
                    bases,
                    keywords,
                    body: self.stmts(body),
                    docstring,
                    line: first_line,
                };
                StmtKind::Assign {
                    targets: vec![Expr::name(name, line)],
                    value: decorate(
                        decorators,
                        Expr::new(ExprKind::Class(Box::new(class)), line),
                    ),
                }
            }
            ast::StmtKind::Return { value } => StmtKind::Return(self.opt_expr(value)),
            ast::StmtKind::Delete { targets } => StmtKind::Delete(self.exprs(targets)),
            ast::StmtKind::Assign { targets, value } => StmtKind::Assign {
                targets: self.exprs(targets),
                value: self.expr(value),
            },
            ast::StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: self.expr(target),
                op: *op,
                value: self.expr(value),
            },
            ast::StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => StmtKind::For {
                target: self.expr(target),
                iter: self.expr(iter),
                body: self.stmts(body),
                orelse: self.stmts(orelse),
            },
            ast::StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.expr(test),
                body: self.stmts(body),
                orelse: self.stmts(orelse),
            },
            ast::StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test),
                body: self.stmts(body),
                orelse: self.stmts(orelse),
            },
            ast::StmtKind::With { items, body } => self.with(items, body, line),
            ast::StmtKind::Raise { exc, cause } => StmtKind::Raise {
                exc: self.opt_expr(exc),
                cause: self.opt_expr(cause),
            },
            ast::StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => StmtKind::Try {
                body: self.stmts(body),
                handlers: handlers
                    .iter()
                    .map(|h| ir::ExceptHandler {
                        line: h.line,
                        type_: self.opt_expr(&h.type_),
                        name: h.name.clone(),
                        body: self.stmts(&h.body),
                    })
                    .collect(),
                orelse: self.stmts(orelse),
                finalbody: self.stmts(finalbody),
            },
            ast::StmtKind::Assert { test, msg } => {
                if !self.keep_asserts {
                    return;
                }
                self.assert(test, msg.as_ref(), line)
            }
            ast::StmtKind::Import { names } => StmtKind::Import(names.clone()),
            ast::StmtKind::ImportFrom {
                module,
                names,
                level,
            } => StmtKind::ImportFrom {
                module: module.clone(),
                names: names.clone(),
                level: *level,
            },
            ast::StmtKind::Global { names } => StmtKind::Global(names.clone()),
            ast::StmtKind::Nonlocal { names } => StmtKind::Nonlocal(names.clone()),
            ast::StmtKind::Expr { value } => StmtKind::Expr(self.expr(value)),
            ast::StmtKind::Pass => StmtKind::Pass,
            ast::StmtKind::Break => StmtKind::Break,
            ast::StmtKind::Continue => StmtKind::Continue,
        };
        out.push(Stmt::new(kind, line));
    }

    fn with(&mut self, items: &[ast::WithItem], body: &[ast::Stmt], line: u32) -> StmtKind {
        let Some((item, rest)) = items.split_first() else {
            // A with statement without items only runs its body.
            return StmtKind::If {
                test: Expr::new(ExprKind::Constant(ir::Constant::Bool(true)), line),
                body: self.stmts(body),
                orelse: Vec::new(),
            };
        };
        let context = self.expr(&item.context_expr);
        let target = self.opt_expr(&item.optional_vars);
        let body = if rest.is_empty() {
            self.stmts(body)
        } else {
            let inner_line = rest[0].context_expr.line;
            vec![Stmt::new(self.with(rest, body, line), inner_line)]
        };
        StmtKind::With {
            context,
            target,
            body,
        }
    }

    fn assert(&mut self, test: &ast::Expr, msg: Option<&ast::Expr>, line: u32) -> StmtKind {
        let test = self.expr(test);
        let args = msg.map(|m| self.expr(m)).into_iter().collect();
        let error = Expr::new(
            ExprKind::Call {
                func: Box::new(Expr::name("AssertionError", line)),
                args,
                keywords: Vec::new(),
            },
            line,
        );
        StmtKind::If {
            test: Expr::new(
                ExprKind::UnaryOp {
                    op: ir::UnaryOperator::Not,
                    operand: Box::new(test),
                },
                line,
            ),
            body: vec![Stmt::new(
                StmtKind::Raise {
                    exc: Some(error),
                    cause: None,
                },
                line,
            )],
            orelse: Vec::new(),
        }
    }

    fn function(
        &mut self,
        name: &str,
        args: &ast::Arguments,
        body: &[ast::Stmt],
        line: u32,
    ) -> ExprKind {
        // Defaults belong to the enclosing scope.
        let params = self.params(args);
        let id = self.scope_id();
        let mut body = body;
        let docstring = self.docstring(&mut body);
        ExprKind::Function(Box::new(FunctionDef {
            id,
            name: name.to_string(),
            params,
            body: self.stmts(body),
            docstring,
            line,
            comprehension: false,
        }))
    }

    fn params(&mut self, args: &ast::Arguments) -> Parameters {
        Parameters {
            posonly: args.posonlyargs.clone(),
            args: args.args.clone(),
            vararg: args.vararg.clone(),
            kwonly: args.kwonlyargs.clone(),
            kwarg: args.kwarg.clone(),
            defaults: self.exprs(&args.defaults),
            kw_defaults: args.kw_defaults.iter().map(|d| self.opt_expr(d)).collect(),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn exprs(&mut self, exprs: &[ast::Expr]) -> Vec<Expr> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn opt_expr(&mut self, expr: &Option<ast::Expr>) -> Option<Expr> {
        expr.as_ref().map(|e| self.expr(e))
    }

    fn boxed(&mut self, expr: &ast::Expr) -> Box<Expr> {
        Box::new(self.expr(expr))
    }

    fn keywords(&mut self, keywords: &[ast::Keyword]) -> Vec<Keyword> {
        keywords
            .iter()
            .map(|k| Keyword {
                arg: k.arg.clone(),
                value: self.expr(&k.value),
            })
            .collect()
    }

    fn expr(&mut self, expr: &ast::Expr) -> Expr {
        use ast::ExprKind as A;

        let line = expr.line;
        let kind = match &expr.kind {
            A::BoolOp { op, values } => ExprKind::BoolOp {
                op: *op,
                values: self.exprs(values),
            },
            A::NamedExpr { target, value } => ExprKind::NamedExpr {
                target: target.clone(),
                value: self.boxed(value),
            },
            A::BinOp { left, op, right } => ExprKind::BinOp {
                left: self.boxed(left),
                op: *op,
                right: self.boxed(right),
            },
            A::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op: *op,
                operand: self.boxed(operand),
            },
            A::Lambda { args, body } => {
                let params = self.params(args);
                let id = self.scope_id();
                let body = self.expr(body);
                ExprKind::Function(Box::new(FunctionDef {
                    id,
                    name: "<lambda>".to_string(),
                    params,
                    body: vec![Stmt::new(StmtKind::Return(Some(body)), line)],
                    docstring: None,
                    line,
                    comprehension: false,
                }))
            }
            A::IfExp { test, body, orelse } => ExprKind::IfExp {
                test: self.boxed(test),
                body: self.boxed(body),
                orelse: self.boxed(orelse),
            },
            A::Dict { keys, values } => ExprKind::Dict {
                keys: keys.iter().map(|k| self.opt_expr(k)).collect(),
                values: self.exprs(values),
            },
            A::Set { elts } => ExprKind::Set(self.exprs(elts)),
            A::List { elts } => ExprKind::List(self.exprs(elts)),
            A::Tuple { elts } => ExprKind::Tuple(self.exprs(elts)),
            A::ListComp { elt, generators } => {
                return self.comprehension(Comp::List, elt, None, generators, line);
            }
            A::SetComp { elt, generators } => {
                return self.comprehension(Comp::Set, elt, None, generators, line);
            }
            A::DictComp {
                key,
                value,
                generators,
            } => {
                return self.comprehension(Comp::Dict, key, Some(value), generators, line);
            }
            A::GeneratorExp { elt, generators } => {
                return self.comprehension(Comp::Generator, elt, None, generators, line);
            }
            A::Yield { value } => ExprKind::Yield(value.as_deref().map(|v| self.boxed(v))),
            A::YieldFrom { value } => ExprKind::YieldFrom(self.boxed(value)),
            A::Compare {
                left,
                ops,
                comparators,
            } => ExprKind::Compare {
                left: self.boxed(left),
                ops: ops.clone(),
                comparators: self.exprs(comparators),
            },
            A::Call {
                func,
                args,
                keywords,
            } => ExprKind::Call {
                func: self.boxed(func),
                args: self.exprs(args),
                keywords: self.keywords(keywords),
            },
            A::Constant { value } => ExprKind::Constant(value.clone()),
            A::Attribute { value, attr } => ExprKind::Attribute {
                value: self.boxed(value),
                attr: attr.clone(),
            },
            A::Subscript { value, slice } => ExprKind::Subscript {
                value: self.boxed(value),
                slice: self.boxed(slice),
            },
            A::Starred { value } => ExprKind::Starred(self.boxed(value)),
            A::Name { id } => ExprKind::Name(id.clone()),
            A::Slice { lower, upper, step } => ExprKind::Slice {
                lower: lower.as_deref().map(|e| self.boxed(e)),
                upper: upper.as_deref().map(|e| self.boxed(e)),
                step: step.as_deref().map(|e| self.boxed(e)),
            },
        };
        Expr::new(kind, line)
    }

    /// Builds `<comp>(iter(outermost source))`.
    fn comprehension(
        &mut self,
        comp: Comp,
        elt: &ast::Expr,
        value: Option<&ast::Expr>,
        generators: &[ast::Comprehension],
        line: u32,
    ) -> Expr {
        let Some(outermost) = generators.first() else {
            // The front end never produces a comprehension without a loop.
            return self.expr(elt);
        };
        let source = self.expr(&outermost.iter);
        let id = self.scope_id();

        let elt = self.expr(elt);
        let update = match comp {
            Comp::List => StmtKind::ListAppend {
                list: COMPREHENSION_ACC.to_string(),
                value: elt,
            },
            Comp::Set => StmtKind::SetAdd {
                set: COMPREHENSION_ACC.to_string(),
                value: elt,
            },
            Comp::Dict => StmtKind::DictInsert {
                dict: COMPREHENSION_ACC.to_string(),
                key: elt,
                value: value.map_or_else(
                    || Expr::new(ExprKind::Constant(ir::Constant::None), line),
                    |v| self.expr(v),
                ),
            },
            Comp::Generator => StmtKind::Expr(Expr::new(ExprKind::Yield(Some(Box::new(elt))), line)),
        };

        let mut body = vec![Stmt::new(update, line)];
        for (i, clause) in generators.iter().enumerate().rev() {
            for test in clause.ifs.iter().rev() {
                let test = self.expr(test);
                body = vec![Stmt::new(
                    StmtKind::If {
                        test,
                        body,
                        orelse: Vec::new(),
                    },
                    line,
                )];
            }
            let iter = if i == 0 {
                Expr::name(COMPREHENSION_ARG, line)
            } else {
                self.expr(&clause.iter)
            };
            body = vec![Stmt::new(
                StmtKind::For {
                    target: self.expr(&clause.target),
                    iter,
                    body,
                    orelse: Vec::new(),
                },
                line,
            )];
        }

        let init = match comp {
            Comp::List => Some(ExprKind::List(Vec::new())),
            Comp::Set => Some(ExprKind::Set(Vec::new())),
            Comp::Dict => Some(ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            }),
            Comp::Generator => None,
        };
        if let Some(init) = init {
            body.insert(
                0,
                Stmt::new(
                    StmtKind::Assign {
                        targets: vec![Expr::name(COMPREHENSION_ACC, line)],
                        value: Expr::new(init, line),
                    },
                    line,
                ),
            );
            body.push(Stmt::new(
                StmtKind::Return(Some(Expr::name(COMPREHENSION_ACC, line))),
                line,
            ));
        }

        let function = FunctionDef {
            id,
            name: comp.name().to_string(),
            params: Parameters {
                args: vec![COMPREHENSION_ARG.to_string()],
                ..Parameters::default()
            },
            body,
            docstring: None,
            line,
            comprehension: true,
        };
        Expr::new(
            ExprKind::Call {
                func: Box::new(Expr::new(ExprKind::Function(Box::new(function)), line)),
                args: vec![Expr::new(ExprKind::Iter(Box::new(source)), line)],
                keywords: Vec::new(),
            },
            line,
        )
    }
}

/// Wraps `value` in decorator calls, innermost decorator last in the list.
fn decorate(decorators: Vec<Expr>, value: Expr) -> Expr {
    decorators.into_iter().rev().fold(value, |inner, decorator| {
        let line = decorator.line;
        Expr::new(
            ExprKind::Call {
                func: Box::new(decorator),
                args: vec![inner],
                keywords: Vec::new(),
            },
            line,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self as a, BinOperator};

    fn lower(body: Vec<a::Stmt>) -> ir::Module {
        desugar(&a::Module { body }, &CompileOptions::default())
    }

    #[test]
    fn test_assert_becomes_conditional_raise() {
        let module = lower(vec![
            a::StmtKind::Assert {
                test: a::name("ok").at(4),
                msg: Some(a::string("boom").at(4)),
            }
            .into(),
        ]);
        let StmtKind::If { test, body, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(
            test.kind,
            ExprKind::UnaryOp {
                op: ir::UnaryOperator::Not,
                ..
            }
        ));
        let StmtKind::Raise { exc: Some(exc), .. } = &body[0].kind else {
            panic!("expected raise");
        };
        let ExprKind::Call { func, args, .. } = &exc.kind else {
            panic!("expected call");
        };
        assert_eq!(func.kind, ExprKind::Name("AssertionError".into()));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_assert_dropped_when_optimizing() {
        let module = desugar(
            &a::Module {
                body: vec![
                    a::StmtKind::Assert {
                        test: a::name("ok"),
                        msg: None,
                    }
                    .into(),
                ],
            },
            &CompileOptions {
                optimize: 1,
                ..CompileOptions::default()
            },
        );
        assert!(module.body.is_empty());
    }

    #[test]
    fn test_decorators_wrap_definition() {
        let def = a::StmtKind::FunctionDef {
            name: "f".into(),
            args: a::Arguments::default(),
            body: vec![a::pass().at(3)],
            decorator_list: vec![a::name("outer").at(1), a::name("inner").at(2)],
        };
        let module = lower(vec![a::Stmt { line: 3, kind: def }]);
        let StmtKind::Assign { targets, value } = &module.body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(targets[0].kind, ExprKind::Name("f".into()));
        let ExprKind::Call { func, args, .. } = &value.kind else {
            panic!("expected outer call");
        };
        assert_eq!(func.kind, ExprKind::Name("outer".into()));
        let ExprKind::Call { func, args, .. } = &args[0].kind else {
            panic!("expected inner call");
        };
        assert_eq!(func.kind, ExprKind::Name("inner".into()));
        let ExprKind::Function(function) = &args[0].kind else {
            panic!("expected function");
        };
        assert_eq!(function.line, 1);
    }

    #[test]
    fn test_list_comprehension_shape() {
        let comp = a::list_comp(
            a::binop(a::name("x"), BinOperator::Mult, a::int(2)),
            vec![a::comp_for(a::name("x"), a::name("xs"), vec![a::name("x")])],
        );
        let module = lower(vec![a::expr_stmt(comp)]);
        let StmtKind::Expr(call) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { func, args, .. } = &call.kind else {
            panic!("expected call");
        };
        assert!(matches!(&args[0].kind, ExprKind::Iter(source)
            if source.kind == ExprKind::Name("xs".into())));
        let ExprKind::Function(function) = &func.kind else {
            panic!("expected function");
        };
        assert_eq!(function.name, "<listcomp>");
        assert!(function.comprehension);
        assert_eq!(function.params.args, vec![COMPREHENSION_ARG.to_string()]);
        assert_eq!(function.body.len(), 3);
        let StmtKind::For { iter, body, .. } = &function.body[1].kind else {
            panic!("expected loop");
        };
        assert_eq!(iter.kind, ExprKind::Name(COMPREHENSION_ARG.into()));
        let StmtKind::If { body, .. } = &body[0].kind else {
            panic!("expected filter");
        };
        assert!(matches!(body[0].kind, StmtKind::ListAppend { .. }));
        assert!(matches!(function.body[2].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_generator_expression_yields() {
        let genexp = a::generator_exp(
            a::name("x"),
            vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
        );
        let module = lower(vec![a::expr_stmt(genexp)]);
        let StmtKind::Expr(call) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { func, .. } = &call.kind else {
            panic!("expected call");
        };
        let ExprKind::Function(function) = &func.kind else {
            panic!("expected function");
        };
        assert_eq!(function.body.len(), 1);
        let StmtKind::For { body, .. } = &function.body[0].kind else {
            panic!("expected loop");
        };
        assert!(matches!(&body[0].kind, StmtKind::Expr(e) if matches!(e.kind, ExprKind::Yield(_))));
    }

    #[test]
    fn test_multi_item_with_nests() {
        let module = lower(vec![
            a::with(
                vec![(a::name("a"), Some(a::name("x"))), (a::name("b"), None)],
                vec![a::pass()],
            )
            .at(1),
        ]);
        let StmtKind::With { target, body, .. } = &module.body[0].kind else {
            panic!("expected with");
        };
        assert!(target.is_some());
        let StmtKind::With { target, body, .. } = &body[0].kind else {
            panic!("expected nested with");
        };
        assert!(target.is_none());
        assert_eq!(body[0].kind, StmtKind::Pass);
    }

    #[test]
    fn test_docstring_lifted() {
        let module = lower(vec![
            a::expr_stmt(a::string("module docs")).at(1),
            a::def("f", a::params(&[]), vec![a::expr_stmt(a::string("f docs")), a::pass()]),
        ]);
        assert_eq!(module.docstring.as_deref(), Some("module docs"));
        assert_eq!(module.body.len(), 1);
        let StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Function(function) = &value.kind else {
            panic!("expected function");
        };
        assert_eq!(function.docstring.as_deref(), Some("f docs"));
        assert_eq!(function.body, vec![Stmt::new(StmtKind::Pass, 0)]);
        assert_eq!(module.nscopes, 1);
    }

    #[test]
    fn test_scope_ids_unique() {
        let module = lower(vec![
            a::def(
                "f",
                a::params(&["a"]),
                vec![a::ret(Some(a::lambda(a::params(&[]), a::name("a"))))],
            ),
            a::class("C", vec![], vec![a::pass()]),
        ]);
        assert_eq!(module.nscopes, 3);
    }
}
