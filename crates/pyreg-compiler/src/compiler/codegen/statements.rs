// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Statement code generation.
//!
//! ## Statement Shapes
//!
//! | Statement | Key Operations | Notes |
//! |-----------|----------------|-------|
//! | `x = e` | `STORE_*`, `MOVE` | `MOVE` when a temporary lands in a fast local |
//! | `a, *b = e` | `UNPACK` | Values arrive in reverse register order |
//! | `if` | `POP_JUMP_IF_FALSE`, `JUMP` | |
//! | `while` | `JUMP`, `POP_JUMP_IF_TRUE` (back) | Test at the bottom |
//! | `for` | `GET_ITER`, `JUMP`, `FOR_ITER` (back) | Iterator lives in a temporary |
//! | `with` | `SETUP_WITH`, `END_WITH` | Manager, `__exit__`, link, exception |
//! | `try/except` | `JUMP_IF_NOT_EXC_MATCH`, `END_EXCEPT`, `END_FINALLY` | One table entry per `try` |
//! | `try/finally` | `CALL_FINALLY`, `END_FINALLY` | Finally body emitted once |
//! | `return` | `RETURN_VALUE` | Unwinds every open block |
//! | `break/continue` | `JUMP` | Unwinds up to the loop |
//! | `raise` | `RAISE` | `vm_exc_set_cause` for `from` |
//! | `import` | `IMPORT_NAME`, `IMPORT_FROM` | |
//!
//! ## Unwinding
//!
//! Leaving a block early runs its exit action, innermost first:
//!
//! ```text
//! for loop     CLEAR_FAST iter
//! finally      CALL_FINALLY link, finally_entry
//! handler      END_EXCEPT link
//! except as    clear the bound name
//! with         END_WITH manager
//! ```
//!
//! `return` stores its value in `link + 1` of every `finally` it crosses so
//! the finally body can hand it back.

use pyreg_macros::ensure;

use super::{Block, CodeGenerator};
use crate::compiler::assembler::ExceptionRegion;
use crate::compiler::code::ConstValue;
use crate::compiler::instruction::Operand::{Base, Const, Intrinsic, Lit, Name, Reg};
use crate::compiler::opcode::{Intrinsic as Helper, Opcode};
use crate::compiler::scope::ScopeKind;
use crate::desugar::ir::{Alias, ExceptHandler, Expr, Stmt, StmtKind};
use crate::error::{CompileError, Result};

impl<'s> CodeGenerator<'s> {
    pub(super) fn stmts(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let depth = self.next_register;
        self.line = stmt.line;

        match &stmt.kind {
            StmtKind::Return(value) => self.return_(value.as_ref(), stmt.line)?,
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assign { targets, value } => self.assign(targets, value)?,
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_(stmt.line, target, iter, body, orelse)?,
            StmtKind::While { test, body, orelse } => self.while_(stmt.line, test, body, orelse)?,
            StmtKind::If { test, body, orelse } => self.if_(test, body, orelse)?,
            StmtKind::With {
                context,
                target,
                body,
            } => self.with(context, target.as_ref(), body)?,
            StmtKind::Raise { exc, cause } => self.raise(exc.as_ref(), cause.as_ref())?,
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if finalbody.is_empty() {
                    self.try_except(body, handlers, orelse)?;
                } else {
                    self.try_finally(body, handlers, orelse, finalbody)?;
                }
            }
            StmtKind::Import(names) => self.import(names)?,
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => self.import_from(module.as_deref(), names, *level)?,
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => {}
            StmtKind::Expr(value) => self.expr_stmt(value)?,
            StmtKind::Break => self.break_(stmt.line)?,
            StmtKind::Continue => self.continue_(stmt.line)?,
            StmtKind::ListAppend { list, value } => {
                let reg = self.accumulator_reg(list)?;
                self.visit_expr(value)?;
                self.emit(Opcode::ListAppend, vec![Reg(reg)]);
            }
            StmtKind::SetAdd { set, value } => {
                let reg = self.accumulator_reg(set)?;
                self.visit_expr(value)?;
                self.emit(Opcode::SetAdd, vec![Reg(reg)]);
            }
            StmtKind::DictInsert { dict, key, value } => {
                let reg = self.accumulator_reg(dict)?;
                let key = self.any_reg(key)?;
                self.visit_expr(value)?;
                self.emit(Opcode::StoreSubscr, vec![Reg(reg), Reg(key)]);
                self.clear_reg(key);
            }
        }

        ensure!(
            self.next_register == depth,
            "register depth {} != {} after statement on line {} in {}",
            self.next_register,
            depth,
            stmt.line,
            self.display_name()
        );
        Ok(())
    }

    /// Comprehension accumulators are always fast locals.
    fn accumulator_reg(&self, name: &str) -> Result<u32> {
        self.fast_reg(name).ok_or_else(|| {
            CompileError::internal(format!(
                "accumulator '{}' is not a local of {}",
                name,
                self.display_name()
            ))
        })
    }

    fn assign(&mut self, targets: &[Expr], value: &Expr) -> Result<()> {
        if let [target] = targets {
            return self.assign_expr(target, value);
        }
        let reg = self.any_reg(value)?;
        let last = targets.len().saturating_sub(1);
        for (i, target) in targets.iter().enumerate() {
            self.assign_reg(target, reg, i != last)?;
        }
        Ok(())
    }

    fn expr_stmt(&mut self, value: &Expr) -> Result<()> {
        if self.options.interactive && self.scope.kind == ScopeKind::Module {
            self.visit_expr(value)?;
            self.emit(Opcode::CallIntrinsic1, vec![Intrinsic(Helper::Print)]);
            self.emit(Opcode::ClearAcc, vec![]);
            return Ok(());
        }
        if value.is_constant() {
            return Ok(());
        }
        self.visit_expr(value)?;
        self.emit(Opcode::ClearAcc, vec![]);
        Ok(())
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    fn if_(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<()> {
        let next = self.new_label();
        self.visit_expr(test)?;
        self.emit_jump(Opcode::PopJumpIfFalse, vec![], next);
        self.stmts(body)?;
        if orelse.is_empty() {
            self.bind(next);
        } else {
            let end = self.new_label();
            self.emit_jump(Opcode::Jump, vec![], end);
            self.bind(next);
            self.stmts(orelse)?;
            self.bind(end);
        }
        Ok(())
    }

    fn while_(&mut self, line: u32, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<()> {
        let top = self.new_label();
        let next = self.new_label();
        let break_label = self.new_label();

        self.emit_jump(Opcode::Jump, vec![], next);
        self.bind_target(top);
        self.with_block(
            Block::WhileLoop {
                break_label,
                continue_label: next,
            },
            |g| g.stmts(body),
        )?;
        self.bind(next);
        self.line = line;
        self.visit_expr(test)?;
        self.emit_jump(Opcode::PopJumpIfTrue, vec![], top);
        self.stmts(orelse)?;
        self.bind(break_label);
        Ok(())
    }

    fn for_(
        &mut self,
        line: u32,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<()> {
        let top = self.new_label();
        let next = self.new_label();
        let break_label = self.new_label();

        self.visit_expr(iter)?;
        let reg = self.reserve(1);
        self.emit(Opcode::GetIter, vec![Reg(reg)]);
        self.emit_jump(Opcode::Jump, vec![], next);
        self.bind_target(top);
        self.with_block(
            Block::ForLoop {
                reg,
                break_label,
                continue_label: next,
            },
            |g| {
                g.assign_acc(target)?;
                g.stmts(body)
            },
        )?;
        self.bind(next);
        self.line = line;
        // Falls through with the iterator cleared once it is exhausted.
        self.emit_jump(Opcode::ForIter, vec![Reg(reg)], top);
        self.free_reg(reg);
        self.stmts(orelse)?;
        self.bind(break_label);
        Ok(())
    }

    fn return_(&mut self, value: Option<&Expr>, line: u32) -> Result<()> {
        if self.scope.kind != ScopeKind::Function {
            return Err(CompileError::syntax("'return' outside function", line));
        }
        match value {
            Some(value) => self.visit_expr(value)?,
            None => self.load_const(ConstValue::None),
        }
        for block in self.blocks.clone().iter().rev() {
            if let Block::Finally { reg, .. } = block {
                self.emit(Opcode::StoreFast, vec![Reg(reg + 1)]);
            }
            self.unwind(block, true)?;
        }
        self.emit(Opcode::ReturnValue, vec![]);
        Ok(())
    }

    fn break_(&mut self, line: u32) -> Result<()> {
        for block in self.blocks.clone().iter().rev() {
            self.unwind(block, false)?;
            match block {
                Block::WhileLoop { break_label, .. } | Block::ForLoop { break_label, .. } => {
                    self.emit_jump(Opcode::Jump, vec![], *break_label);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(CompileError::syntax("'break' outside loop", line))
    }

    fn continue_(&mut self, line: u32) -> Result<()> {
        for block in self.blocks.clone().iter().rev() {
            match block {
                Block::WhileLoop { continue_label, .. } | Block::ForLoop { continue_label, .. } => {
                    self.emit_jump(Opcode::Jump, vec![], *continue_label);
                    return Ok(());
                }
                _ => self.unwind(block, false)?,
            }
        }
        Err(CompileError::syntax("'continue' not properly in loop", line))
    }

    /// Emits the exit action of `block`. With `keep_acc` the accumulator
    /// survives the action.
    fn unwind(&mut self, block: &Block, keep_acc: bool) -> Result<()> {
        match block {
            Block::WhileLoop { .. } => {}
            Block::ForLoop { reg, .. } => self.emit(Opcode::ClearFast, vec![Reg(*reg)]),
            Block::Finally { reg, label } => {
                self.emit_jump(Opcode::CallFinally, vec![Reg(*reg)], *label)
            }
            Block::Handler { reg } => self.emit(Opcode::EndExcept, vec![Reg(*reg)]),
            Block::ExceptAs { name } => {
                if !keep_acc || self.fast_reg(name).is_some() {
                    return self.clear_name(name);
                }
                // Clearing a non-fast name goes through the accumulator.
                let tmp = self.reserve(1);
                self.emit(Opcode::StoreFast, vec![Reg(tmp)]);
                self.clear_name(name)?;
                self.emit(Opcode::LoadFast, vec![Reg(tmp)]);
                self.clear_reg(tmp);
            }
            Block::With { reg } => self.emit(Opcode::EndWith, vec![Reg(*reg)]),
        }
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>) -> Result<()> {
        if let Some(cause) = cause {
            let base = self.next_register;
            self.expr_to_reg(exc, base)?;
            self.expr_to_reg(Some(cause), base + 1)?;
            self.emit(
                Opcode::CallIntrinsicN,
                vec![Intrinsic(Helper::ExcSetCause), Base(base), Lit(2)],
            );
            self.free_regs_above(base);
        } else if let Some(exc) = exc {
            self.visit_expr(exc)?;
        }
        self.emit(Opcode::Raise, vec![]);
        Ok(())
    }

    /// Protected body, then the handler clauses at one table entry. Each
    /// clause tests the pending exception in `link + 1`; no match re-raises.
    fn try_except(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
    ) -> Result<()> {
        let orelse_label = self.new_label();
        let end = self.new_label();

        let start = self.mark();
        self.stmts(body)?;
        self.emit_jump(Opcode::Jump, vec![], orelse_label);

        let link = self.reserve(2);
        let handler = self.new_label();
        self.with_block(Block::Handler { reg: link }, |g| {
            g.bind_target(handler);
            for (i, clause) in handlers.iter().enumerate() {
                if clause.type_.is_none() && i + 1 < handlers.len() {
                    return Err(CompileError::syntax(
                        "default 'except:' must be last",
                        clause.line,
                    ));
                }
                g.line = clause.line;
                let next = g.new_label();
                if let Some(type_) = &clause.type_ {
                    g.visit_expr(type_)?;
                    g.emit_jump(Opcode::JumpIfNotExcMatch, vec![Reg(link)], next);
                }
                match &clause.name {
                    Some(name) => {
                        g.emit(Opcode::LoadFast, vec![Reg(link + 1)]);
                        g.except_as(name, &clause.body)?;
                    }
                    None => g.stmts(&clause.body)?,
                }
                g.emit(Opcode::EndExcept, vec![Reg(link)]);
                g.emit_jump(Opcode::Jump, vec![], end);
                g.bind(next);
            }
            g.emit(Opcode::EndFinally, vec![Reg(link)]);
            Ok(())
        })?;
        let handler_end = self.mark();
        self.regions.push(ExceptionRegion {
            start,
            handler,
            handler_end,
            link_reg: link,
        });
        self.free_regs_above(link);

        self.bind(orelse_label);
        self.stmts(orelse)?;
        self.bind(end);
        Ok(())
    }

    /// Binds the exception to `name` and guarantees the name is cleared
    /// however the clause body exits.
    fn except_as(&mut self, name: &str, body: &[Stmt]) -> Result<()> {
        self.store_name(name)?;
        let start = self.mark();
        self.with_block(
            Block::ExceptAs {
                name: name.to_string(),
            },
            |g| g.stmts(body),
        )?;

        let handler = self.new_label();
        self.bind_target(handler);
        let link = self.reserve(2);
        self.clear_name(name)?;
        self.emit(Opcode::EndFinally, vec![Reg(link)]);
        let handler_end = self.mark();
        self.regions.push(ExceptionRegion {
            start,
            handler,
            handler_end,
            link_reg: link,
        });
        self.free_regs_above(link);
        Ok(())
    }

    /// The finally body is emitted once: normal completion falls into it
    /// with an empty link, early exits reach it via `CALL_FINALLY`, and
    /// exceptions via the table entry.
    fn try_finally(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<()> {
        let label = self.new_label();
        let reg = self.next_register;

        let start = self.mark();
        self.with_block(Block::Finally { reg, label }, |g| {
            if handlers.is_empty() {
                g.stmts(body)?;
                g.stmts(orelse)
            } else {
                g.try_except(body, handlers, orelse)
            }
        })?;

        let link = self.reserve(2);
        ensure!(
            link == reg,
            "finally link register {} != {} in {}",
            link,
            reg,
            self.display_name()
        );
        let handler = self.new_label();
        self.with_block(Block::Handler { reg: link }, |g| {
            g.bind_target(handler);
            g.bind(label);
            g.stmts(finalbody)?;
            g.emit(Opcode::EndFinally, vec![Reg(link)]);
            Ok(())
        })?;
        let handler_end = self.mark();
        self.regions.push(ExceptionRegion {
            start,
            handler,
            handler_end,
            link_reg: link,
        });
        self.free_regs_above(link);
        Ok(())
    }

    /// Manager in `reg`, its `__exit__` in `reg + 1`, link and exception in
    /// `reg + 2` and `reg + 3`.
    fn with(&mut self, context: &Expr, target: Option<&Expr>, body: &[Stmt]) -> Result<()> {
        self.visit_expr(context)?;
        let reg = self.reserve(2);
        self.emit(Opcode::SetupWith, vec![Reg(reg)]);

        let start = self.mark();
        self.with_block(Block::With { reg }, |g| {
            match target {
                Some(target) => g.assign_acc(target)?,
                None => g.emit(Opcode::ClearAcc, vec![]),
            }
            g.stmts(body)
        })?;

        let handler = self.new_label();
        self.bind_target(handler);
        let link = self.reserve(2);
        self.emit(Opcode::EndWith, vec![Reg(reg)]);
        let handler_end = self.mark();
        self.regions.push(ExceptionRegion {
            start,
            handler,
            handler_end,
            link_reg: link,
        });
        self.free_regs_above(reg);
        Ok(())
    }

    // ========================================================================
    // Imports
    // ========================================================================

    /// `import a.b.c` binds `a`; `import a.b.c as d` walks the attributes
    /// and binds the innermost module to `d`.
    fn import(&mut self, names: &[Alias]) -> Result<()> {
        for alias in names {
            let spec = ConstValue::Tuple(vec![
                ConstValue::str(alias.name.as_str()),
                ConstValue::None,
                ConstValue::Int(0.into()),
            ]);
            let index = self.consts.add(spec);
            self.emit(Opcode::ImportName, vec![Const(index)]);

            match &alias.asname {
                Some(asname) => {
                    let mut parts = alias.name.split('.').skip(1).peekable();
                    if parts.peek().is_some() {
                        let reg = self.reserve(1);
                        for part in parts {
                            let name = self.names.add(part);
                            self.emit(Opcode::StoreFast, vec![Reg(reg)]);
                            self.emit(Opcode::ImportFrom, vec![Reg(reg), Name(name)]);
                        }
                        self.clear_reg(reg);
                    }
                    self.store_name(asname)?;
                }
                None => {
                    let top = alias.name.split('.').next().unwrap_or(&alias.name);
                    self.store_name(top)?;
                }
            }
        }
        Ok(())
    }

    fn import_from(&mut self, module: Option<&str>, names: &[Alias], level: u32) -> Result<()> {
        let fromlist = names
            .iter()
            .map(|alias| ConstValue::str(alias.name.as_str()))
            .collect();
        let spec = ConstValue::Tuple(vec![
            ConstValue::str(module.unwrap_or("")),
            ConstValue::Tuple(fromlist),
            ConstValue::Int(level.into()),
        ]);
        let index = self.consts.add(spec);
        self.emit(Opcode::ImportName, vec![Const(index)]);

        let reg = self.reserve(1);
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        for alias in names {
            if alias.name == "*" {
                self.emit(Opcode::ImportStar, vec![Reg(reg)]);
                continue;
            }
            let name = self.names.add(&alias.name);
            self.emit(Opcode::ImportFrom, vec![Reg(reg), Name(name)]);
            self.store_name(alias.asname.as_ref().unwrap_or(&alias.name))?;
        }
        self.clear_reg(reg);
        Ok(())
    }
}
