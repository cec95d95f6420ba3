// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Expression code generation.
//!
//! [`CodeGenerator::visit_expr`] leaves the value in the accumulator.
//! [`CodeGenerator::any_reg`] and [`CodeGenerator::expr_to_reg`] park it in a
//! register when an enclosing construct needs it to survive.

use pyreg_macros::ensure;
use tracing::warn;

use super::{CodeGenerator, FRAME_EXTRA};
use crate::compiler::code::ConstValue;
use crate::compiler::opcode::{Intrinsic, Opcode};
use crate::compiler::scope::ScopeKind;
use crate::desugar::ir::{
    BinOperator, BoolOperator, ClassDef, CmpOperator, Constant, Expr, ExprKind, FunctionDef,
    Keyword, UnaryOperator,
};
use crate::error::{CompileError, Result};

use crate::compiler::instruction::Operand::{self, Base, Const, Imm16, Lit, Name, Reg};

/// `COMPARE_OP` argument values understood by the VM.
const CMP_LT: u32 = 0;
const CMP_LE: u32 = 1;
const CMP_EQ: u32 = 2;
const CMP_NE: u32 = 3;
const CMP_GT: u32 = 4;
const CMP_GE: u32 = 5;

/// Largest argument count encodable in `CALL_FUNCTION`'s count byte.
const MAX_DIRECT_ARGS: usize = 255;

/// A call argument or display element.
#[derive(Debug, Clone, Copy)]
pub(super) enum Arg<'e> {
    /// Source expression
    Expr(&'e Expr),
    /// Function made from the code object at this constant index
    Function(u32),
    /// Constant at this index
    Const(u32),
}

impl<'e> Arg<'e> {
    fn starred(&self) -> Option<&'e Expr> {
        match self {
            Arg::Expr(Expr {
                kind: ExprKind::Starred(value),
                ..
            }) => Some(value),
            _ => None,
        }
    }
}

/// What a call invokes.
#[derive(Debug, Clone, Copy)]
pub(super) enum Callee<'e> {
    /// Source expression
    Expr(&'e Expr),
    /// The class builder
    BuildClass,
}

/// Sequence displays built by [`CodeGenerator::starunpack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqKind {
    Tuple,
    List,
    Set,
}

impl<'s> CodeGenerator<'s> {
    // ========================================================================
    // Accumulator and registers
    // ========================================================================

    /// Evaluates `expr` into the accumulator.
    pub(super) fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        let line = self.line;
        let depth = self.next_register;
        self.line = expr.line;
        self.expr(expr)?;
        ensure!(
            self.next_register == depth,
            "register depth {} != {} after expression on line {} in {}",
            self.next_register,
            depth,
            expr.line,
            self.display_name()
        );
        self.line = line;
        Ok(())
    }

    /// Register holding the value of `expr`: its own register for a fast
    /// local, otherwise a fresh temporary.
    pub(super) fn any_reg(&mut self, expr: &Expr) -> Result<u32> {
        if let Some(reg) = self.local_reg(expr) {
            return Ok(reg);
        }
        if let ExprKind::Iter(inner) = &expr.kind {
            self.visit_expr(inner)?;
            let reg = self.reserve(1);
            self.emit(Opcode::GetIter, vec![Reg(reg)]);
            return Ok(reg);
        }
        self.visit_expr(expr)?;
        let reg = self.reserve(1);
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        Ok(reg)
    }

    /// Evaluates `expr` (None when absent) into the temporary `reg`,
    /// extending the allocation to cover it.
    pub(super) fn expr_to_reg(&mut self, expr: Option<&Expr>, reg: u32) -> Result<()> {
        debug_assert!(self.is_temporary(reg));
        match expr {
            None => {
                let none = self.const_none();
                self.emit(Opcode::LoadConst, vec![Const(none)]);
                self.emit(Opcode::StoreFast, vec![Reg(reg)]);
            }
            Some(expr) => {
                if let Some(src) = self.local_reg(expr) {
                    self.emit(Opcode::Copy, vec![Reg(reg), Reg(src)]);
                } else if let ExprKind::Iter(inner) = &expr.kind {
                    self.visit_expr(inner)?;
                    self.emit(Opcode::GetIter, vec![Reg(reg)]);
                } else {
                    self.visit_expr(expr)?;
                    self.emit(Opcode::StoreFast, vec![Reg(reg)]);
                }
            }
        }
        if reg >= self.next_register {
            self.reserve(reg - self.next_register + 1);
        }
        Ok(())
    }

    /// Register of `expr` when it names a fast local.
    fn local_reg(&self, expr: &Expr) -> Option<u32> {
        match &expr.kind {
            ExprKind::Name(name) => self.fast_reg(name),
            _ => None,
        }
    }

    fn arg_to_reg(&mut self, arg: &Arg<'_>, reg: u32) -> Result<()> {
        match arg {
            Arg::Expr(expr) => return self.expr_to_reg(Some(expr), reg),
            Arg::Function(code) => self.emit(Opcode::MakeFunction, vec![Const(*code)]),
            Arg::Const(index) => self.emit(Opcode::LoadConst, vec![Const(*index)]),
        }
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        if reg >= self.next_register {
            self.reserve(reg - self.next_register + 1);
        }
        Ok(())
    }

    fn arg_to_acc(&mut self, arg: &Arg<'_>) -> Result<()> {
        match arg {
            Arg::Expr(expr) => self.visit_expr(expr)?,
            Arg::Function(code) => self.emit(Opcode::MakeFunction, vec![Const(*code)]),
            Arg::Const(index) => self.emit(Opcode::LoadConst, vec![Const(*index)]),
        }
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => self.bool_op(*op, values)?,
            ExprKind::NamedExpr { target, value } => {
                let reg = self.any_reg(value)?;
                self.assign_name_reg(target, reg, true)?;
                self.emit(Opcode::LoadFast, vec![Reg(reg)]);
                self.clear_reg(reg);
            }
            ExprKind::BinOp { left, op, right } => {
                let reg = self.any_reg(left)?;
                self.visit_expr(right)?;
                self.emit(binary_opcode(*op), vec![Reg(reg)]);
                self.clear_reg(reg);
            }
            ExprKind::UnaryOp { op, operand } => {
                self.visit_expr(operand)?;
                self.emit(unary_opcode(*op), vec![]);
            }
            ExprKind::IfExp { test, body, orelse } => {
                let next = self.new_label();
                let end = self.new_label();
                self.visit_expr(test)?;
                self.emit_jump(Opcode::PopJumpIfFalse, vec![], next);
                self.visit_expr(body)?;
                self.emit_jump(Opcode::Jump, vec![], end);
                self.bind(next);
                self.visit_expr(orelse)?;
                self.bind(end);
            }
            ExprKind::Dict { keys, values } => self.dict(keys, values)?,
            ExprKind::Set(elts) => self.display(elts, SeqKind::Set)?,
            ExprKind::List(elts) => self.display(elts, SeqKind::List)?,
            ExprKind::Tuple(elts) => self.display(elts, SeqKind::Tuple)?,
            ExprKind::Yield(value) => {
                self.check_in_function("'yield' outside function", expr.line)?;
                match value {
                    Some(value) => self.visit_expr(value)?,
                    None => self.load_const(ConstValue::None),
                }
                self.emit(Opcode::YieldValue, vec![]);
            }
            ExprKind::YieldFrom(value) => {
                self.check_in_function("'yield from' outside function", expr.line)?;
                self.visit_expr(value)?;
                let reg = self.reserve(1);
                self.emit(Opcode::GetYieldFromIter, vec![Reg(reg)]);
                self.load_const(ConstValue::None);
                self.emit(Opcode::YieldFrom, vec![Reg(reg)]);
                self.clear_reg(reg);
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(left, ops, comparators)?,
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let args: Vec<Arg<'_>> = args.iter().map(Arg::Expr).collect();
                self.call(Callee::Expr(func), &args, keywords)?;
            }
            ExprKind::Constant(constant) => self.load_const(ConstValue::from(constant)),
            ExprKind::Attribute { value, attr } => {
                let reg = self.any_reg(value)?;
                let name = self.name_index(attr);
                let meta = self.fresh_metaslot();
                self.emit(Opcode::LoadAttr, vec![Reg(reg), Name(name), Lit(meta)]);
                self.clear_reg(reg);
            }
            ExprKind::Subscript { value, slice } => {
                let reg = self.any_reg(value)?;
                self.visit_expr(slice)?;
                self.emit(Opcode::BinarySubscr, vec![Reg(reg)]);
                self.clear_reg(reg);
            }
            ExprKind::Starred(_) => {
                return Err(CompileError::syntax(
                    "can't use starred expression here",
                    expr.line,
                ));
            }
            ExprKind::Name(name) => self.load_name(name)?,
            ExprKind::Slice { lower, upper, step } => {
                let base = self.next_register;
                self.expr_to_reg(lower.as_deref(), base)?;
                self.expr_to_reg(upper.as_deref(), base + 1)?;
                self.expr_to_reg(step.as_deref(), base + 2)?;
                self.emit(Opcode::BuildSlice, vec![Reg(base)]);
                self.free_regs_above(base);
            }
            ExprKind::Function(def) => self.function(def)?,
            ExprKind::Class(def) => self.class(def)?,
            ExprKind::Iter(inner) => {
                self.visit_expr(inner)?;
                let reg = self.reserve(1);
                self.emit(Opcode::GetIter, vec![Reg(reg)]);
                self.emit(Opcode::LoadFast, vec![Reg(reg)]);
                self.clear_reg(reg);
            }
        }
        Ok(())
    }

    fn check_in_function(&self, message: &str, line: u32) -> Result<()> {
        if self.scope.kind == ScopeKind::Function {
            Ok(())
        } else {
            Err(CompileError::syntax(message, line))
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn bool_op(&mut self, op: BoolOperator, values: &[Expr]) -> Result<()> {
        let jump = match op {
            BoolOperator::And => Opcode::JumpIfFalse,
            BoolOperator::Or => Opcode::JumpIfTrue,
        };
        let end = self.new_label();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.emit_jump(jump, vec![], end);
                self.emit(Opcode::ClearAcc, vec![]);
            }
            self.visit_expr(value)?;
        }
        self.bind(end);
        Ok(())
    }

    /// `a < b < c` keeps at most two operands in registers. A failed link
    /// jumps to the end with the falsy result in the accumulator.
    fn compare(&mut self, left: &Expr, ops: &[CmpOperator], comparators: &[Expr]) -> Result<()> {
        self.check_identity_literals(left, ops, comparators);

        let base = self.next_register;
        let end = self.new_label();
        let mut lhs = self.any_reg(left)?;
        let mut peak = self.next_register;
        let last = ops.len().saturating_sub(1);
        for (i, (op, right)) in ops.iter().zip(comparators).enumerate() {
            if i < last {
                let rhs = self.any_reg(right)?;
                peak = peak.max(self.next_register);
                self.emit(Opcode::LoadFast, vec![Reg(rhs)]);
                self.emit_compare(*op, lhs);
                self.emit_jump(Opcode::JumpIfFalse, vec![], end);
                self.emit(Opcode::ClearAcc, vec![]);
                lhs = self.shuffle_down(lhs, rhs);
            } else {
                self.visit_expr(right)?;
                self.emit_compare(*op, lhs);
            }
        }
        self.bind(end);
        self.next_register = peak.max(self.next_register);
        self.clear_regs_above(base);
        Ok(())
    }

    /// Keeps the right operand of a chain link as the next left operand,
    /// at the lowest register that is free.
    fn shuffle_down(&mut self, lhs: u32, rhs: u32) -> u32 {
        if !self.is_temporary(lhs) {
            rhs
        } else if !self.is_temporary(rhs) {
            self.clear_reg(lhs);
            rhs
        } else {
            self.emit(Opcode::Move, vec![Reg(lhs), Reg(rhs)]);
            self.free_reg(rhs);
            lhs
        }
    }

    fn emit_compare(&mut self, op: CmpOperator, reg: u32) {
        let compare = |arg: u32| (Opcode::CompareOp, vec![Lit(arg), Reg(reg)]);
        let (opcode, operands) = match op {
            CmpOperator::Eq => compare(CMP_EQ),
            CmpOperator::NotEq => compare(CMP_NE),
            CmpOperator::Lt => compare(CMP_LT),
            CmpOperator::LtE => compare(CMP_LE),
            CmpOperator::Gt => compare(CMP_GT),
            CmpOperator::GtE => compare(CMP_GE),
            CmpOperator::Is | CmpOperator::IsNot => (Opcode::IsOp, vec![Reg(reg)]),
            CmpOperator::In | CmpOperator::NotIn => (Opcode::ContainsOp, vec![Reg(reg)]),
        };
        self.emit(opcode, operands);
        if matches!(op, CmpOperator::IsNot | CmpOperator::NotIn) {
            self.emit(Opcode::UnaryNotFast, vec![]);
        }
    }

    /// Warns about `x is 1`; only None, booleans and `...` are singletons.
    fn check_identity_literals(&self, left: &Expr, ops: &[CmpOperator], comparators: &[Expr]) {
        fn is_singleton_or_expr(expr: &Expr) -> bool {
            match &expr.kind {
                ExprKind::Constant(constant) => matches!(
                    constant,
                    Constant::None | Constant::Bool(_) | Constant::Ellipsis
                ),
                _ => true,
            }
        }

        let mut left_ok = is_singleton_or_expr(left);
        for (op, right) in ops.iter().zip(comparators) {
            let right_ok = is_singleton_or_expr(right);
            if matches!(op, CmpOperator::Is | CmpOperator::IsNot) && !(left_ok && right_ok) {
                let suggestion = if *op == CmpOperator::Is { "==" } else { "!=" };
                warn!(
                    line = self.line,
                    "identity comparison with a literal; did you mean \"{}\"?", suggestion
                );
                return;
            }
            left_ok = right_ok;
        }
    }

    // ========================================================================
    // Displays
    // ========================================================================

    fn display(&mut self, elts: &[Expr], kind: SeqKind) -> Result<()> {
        let args: Vec<Arg<'_>> = elts.iter().map(Arg::Expr).collect();
        self.starunpack(&args, kind)
    }

    /// Builds a tuple, list or set. Leading plain elements go straight into
    /// consecutive registers; from the first starred element on, the value
    /// is grown in place.
    fn starunpack(&mut self, elts: &[Arg<'_>], kind: SeqKind) -> Result<()> {
        if elts.is_empty() && kind == SeqKind::Tuple {
            self.load_const(ConstValue::Tuple(Vec::new()));
            return Ok(());
        }
        let (build, extend, add) = match kind {
            SeqKind::Tuple | SeqKind::List => {
                (Opcode::BuildList, Opcode::ListExtend, Opcode::ListAppend)
            }
            SeqKind::Set => (Opcode::BuildSet, Opcode::SetUpdate, Opcode::SetAdd),
        };

        let base = self.next_register;
        let mut seen_star = false;
        for (i, elt) in elts.iter().enumerate() {
            if let Some(value) = elt.starred() {
                if !seen_star {
                    self.emit(build, vec![Reg(base), Lit(i as u32)]);
                    self.free_regs_above(base);
                    self.reserve(1);
                    self.emit(Opcode::StoreFast, vec![Reg(base)]);
                    seen_star = true;
                }
                self.visit_expr(value)?;
                self.emit(extend, vec![Reg(base)]);
            } else if seen_star {
                self.arg_to_acc(elt)?;
                self.emit(add, vec![Reg(base)]);
            } else {
                self.arg_to_reg(elt, base + i as u32)?;
            }
        }

        if seen_star {
            self.emit(Opcode::LoadFast, vec![Reg(base)]);
            self.clear_reg(base);
            if kind == SeqKind::Tuple {
                self.emit(
                    Opcode::CallIntrinsic1,
                    vec![Operand::Intrinsic(Intrinsic::ListToTuple)],
                );
            }
        } else {
            let build = if kind == SeqKind::Tuple {
                Opcode::BuildTuple
            } else {
                build
            };
            self.emit(build, vec![Reg(base), Lit(elts.len() as u32)]);
            self.free_regs_above(base);
        }
        Ok(())
    }

    fn dict(&mut self, keys: &[Option<Expr>], values: &[Expr]) -> Result<()> {
        self.emit(Opcode::BuildMap, vec![Lit(values.len() as u32)]);
        if values.is_empty() {
            return Ok(());
        }
        let dict = self.reserve(1);
        self.emit(Opcode::StoreFast, vec![Reg(dict)]);
        for (key, value) in keys.iter().zip(values) {
            match key {
                Some(key) => {
                    let key = self.any_reg(key)?;
                    self.visit_expr(value)?;
                    self.emit(Opcode::StoreSubscr, vec![Reg(dict), Reg(key)]);
                    self.clear_reg(key);
                }
                None => {
                    self.visit_expr(value)?;
                    self.emit(Opcode::DictUpdate, vec![Reg(dict)]);
                }
            }
        }
        self.emit(Opcode::LoadFast, vec![Reg(dict)]);
        self.clear_reg(dict);
        Ok(())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Calls `callee`, laying the arguments out as the callee's frame.
    pub(super) fn call(
        &mut self,
        callee: Callee<'_>,
        args: &[Arg<'_>],
        keywords: &[Keyword],
    ) -> Result<()> {
        if let Callee::Expr(func) = callee {
            self.check_callable(func);
        }
        self.validate_keywords(keywords)?;

        let has_starred = args.iter().any(|arg| arg.starred().is_some());
        let has_varkeywords = keywords.iter().any(|kw| kw.arg.is_none());
        if args.len() > MAX_DIRECT_ARGS
            || keywords.len() > MAX_DIRECT_ARGS
            || has_starred
            || has_varkeywords
        {
            return self.call_ex(callee, args, keywords);
        }

        if let Callee::Expr(Expr {
            kind: ExprKind::Attribute { value, attr },
            ..
        }) = callee
        {
            if keywords.is_empty() && args.len() < MAX_DIRECT_ARGS {
                return self.method_call(value, attr, args);
            }
        }

        let nargs = args.len() as u32;
        let nkwds = keywords.len() as u32;
        let r = self.next_register;
        let mut base = r + FRAME_EXTRA;
        if nkwds > 0 {
            base += nkwds + 1;
        }

        self.callee_to_reg(callee, base - 1)?;
        for (i, arg) in args.iter().enumerate() {
            self.arg_to_reg(arg, base + i as u32)?;
        }
        for (i, keyword) in keywords.iter().enumerate() {
            self.expr_to_reg(Some(&keyword.value), r + i as u32)?;
        }
        if nkwds > 0 {
            let kwnames = keywords
                .iter()
                .filter_map(|kw| kw.arg.as_deref())
                .map(ConstValue::str)
                .collect();
            let index = self.consts.add(ConstValue::Tuple(kwnames));
            self.emit(Opcode::LoadConst, vec![Const(index)]);
            self.emit(Opcode::StoreFast, vec![Reg(r + nkwds)]);
        }

        self.emit(Opcode::CallFunction, vec![Base(base), Imm16(nargs | (nkwds << 8))]);
        self.free_regs_above(r);
        Ok(())
    }

    /// `o.m(args)`: the method and `self` land in `base-1` and `base`.
    fn method_call(&mut self, owner: &Expr, attr: &str, args: &[Arg<'_>]) -> Result<()> {
        self.visit_expr(owner)?;
        let base = self.reserve(FRAME_EXTRA + 1) + FRAME_EXTRA;
        let name = self.name_index(attr);
        let meta = self.fresh_metaslot();
        self.emit(Opcode::LoadMethod, vec![Reg(base - 1), Name(name), Lit(meta)]);
        for (i, arg) in args.iter().enumerate() {
            self.arg_to_reg(arg, base + 1 + i as u32)?;
        }
        self.emit(
            Opcode::CallMethod,
            vec![Base(base), Imm16(args.len() as u32 + 1)],
        );
        self.free_regs_above(base - FRAME_EXTRA);
        Ok(())
    }

    /// Argument tuple in `base-6`, keyword dict in `base-5`.
    fn call_ex(&mut self, callee: Callee<'_>, args: &[Arg<'_>], keywords: &[Keyword]) -> Result<()> {
        let reg = self.reserve(FRAME_EXTRA + 2);
        let base = reg + FRAME_EXTRA + 2;
        self.callee_to_reg(callee, base - 1)?;
        self.varargs_to_reg(args, reg)?;
        self.kwargs_to_reg(keywords, reg + 1)?;
        self.emit(Opcode::CallFunctionEx, vec![Base(base)]);
        self.free_regs_above(reg);
        Ok(())
    }

    fn callee_to_reg(&mut self, callee: Callee<'_>, reg: u32) -> Result<()> {
        match callee {
            Callee::Expr(func) => self.expr_to_reg(Some(func), reg),
            Callee::BuildClass => {
                self.emit(Opcode::LoadBuildClass, vec![]);
                self.emit(Opcode::StoreFast, vec![Reg(reg)]);
                if reg >= self.next_register {
                    self.reserve(reg - self.next_register + 1);
                }
                Ok(())
            }
        }
    }

    fn varargs_to_reg(&mut self, args: &[Arg<'_>], reg: u32) -> Result<()> {
        if let [arg] = args {
            if let Some(value) = arg.starred() {
                return self.expr_to_reg(Some(value), reg);
            }
        }
        self.starunpack(args, SeqKind::Tuple)?;
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        Ok(())
    }

    fn kwargs_to_reg(&mut self, keywords: &[Keyword], reg: u32) -> Result<()> {
        match keywords {
            [] => return Ok(()),
            [Keyword { arg: None, value }] => return self.expr_to_reg(Some(value), reg),
            _ => {}
        }
        self.emit(Opcode::BuildMap, vec![Lit(keywords.len() as u32)]);
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        for keyword in keywords {
            match &keyword.arg {
                Some(name) => {
                    let key = self.reserve(1);
                    self.load_const(ConstValue::str(name.as_str()));
                    self.emit(Opcode::StoreFast, vec![Reg(key)]);
                    self.visit_expr(&keyword.value)?;
                    self.emit(Opcode::StoreSubscr, vec![Reg(reg), Reg(key)]);
                    self.clear_reg(key);
                }
                None => {
                    self.visit_expr(&keyword.value)?;
                    self.emit(Opcode::DictMerge, vec![Reg(reg)]);
                }
            }
        }
        Ok(())
    }

    fn validate_keywords(&self, keywords: &[Keyword]) -> Result<()> {
        for (i, keyword) in keywords.iter().enumerate() {
            let Some(name) = &keyword.arg else { continue };
            if let Some(other) = keywords[i + 1..]
                .iter()
                .find(|other| other.arg.as_ref() == Some(name))
            {
                return Err(CompileError::syntax(
                    format!("keyword argument repeated: {name}"),
                    other.value.line,
                ));
            }
        }
        Ok(())
    }

    fn check_callable(&self, func: &Expr) {
        let kind = match &func.kind {
            ExprKind::Constant(_) => "constant",
            ExprKind::Tuple(_) => "tuple",
            ExprKind::List(_) => "list",
            ExprKind::Dict { .. } => "dict",
            ExprKind::Set(_) => "set",
            _ => return,
        };
        warn!(
            line = self.line,
            "'{}' object is not callable; perhaps you missed a comma?", kind
        );
    }

    // ========================================================================
    // Functions and classes
    // ========================================================================

    /// Evaluates defaults in this scope, compiles the body and emits
    /// `MAKE_FUNCTION`. Each default is handed to the new function as a
    /// (parent register, parameter register) pair.
    fn function(&mut self, def: &FunctionDef) -> Result<()> {
        let scope = self.child_scope(def.id)?;
        let params = &def.params;
        let positional: Vec<&String> = params.posonly.iter().chain(&params.args).collect();
        ensure!(
            params.defaults.len() <= positional.len(),
            "{} defaults for {} positional parameters of '{}'",
            params.defaults.len(),
            positional.len(),
            def.name
        );

        let base = self.next_register;
        let mut defaults = Vec::new();
        let with_default = positional[positional.len() - params.defaults.len()..]
            .iter()
            .copied()
            .zip(&params.defaults)
            .chain(
                params
                    .kwonly
                    .iter()
                    .zip(&params.kw_defaults)
                    .filter_map(|(name, value)| value.as_ref().map(|value| (name, value))),
            );
        for (param, value) in with_default {
            let reg = self.next_register;
            self.expr_to_reg(Some(value), reg)?;
            let mangled = scope.mangle(param);
            let own = scope.reg(&mangled).ok_or_else(|| {
                CompileError::internal(format!(
                    "parameter '{}' of '{}' has no register",
                    mangled, def.name
                ))
            })?;
            defaults.push((reg, own));
        }

        let code = self.sprout_function(def, scope, defaults)?;
        let index = self.consts.add(ConstValue::Code(Box::new(code)));
        self.emit(Opcode::MakeFunction, vec![Const(index)]);
        self.clear_regs_above(base);
        Ok(())
    }

    /// `__build_class__(<body function>, name, *bases, **keywords)`.
    fn class(&mut self, def: &ClassDef) -> Result<()> {
        let scope = self.child_scope(def.id)?;
        let code = self.sprout_class(def, scope)?;
        let code = self.consts.add(ConstValue::Code(Box::new(code)));
        let name = self.consts.add(ConstValue::str(def.name.as_str()));

        let mut args = vec![Arg::Function(code), Arg::Const(name)];
        args.extend(def.bases.iter().map(Arg::Expr));
        self.call(Callee::BuildClass, &args, &def.keywords)
    }

    // ========================================================================
    // Assignment targets
    // ========================================================================

    /// Stores the accumulator into `target`.
    pub(super) fn assign_acc(&mut self, target: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => return self.store_name(name),
            ExprKind::Attribute { value, attr } => {
                if let ExprKind::Name(owner) = &value.kind {
                    if let Some(owner) = self.fast_reg(owner) {
                        let name = self.name_index(attr);
                        self.emit(Opcode::StoreAttr, vec![Reg(owner), Name(name)]);
                        return Ok(());
                    }
                }
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => return self.unpack(elts, target.line),
            ExprKind::Starred(_) => return Err(starred_target(target.line)),
            _ => {}
        }
        let reg = self.reserve(1);
        self.emit(Opcode::StoreFast, vec![Reg(reg)]);
        self.assign_reg(target, reg, false)
    }

    /// Stores register `reg` into `target`, clearing it unless `preserve`.
    pub(super) fn assign_reg(&mut self, target: &Expr, reg: u32, preserve: bool) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => return self.assign_name_reg(name, reg, preserve),
            ExprKind::Attribute { value, attr } => {
                let owner = self.any_reg(value)?;
                let name = self.name_index(attr);
                self.emit(Opcode::LoadFast, vec![Reg(reg)]);
                self.emit(Opcode::StoreAttr, vec![Reg(owner), Name(name)]);
                self.clear_reg(owner);
            }
            ExprKind::Subscript { value, slice } => {
                let container = self.any_reg(value)?;
                let key = self.any_reg(slice)?;
                self.emit(Opcode::LoadFast, vec![Reg(reg)]);
                self.emit(Opcode::StoreSubscr, vec![Reg(container), Reg(key)]);
                self.clear_reg(key);
                self.clear_reg(container);
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                self.emit(Opcode::LoadFast, vec![Reg(reg)]);
                self.unpack(elts, target.line)?;
            }
            ExprKind::Starred(_) => return Err(starred_target(target.line)),
            _ => return Err(invalid_target(target)),
        }
        if !preserve {
            self.clear_reg(reg);
        }
        Ok(())
    }

    /// Evaluates `value` and stores it into `target`.
    pub(super) fn assign_expr(&mut self, target: &Expr, value: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => match self.local_reg(value) {
                Some(src) => self.assign_name_reg(name, src, false),
                None => {
                    self.visit_expr(value)?;
                    self.store_name(name)
                }
            },
            ExprKind::Attribute { value: owner, attr } => {
                let owner_is_fast = self.local_reg(owner).is_some();
                let name = self.name_index(attr);
                if value.is_constant() || owner_is_fast {
                    let owner = self.any_reg(owner)?;
                    self.visit_expr(value)?;
                    self.emit(Opcode::StoreAttr, vec![Reg(owner), Name(name)]);
                    self.clear_reg(owner);
                } else {
                    let reg_value = self.any_reg(value)?;
                    let owner = self.any_reg(owner)?;
                    self.emit(Opcode::LoadFast, vec![Reg(reg_value)]);
                    self.emit(Opcode::StoreAttr, vec![Reg(owner), Name(name)]);
                    self.clear_reg(owner);
                    self.clear_reg(reg_value);
                }
                Ok(())
            }
            ExprKind::Subscript { .. } => {
                let reg_value = self.any_reg(value)?;
                self.assign_reg(target, reg_value, false)
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                self.visit_expr(value)?;
                self.unpack(elts, target.line)
            }
            ExprKind::Starred(_) => Err(starred_target(target.line)),
            _ => Err(invalid_target(target)),
        }
    }

    /// Unpacks the accumulator into `elts`, with at most one starred target.
    fn unpack(&mut self, elts: &[Expr], line: u32) -> Result<()> {
        let n = elts.len() as u32;
        let mut before = n;
        let mut after = 0;
        let mut seen_star = false;
        for (i, elt) in elts.iter().enumerate() {
            if matches!(elt.kind, ExprKind::Starred(_)) {
                if seen_star {
                    return Err(CompileError::syntax(
                        "multiple starred expressions in assignment",
                        line,
                    ));
                }
                seen_star = true;
                before = i as u32;
                after = n - i as u32;
            }
        }

        let base = self.reserve(n);
        self.emit(Opcode::Unpack, vec![Reg(base), Lit(before), Lit(after)]);
        // Values arrive in reverse order; the last target is at `base`.
        for (i, elt) in elts.iter().enumerate() {
            let target = match &elt.kind {
                ExprKind::Starred(value) => value.as_ref(),
                _ => elt,
            };
            self.assign_reg(target, base + n - i as u32 - 1, false)?;
        }
        self.free_regs_above(base);
        Ok(())
    }

    // ========================================================================
    // Augmented assignment and deletion
    // ========================================================================

    pub(super) fn aug_assign(&mut self, target: &Expr, op: BinOperator, value: &Expr) -> Result<()> {
        let inplace = inplace_opcode(op);
        match &target.kind {
            ExprKind::Name(name) => {
                let reg = self.any_reg(target)?;
                self.visit_expr(value)?;
                self.emit(inplace, vec![Reg(reg)]);
                self.store_name(name)?;
                self.clear_reg(reg);
            }
            ExprKind::Attribute { value: owner, attr } => {
                let owner = self.any_reg(owner)?;
                let name = self.name_index(attr);
                let meta = self.fresh_metaslot();
                self.emit(Opcode::LoadAttr, vec![Reg(owner), Name(name), Lit(meta)]);
                let tmp = self.reserve(1);
                self.emit(Opcode::StoreFast, vec![Reg(tmp)]);
                self.visit_expr(value)?;
                self.emit(inplace, vec![Reg(tmp)]);
                self.emit(Opcode::StoreAttr, vec![Reg(owner), Name(name)]);
                self.clear_reg(tmp);
                self.clear_reg(owner);
            }
            ExprKind::Subscript {
                value: container,
                slice,
            } => {
                let container = self.any_reg(container)?;
                let key = self.any_reg(slice)?;
                self.emit(Opcode::LoadFast, vec![Reg(key)]);
                self.emit(Opcode::BinarySubscr, vec![Reg(container)]);
                let tmp = self.reserve(1);
                self.emit(Opcode::StoreFast, vec![Reg(tmp)]);
                self.visit_expr(value)?;
                self.emit(inplace, vec![Reg(tmp)]);
                self.clear_reg(tmp);
                self.emit(Opcode::StoreSubscr, vec![Reg(container), Reg(key)]);
                self.clear_reg(key);
                self.clear_reg(container);
            }
            _ => return Err(invalid_target(target)),
        }
        Ok(())
    }

    pub(super) fn delete(&mut self, target: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name)?,
            ExprKind::Attribute { value, attr } => {
                self.visit_expr(value)?;
                let name = self.name_index(attr);
                self.emit(Opcode::DeleteAttr, vec![Name(name)]);
            }
            ExprKind::Subscript { value, slice } => {
                let container = self.any_reg(value)?;
                self.visit_expr(slice)?;
                self.emit(Opcode::DeleteSubscr, vec![Reg(container)]);
                self.clear_reg(container);
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.delete(elt)?;
                }
            }
            _ => return Err(invalid_target(target)),
        }
        Ok(())
    }
}

fn starred_target(line: u32) -> CompileError {
    CompileError::syntax("starred assignment target must be in a list or tuple", line)
}

fn invalid_target(target: &Expr) -> CompileError {
    CompileError::internal(format!(
        "unsupported assignment target on line {}",
        target.line
    ))
}

fn binary_opcode(op: BinOperator) -> Opcode {
    match op {
        BinOperator::Add => Opcode::BinaryAdd,
        BinOperator::Sub => Opcode::BinarySubtract,
        BinOperator::Mult => Opcode::BinaryMultiply,
        BinOperator::MatMult => Opcode::BinaryMatrixMultiply,
        BinOperator::Div => Opcode::BinaryTrueDivide,
        BinOperator::Mod => Opcode::BinaryModulo,
        BinOperator::Pow => Opcode::BinaryPower,
        BinOperator::LShift => Opcode::BinaryLshift,
        BinOperator::RShift => Opcode::BinaryRshift,
        BinOperator::BitOr => Opcode::BinaryOr,
        BinOperator::BitXor => Opcode::BinaryXor,
        BinOperator::BitAnd => Opcode::BinaryAnd,
        BinOperator::FloorDiv => Opcode::BinaryFloorDivide,
    }
}

fn inplace_opcode(op: BinOperator) -> Opcode {
    match op {
        BinOperator::Add => Opcode::InplaceAdd,
        BinOperator::Sub => Opcode::InplaceSubtract,
        BinOperator::Mult => Opcode::InplaceMultiply,
        BinOperator::MatMult => Opcode::InplaceMatrixMultiply,
        BinOperator::Div => Opcode::InplaceTrueDivide,
        BinOperator::Mod => Opcode::InplaceModulo,
        BinOperator::Pow => Opcode::InplacePower,
        BinOperator::LShift => Opcode::InplaceLshift,
        BinOperator::RShift => Opcode::InplaceRshift,
        BinOperator::BitOr => Opcode::InplaceOr,
        BinOperator::BitXor => Opcode::InplaceXor,
        BinOperator::BitAnd => Opcode::InplaceAnd,
        BinOperator::FloorDiv => Opcode::InplaceFloorDivide,
    }
}

fn unary_opcode(op: UnaryOperator) -> Opcode {
    match op {
        UnaryOperator::Invert => Opcode::UnaryInvert,
        UnaryOperator::Not => Opcode::UnaryNot,
        UnaryOperator::UAdd => Opcode::UnaryPositive,
        UnaryOperator::USub => Opcode::UnaryNegative,
    }
}
