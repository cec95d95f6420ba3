// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code generation from the core IR to symbolic instructions.
//!
//! One [`CodeGenerator`] exists per module, function and class body. It walks
//! the body against the [`Scope`] the analyzer built for it and emits a flat
//! instruction list for the assembler.
//!
//! Values flow through an implicit accumulator. Sub-expressions that must
//! outlive the next evaluation are parked in registers: fixed registers
//! (`< nlocals`) hold named locals, temporaries sit above them and are
//! allocated and released in strict LIFO order. Every statement and every
//! expression visit leaves `next_register` where it found it.
//!
//! Nested bodies are compiled by a fresh generator ("sprouted") bound to the
//! child scope, so constant pools, name pools and register counters are
//! never shared between units.

mod expressions;
mod statements;

#[cfg(test)]
mod tests;

use pyreg_macros::ensure;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::assembler::{assemble, CodeUnit, ExceptionRegion};
use super::code::{CodeFlags, CodeObject, ConstValue, ConstantPool, NamePool};
use super::instruction::{Instruction, Label, Operand};
use super::opcode::Opcode;
use super::scope::{Access, Scope, ScopeKind, ScopeTable, CLASS_CELL};
use crate::config::CompileOptions;
use crate::desugar::ir::{self, ClassDef, FunctionDef, ScopeId};
use crate::error::{CompileError, Result};

/// Registers the VM reserves below a callee's first argument.
pub const FRAME_EXTRA: u32 = 4;

/// Compiles a desugared module and every body nested in it.
pub fn generate(
    module: &ir::Module,
    table: &ScopeTable,
    options: &CompileOptions,
) -> Result<CodeObject> {
    let firstlineno = module.body.first().map_or(1, |stmt| stmt.line);
    let mut generator = CodeGenerator::new(
        table,
        table.module(),
        options,
        options.module_name.clone(),
        String::new(),
        firstlineno,
    );
    debug!(module = %options.module_name, file = %options.filename, "compiling module");

    if let Some(doc) = &module.docstring {
        generator.line = firstlineno;
        generator.load_const(ConstValue::str(doc.as_str()));
        generator.store_name("__doc__")?;
    }
    generator.stmts(&module.body)?;
    generator.finish()
}

/// A lexical block that `return`, `break` and `continue` must unwind.
#[derive(Debug, Clone)]
enum Block {
    /// `while` loop
    WhileLoop { break_label: Label, continue_label: Label },
    /// `for` loop holding its iterator in `reg`
    ForLoop {
        reg: u32,
        break_label: Label,
        continue_label: Label,
    },
    /// Body protected by a `finally` entered at `label`
    Finally { reg: u32, label: Label },
    /// `except` or `finally` body with a pending exception in `reg`
    Handler { reg: u32 },
    /// `except ... as name` body
    ExceptAs { name: String },
    /// `with` body, manager in `reg`
    With { reg: u32 },
}

#[derive(Debug, Clone, Copy, Default)]
struct LabelSlot {
    pos: Option<usize>,
    used: bool,
}

/// Instruction emitter for one body.
pub struct CodeGenerator<'s> {
    table: &'s ScopeTable,
    scope: &'s Scope,
    options: &'s CompileOptions,

    name: String,
    qualname: String,
    firstlineno: u32,

    instructions: Vec<Instruction>,
    labels: Vec<LabelSlot>,
    regions: Vec<ExceptionRegion>,
    consts: ConstantPool,
    names: NamePool,

    global_meta: FxHashMap<String, u32>,
    nmeta: u32,

    nlocals: u32,
    next_register: u32,
    max_registers: u32,

    blocks: Vec<Block>,
    line: u32,
    last_line: Option<u32>,
    unreachable: bool,

    /// (parent register, own register) for each bound default value
    defaults: Vec<(u32, u32)>,
    argcount: u32,
    posonlyargcount: u32,
    kwonlyargcount: u32,
    flags: CodeFlags,
}

impl<'s> CodeGenerator<'s> {
    fn new(
        table: &'s ScopeTable,
        scope: &'s Scope,
        options: &'s CompileOptions,
        name: String,
        qualname: String,
        firstlineno: u32,
    ) -> Self {
        Self {
            table,
            scope,
            options,
            name,
            qualname,
            firstlineno,
            instructions: Vec::new(),
            labels: Vec::new(),
            regions: Vec::new(),
            consts: ConstantPool::new(),
            names: NamePool::new(),
            global_meta: FxHashMap::default(),
            nmeta: 0,
            nlocals: scope.nlocals,
            next_register: scope.nlocals,
            max_registers: scope.nlocals,
            blocks: Vec::new(),
            line: firstlineno,
            last_line: None,
            unreachable: false,
            defaults: Vec::new(),
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            flags: CodeFlags::empty(),
        }
    }

    // ========================================================================
    // Nested bodies
    // ========================================================================

    fn child_scope(&self, id: ScopeId) -> Result<&'s Scope> {
        self.table
            .get(id)
            .ok_or_else(|| CompileError::internal(format!("no scope for body #{}", id.0)))
    }

    /// `outer.<locals>.inner` under a function, `C.method` under a class,
    /// the bare name at module level or for names declared global.
    fn child_qualname(&self, name: &str) -> String {
        match self.scope.kind {
            ScopeKind::Module => name.to_string(),
            _ if self.scope.is_global(&self.scope.mangle(name)) => name.to_string(),
            ScopeKind::Function => format!("{}.<locals>.{}", self.qualname, name),
            ScopeKind::Class => format!("{}.{}", self.qualname, name),
        }
    }

    /// Compiles a function body in its own generator.
    fn sprout_function(
        &self,
        def: &FunctionDef,
        scope: &'s Scope,
        defaults: Vec<(u32, u32)>,
    ) -> Result<CodeObject> {
        let qualname = self.child_qualname(&def.name);
        debug!(name = %qualname, line = def.line, "compiling function");

        let mut child = CodeGenerator::new(
            self.table,
            scope,
            self.options,
            def.name.clone(),
            qualname,
            def.line,
        );
        // Constant 0 is the docstring, constant 1 the qualified name.
        child.consts.push(match &def.docstring {
            Some(doc) => ConstValue::str(doc.as_str()),
            None => ConstValue::None,
        });
        child.consts.push(ConstValue::str(child.qualname.as_str()));

        let params = &def.params;
        child.argcount = (params.posonly.len() + params.args.len()) as u32;
        child.posonlyargcount = params.posonly.len() as u32;
        child.kwonlyargcount = params.kwonly.len() as u32;
        child.defaults = defaults;

        let mut flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        flags.set(CodeFlags::NESTED, scope.nested);
        flags.set(CodeFlags::GENERATOR, scope.generator);
        flags.set(CodeFlags::VARARGS, params.vararg.is_some());
        flags.set(CodeFlags::VARKEYWORDS, params.kwarg.is_some());
        child.flags = flags;

        child.stmts(&def.body)?;
        child.finish()
    }

    /// Compiles a class body in its own generator. The body records its
    /// module and qualified name, runs, then returns the `__class__` cell or
    /// None.
    fn sprout_class(&self, def: &ClassDef, scope: &'s Scope) -> Result<CodeObject> {
        let qualname = self.child_qualname(&def.name);
        debug!(name = %qualname, line = def.line, "compiling class");

        let mut child = CodeGenerator::new(
            self.table,
            scope,
            self.options,
            def.name.clone(),
            qualname,
            def.line,
        );
        child.load_name("__name__")?;
        child.store_name("__module__")?;
        child.load_const(ConstValue::str(child.qualname.as_str()));
        child.store_name("__qualname__")?;
        if let Some(doc) = &def.docstring {
            child.load_const(ConstValue::str(doc.as_str()));
            child.store_name("__doc__")?;
        }

        child.stmts(&def.body)?;

        child.line = def.line;
        if scope.cellvars.contains(CLASS_CELL) {
            let reg = child.varname(CLASS_CELL)?;
            child.emit(Opcode::LoadFast, vec![Operand::Reg(reg)]);
            child.store_name("__classcell__")?;
            child.emit(Opcode::LoadFast, vec![Operand::Reg(reg)]);
        } else {
            child.load_const(ConstValue::None);
        }
        child.emit(Opcode::ReturnValue, vec![]);
        child.finish()
    }

    /// Closes the body and hands it to the assembler.
    fn finish(mut self) -> Result<CodeObject> {
        if !self.unreachable {
            self.load_const(ConstValue::None);
            self.emit(Opcode::ReturnValue, vec![]);
        }
        ensure!(
            self.blocks.is_empty(),
            "{} blocks still open at the end of {}",
            self.blocks.len(),
            self.display_name()
        );
        ensure!(
            self.next_register == self.nlocals,
            "register depth {} at the end of {} (expected {})",
            self.next_register,
            self.display_name(),
            self.nlocals
        );

        let scope = self.scope;
        let ndefaultargs = self.defaults.len() as u32;
        let mut free2reg = self.defaults;
        free2reg.extend(scope.free2reg.iter().map(|var| (var.parent_reg, var.reg)));

        let unit = CodeUnit {
            name: self.name,
            filename: self.options.filename.clone(),
            firstlineno: self.firstlineno,
            instructions: self.instructions,
            labels: self.labels.iter().map(|slot| slot.pos).collect(),
            regions: self.regions,
            consts: self.consts,
            names: self.names,
            varnames: scope.varnames.clone(),
            cellvars: scope.cellvars.iter().cloned().collect(),
            freevars: scope.freevars.iter().cloned().collect(),
            cell2reg: scope.cell2reg(),
            free2reg,
            argcount: self.argcount,
            posonlyargcount: self.posonlyargcount,
            kwonlyargcount: self.kwonlyargcount,
            ndefaultargs,
            nlocals: self.nlocals,
            framesize: self.max_registers,
            nmeta: self.nmeta,
            flags: self.flags,
        };
        assemble(unit)
    }

    fn display_name(&self) -> &str {
        if self.qualname.is_empty() {
            &self.name
        } else {
            &self.qualname
        }
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Appends an instruction unless the current position is unreachable.
    fn emit(&mut self, opcode: Opcode, operands: Vec<Operand>) {
        if self.unreachable {
            return;
        }
        let mut instr = Instruction::new(opcode, operands);
        if self.last_line != Some(self.line) {
            instr.line = Some(self.line);
            self.last_line = Some(self.line);
        }
        self.instructions.push(instr);
        if opcode.is_terminator() {
            self.unreachable = true;
        }
    }

    /// Appends a jump to `label` after the other operands.
    fn emit_jump(&mut self, opcode: Opcode, mut operands: Vec<Operand>, label: Label) {
        if self.unreachable {
            return;
        }
        self.labels[label.0 as usize].used = true;
        operands.push(Operand::Jump(label));
        self.emit(opcode, operands);
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(LabelSlot::default());
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds a forward label here. Code after it is reachable only if some
    /// emitted jump targets it.
    fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        slot.pos = Some(self.instructions.len());
        if slot.used {
            self.unreachable = false;
        }
    }

    /// Binds a label that is entered by a backward jump or by the VM.
    fn bind_target(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        slot.pos = Some(self.instructions.len());
        slot.used = true;
        self.unreachable = false;
    }

    /// A fresh label bound at the current position.
    fn mark(&mut self) -> Label {
        let label = self.new_label();
        self.labels[label.0 as usize].pos = Some(self.instructions.len());
        label
    }

    fn load_const(&mut self, value: ConstValue) {
        let index = self.consts.add(value);
        self.emit(Opcode::LoadConst, vec![Operand::Const(index)]);
    }

    fn const_none(&mut self) -> u32 {
        self.consts.add(ConstValue::None)
    }

    // ========================================================================
    // Registers
    // ========================================================================

    fn reserve(&mut self, n: u32) -> u32 {
        let reg = self.next_register;
        self.next_register += n;
        self.max_registers = self.max_registers.max(self.next_register);
        reg
    }

    fn is_temporary(&self, reg: u32) -> bool {
        reg >= self.nlocals
    }

    /// Releases the topmost temporary without clearing it.
    fn free_reg(&mut self, reg: u32) {
        if self.is_temporary(reg) {
            self.next_register -= 1;
            debug_assert_eq!(self.next_register, reg, "registers released out of order");
        }
    }

    fn free_regs_above(&mut self, base: u32) {
        if base < self.next_register {
            self.next_register = base;
        }
    }

    /// Clears and releases a temporary; named registers are left alone.
    fn clear_reg(&mut self, reg: u32) {
        if self.is_temporary(reg) {
            self.emit(Opcode::ClearFast, vec![Operand::Reg(reg)]);
            self.free_reg(reg);
        }
    }

    fn clear_regs_above(&mut self, base: u32) {
        while self.next_register > base {
            self.next_register -= 1;
            debug_assert!(self.is_temporary(self.next_register));
            self.emit(Opcode::ClearFast, vec![Operand::Reg(self.next_register)]);
        }
    }

    /// Runs `f` with `block` on the block stack.
    fn with_block<T>(
        &mut self,
        block: Block,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.blocks.push(block);
        let result = f(self);
        self.blocks.pop();
        result
    }

    // ========================================================================
    // Names
    // ========================================================================

    fn varname(&self, mangled: &str) -> Result<u32> {
        self.scope.reg(mangled).ok_or_else(|| {
            CompileError::internal(format!(
                "'{}' has no register in {}",
                mangled,
                self.display_name()
            ))
        })
    }

    /// Inline cache shared by every dynamic load of `name`; two slots each.
    fn global_metaslot(&mut self, name: &str) -> u32 {
        if let Some(&slot) = self.global_meta.get(name) {
            return slot;
        }
        let slot = self.nmeta;
        self.nmeta += 2;
        self.global_meta.insert(name.to_string(), slot);
        slot
    }

    fn fresh_metaslot(&mut self) -> u32 {
        self.nmeta += 1;
        self.nmeta - 1
    }

    /// Name pool index of a mangled attribute or variable name.
    fn name_index(&mut self, name: &str) -> u32 {
        let mangled = self.scope.mangle(name);
        self.names.add(&mangled)
    }

    /// Register of `name` if it is a fast local of this body.
    fn fast_reg(&self, name: &str) -> Option<u32> {
        let mangled = self.scope.mangle(name);
        match self.scope.access(&mangled) {
            Access::Fast => self.scope.reg(&mangled),
            _ => None,
        }
    }

    fn load_name(&mut self, name: &str) -> Result<()> {
        let mangled = self.scope.mangle(name).into_owned();
        match self.scope.access(&mangled) {
            Access::Fast => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::LoadFast, vec![Operand::Reg(reg)]);
            }
            Access::Deref => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::LoadDeref, vec![Operand::Reg(reg)]);
            }
            Access::ClassDeref => {
                let reg = self.varname(&mangled)?;
                let index = self.names.add(&mangled);
                self.emit(
                    Opcode::LoadClassDeref,
                    vec![Operand::Reg(reg), Operand::Name(index)],
                );
            }
            Access::Name => {
                let index = self.names.add(&mangled);
                let meta = self.global_metaslot(&mangled);
                self.emit(Opcode::LoadName, vec![Operand::Name(index), Operand::Lit(meta)]);
            }
            Access::Global => {
                let index = self.names.add(&mangled);
                let meta = self.global_metaslot(&mangled);
                self.emit(
                    Opcode::LoadGlobal,
                    vec![Operand::Name(index), Operand::Lit(meta)],
                );
            }
        }
        Ok(())
    }

    /// Stores the accumulator into `name`.
    fn store_name(&mut self, name: &str) -> Result<()> {
        let mangled = self.scope.mangle(name).into_owned();
        match self.scope.store_access(&mangled) {
            Access::Fast => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::StoreFast, vec![Operand::Reg(reg)]);
            }
            Access::Deref | Access::ClassDeref => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::StoreDeref, vec![Operand::Reg(reg)]);
            }
            Access::Name => {
                let index = self.names.add(&mangled);
                self.emit(Opcode::StoreName, vec![Operand::Name(index)]);
            }
            Access::Global => {
                let index = self.names.add(&mangled);
                self.emit(Opcode::StoreGlobal, vec![Operand::Name(index)]);
            }
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str) -> Result<()> {
        let mangled = self.scope.mangle(name).into_owned();
        match self.scope.store_access(&mangled) {
            Access::Fast => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::DeleteFast, vec![Operand::Reg(reg)]);
            }
            Access::Deref | Access::ClassDeref => {
                let reg = self.varname(&mangled)?;
                self.emit(Opcode::DeleteDeref, vec![Operand::Reg(reg)]);
            }
            Access::Name => {
                let index = self.names.add(&mangled);
                self.emit(Opcode::DeleteName, vec![Operand::Name(index)]);
            }
            Access::Global => {
                let index = self.names.add(&mangled);
                self.emit(Opcode::DeleteGlobal, vec![Operand::Name(index)]);
            }
        }
        Ok(())
    }

    /// Like [`Self::delete_name`] but never raises for an unbound name.
    fn clear_name(&mut self, name: &str) -> Result<()> {
        if let Some(reg) = self.fast_reg(name) {
            self.emit(Opcode::ClearFast, vec![Operand::Reg(reg)]);
            return Ok(());
        }
        let none = self.const_none();
        self.emit(Opcode::LoadConst, vec![Operand::Const(none)]);
        self.store_name(name)?;
        self.delete_name(name)
    }

    /// Stores register `src` into `name`, moving it when both are registers
    /// of this frame and `src` is a dead temporary.
    fn assign_name_reg(&mut self, name: &str, src: u32, preserve: bool) -> Result<()> {
        if let Some(dst) = self.fast_reg(name) {
            if self.is_temporary(src) && !preserve {
                self.emit(Opcode::Move, vec![Operand::Reg(dst), Operand::Reg(src)]);
                self.free_reg(src);
                return Ok(());
            }
        }
        self.emit(Opcode::LoadFast, vec![Operand::Reg(src)]);
        self.store_name(name)?;
        if !preserve {
            self.clear_reg(src);
        }
        Ok(())
    }
}
