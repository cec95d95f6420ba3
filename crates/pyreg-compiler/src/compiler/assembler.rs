// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns a symbolic instruction list into a [`CodeObject`].
//!
//! Every instruction takes one 4-byte unit unless an immediate does not fit
//! its compact width, in which case it is emitted in the wide form
//! `[WIDE, opcode, 0, 0]` followed by one 32-bit word per immediate. Widening
//! an instruction moves every later offset, which can push another jump out
//! of range, so layout repeats until no instruction changes width.

use tracing::debug;

use super::code::{
    CodeFlags, CodeObject, ConstantPool, ExceptionHandler, NamePool, PackedFlags,
};
use super::instruction::{Instruction, Label, Operand};
use super::opcode::{Imm, Opcode, UNIT};
use crate::error::{CompileError, Result};

/// A `try`, `except ... as` or `with` region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// First protected instruction
    pub start: Label,
    /// Handler entry, also the end of the protected range
    pub handler: Label,
    /// End of the handler
    pub handler_end: Label,
    /// First of the two registers receiving the link value and exception
    pub link_reg: u32,
}

/// Everything the code generator produces for one body.
#[derive(Debug, Default)]
pub struct CodeUnit {
    /// Code object name
    pub name: String,
    /// Source file
    pub filename: String,
    /// First source line
    pub firstlineno: u32,
    /// Instructions in emission order
    pub instructions: Vec<Instruction>,
    /// Instruction index of each label, by label number
    pub labels: Vec<Option<usize>>,
    /// Exception regions in creation order
    pub regions: Vec<ExceptionRegion>,
    /// Constant pool
    pub consts: ConstantPool,
    /// Name pool
    pub names: NamePool,
    /// Register names
    pub varnames: Vec<String>,
    /// Cell variable names
    pub cellvars: Vec<String>,
    /// Free variable names
    pub freevars: Vec<String>,
    /// Cell variable registers
    pub cell2reg: Vec<u32>,
    /// Default pairs followed by free variable pairs
    pub free2reg: Vec<(u32, u32)>,
    /// Positional parameters, positional-only included
    pub argcount: u32,
    /// Positional-only parameters
    pub posonlyargcount: u32,
    /// Keyword-only parameters
    pub kwonlyargcount: u32,
    /// Default pairs at the start of `free2reg`
    pub ndefaultargs: u32,
    /// Fixed registers
    pub nlocals: u32,
    /// Register high-water mark
    pub framesize: u32,
    /// Inline cache slots
    pub nmeta: u32,
    /// Runtime flags
    pub flags: CodeFlags,
}

/// Lays out, encodes and packages one unit.
pub fn assemble(unit: CodeUnit) -> Result<CodeObject> {
    let CodeUnit {
        name,
        filename,
        firstlineno,
        instructions,
        labels,
        regions,
        consts,
        names,
        varnames,
        cellvars,
        freevars,
        cell2reg,
        free2reg,
        argcount,
        posonlyargcount,
        kwonlyargcount,
        ndefaultargs,
        nlocals,
        framesize,
        nmeta,
        flags,
    } = unit;

    let mut instrs = Vec::with_capacity(instructions.len() + 1);
    instrs.push(Instruction::new(
        Opcode::FuncHeader,
        vec![Operand::Lit(framesize)],
    ));
    instrs.extend(instructions);
    // The header shifts every label by one instruction.
    let labels: Vec<Option<usize>> = labels.iter().map(|pos| pos.map(|p| p + 1)).collect();

    for instr in &instrs {
        check_operands(instr)?;
        if let Some(label) = instr.target() {
            resolve(&labels, label)?;
        }
    }

    let layout = Layout::compute(&instrs, &labels)?;
    let code = layout.encode(&instrs, &labels)?;
    let linetable = line_table(&instrs, &layout, firstlineno);

    let mut exception_table = regions
        .iter()
        .map(|region| {
            Ok(ExceptionHandler {
                start: layout.label_offset(&labels, region.start)? as u32,
                handler: layout.label_offset(&labels, region.handler)? as u32,
                handler_end: layout.label_offset(&labels, region.handler_end)? as u32,
                link_reg: region.link_reg,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    exception_table.sort_by_key(|entry| entry.handler);

    let totalargcount = argcount + kwonlyargcount;
    let packed_flags = PackedFlags::compute(
        argcount,
        totalargcount,
        flags,
        cellvars.len(),
        freevars.len(),
    );

    debug!(
        name = %name,
        bytes = code.len(),
        consts = consts.len(),
        framesize,
        "assembled code object"
    );

    Ok(CodeObject {
        name,
        filename,
        firstlineno,
        code,
        consts: consts.into_vec(),
        names: names.into_vec(),
        varnames,
        cellvars,
        freevars,
        argcount,
        posonlyargcount,
        kwonlyargcount,
        totalargcount,
        ndefaultargs,
        nlocals,
        framesize,
        nmeta,
        flags,
        packed_flags,
        linetable,
        exception_table,
        cell2reg,
        free2reg,
    })
}

fn check_operands(instr: &Instruction) -> Result<()> {
    let imms = instr.opcode.imms();
    let kinds: Vec<Imm> = instr.operands.iter().map(Operand::kind).collect();
    if kinds != imms {
        return Err(CompileError::internal(format!(
            "operand kind mismatch for {}: expected {:?}, got {:?}",
            instr.opcode, imms, kinds
        )));
    }
    Ok(())
}

fn resolve(labels: &[Option<usize>], label: Label) -> Result<usize> {
    labels
        .get(label.0 as usize)
        .copied()
        .flatten()
        .ok_or_else(|| CompileError::internal(format!("unresolved label L{}", label.0)))
}

// ============================================================================
// Layout
// ============================================================================

struct Layout {
    wide: Vec<bool>,
    /// Byte offset of every instruction, plus the end of the code
    offsets: Vec<usize>,
}

impl Layout {
    fn compute(instrs: &[Instruction], labels: &[Option<usize>]) -> Result<Self> {
        let mut layout = Layout {
            wide: vec![false; instrs.len()],
            offsets: Vec::new(),
        };
        loop {
            layout.place(instrs);
            let mut changed = false;
            for (index, instr) in instrs.iter().enumerate() {
                if layout.wide[index] {
                    continue;
                }
                let values = layout.values(index, instr, labels)?;
                let fits = instr
                    .operands
                    .iter()
                    .zip(&values)
                    .all(|(operand, value)| operand.kind().fits_compact(*value));
                if !fits {
                    layout.wide[index] = true;
                    changed = true;
                }
            }
            if !changed {
                return Ok(layout);
            }
        }
    }

    fn place(&mut self, instrs: &[Instruction]) {
        self.offsets.clear();
        let mut offset = 0;
        for (instr, wide) in instrs.iter().zip(&self.wide) {
            self.offsets.push(offset);
            offset += instr.opcode.size(*wide);
        }
        self.offsets.push(offset);
    }

    fn label_offset(&self, labels: &[Option<usize>], label: Label) -> Result<usize> {
        Ok(self.offsets[resolve(labels, label)?])
    }

    /// Numeric operand values; jumps become unit offsets from `index`.
    fn values(
        &self,
        index: usize,
        instr: &Instruction,
        labels: &[Option<usize>],
    ) -> Result<Vec<i64>> {
        instr
            .operands
            .iter()
            .map(|operand| {
                Ok(match *operand {
                    Operand::Reg(v)
                    | Operand::Lit(v)
                    | Operand::Name(v)
                    | Operand::Const(v)
                    | Operand::Imm16(v)
                    | Operand::Base(v) => i64::from(v),
                    Operand::Intrinsic(intrinsic) => i64::from(intrinsic as u8),
                    Operand::Jump(label) => {
                        let target = self.label_offset(labels, label)? as i64;
                        (target - self.offsets[index] as i64) / UNIT as i64
                    }
                })
            })
            .collect()
    }

    fn encode(&self, instrs: &[Instruction], labels: &[Option<usize>]) -> Result<Vec<u8>> {
        let mut code = Vec::with_capacity(self.offsets.last().copied().unwrap_or(0));
        for (index, instr) in instrs.iter().enumerate() {
            let values = self.values(index, instr, labels)?;
            let opcode = instr.opcode as u8;
            if self.wide[index] {
                code.extend_from_slice(&[Opcode::Wide as u8, opcode, 0, 0]);
                for (operand, value) in instr.operands.iter().zip(values) {
                    let word = match operand.kind() {
                        Imm::Jump => i32::try_from(value).map(|v| v.to_le_bytes()),
                        _ => u32::try_from(value).map(|v| v.to_le_bytes()),
                    }
                    .map_err(|_| {
                        CompileError::internal(format!(
                            "operand {value} of {} exceeds 32 bits",
                            instr.opcode
                        ))
                    })?;
                    code.extend_from_slice(&word);
                }
            } else {
                let start = code.len();
                code.push(opcode);
                for (operand, value) in instr.operands.iter().zip(values) {
                    match operand.kind() {
                        Imm::Jump => code.extend_from_slice(&(value as i16).to_le_bytes()),
                        Imm::Imm16 => code.extend_from_slice(&(value as u16).to_le_bytes()),
                        _ => code.push(value as u8),
                    }
                }
                code.resize(start + UNIT, 0);
            }
            debug_assert_eq!(code.len(), self.offsets[index + 1]);
        }
        Ok(code)
    }
}

// ============================================================================
// Line table
// ============================================================================

/// Byte pairs `(Δoffset, Δline)` relative to `(0, firstlineno)`, one change
/// per instruction that starts a new line.
fn line_table(instrs: &[Instruction], layout: &Layout, firstlineno: u32) -> Vec<u8> {
    let mut table = Vec::new();
    let mut prev_offset = 0usize;
    let mut prev_line = i64::from(firstlineno);

    for (index, instr) in instrs.iter().enumerate() {
        let Some(line) = instr.line else {
            continue;
        };
        let line = i64::from(line);
        let offset = layout.offsets[index];
        if line == prev_line {
            continue;
        }
        while offset - prev_offset > 255 {
            table.extend_from_slice(&[255, 0]);
            prev_offset += 255;
        }
        while line != prev_line {
            let delta = (line - prev_line).clamp(-128, 127);
            table.push((offset - prev_offset) as u8);
            table.push(delta as i8 as u8);
            prev_offset = offset;
            prev_line += delta;
        }
    }
    table
}
