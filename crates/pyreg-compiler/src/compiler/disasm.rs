// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of encoded bytecode back into readable listings.

use std::fmt;

use super::code::CodeObject;
use super::opcode::{Imm, Intrinsic, Opcode, UNIT};
use crate::error::{CompileError, Result};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    /// Byte offset of the instruction
    pub offset: usize,
    /// Operation
    pub opcode: Opcode,
    /// Immediate values; jumps are resolved to absolute byte offsets
    pub operands: Vec<i64>,
    /// Whether the instruction used the wide form
    pub wide: bool,
    /// Source line from the line table
    pub line: u32,
}

impl DecodedInstr {
    /// Absolute byte offset of the jump target, if any.
    pub fn jump_target(&self) -> Option<usize> {
        self.opcode
            .jump_operand()
            .map(|index| self.operands[index] as usize)
    }
}

/// A decoded code object, without its children.
#[derive(Debug, Clone)]
pub struct Disassembly {
    /// Code object name
    pub name: String,
    /// Instructions in offset order
    pub instructions: Vec<DecodedInstr>,
    names: Vec<String>,
    consts: Vec<String>,
}

impl Disassembly {
    /// Mnemonics in order, for quick comparisons.
    pub fn mnemonics(&self) -> Vec<&'static str> {
        self.instructions.iter().map(|i| i.opcode.mnemonic()).collect()
    }

    /// Instructions with the given opcode.
    pub fn find(&self, opcode: Opcode) -> impl Iterator<Item = &DecodedInstr> {
        self.instructions.iter().filter(move |i| i.opcode == opcode)
    }
}

/// Decodes the instructions of `code`.
pub fn disassemble(code: &CodeObject) -> Result<Disassembly> {
    let bytes = &code.code;
    let mut instructions = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let unit = bytes
            .get(offset..offset + UNIT)
            .ok_or_else(|| truncated(offset))?;
        let (wide, number) = if unit[0] == Opcode::Wide as u8 {
            (true, unit[1])
        } else {
            (false, unit[0])
        };
        let opcode = Opcode::try_from(number).map_err(|n| {
            CompileError::internal(format!("unknown opcode {n} at offset {offset}"))
        })?;

        let mut operands = Vec::with_capacity(opcode.imms().len());
        if wide {
            for (index, imm) in opcode.imms().iter().enumerate() {
                let start = offset + UNIT * (index + 1);
                let word: [u8; 4] = bytes
                    .get(start..start + 4)
                    .and_then(|w| w.try_into().ok())
                    .ok_or_else(|| truncated(offset))?;
                operands.push(match imm {
                    Imm::Jump => i64::from(i32::from_le_bytes(word)),
                    _ => i64::from(u32::from_le_bytes(word)),
                });
            }
        } else {
            let mut pos = offset + 1;
            for imm in opcode.imms() {
                operands.push(match imm {
                    Imm::Jump => i64::from(i16::from_le_bytes([bytes[pos], bytes[pos + 1]])),
                    Imm::Imm16 => i64::from(u16::from_le_bytes([bytes[pos], bytes[pos + 1]])),
                    _ => i64::from(bytes[pos]),
                });
                pos += imm.compact_size();
            }
        }
        if let Some(index) = opcode.jump_operand() {
            operands[index] = offset as i64 + operands[index] * UNIT as i64;
        }

        instructions.push(DecodedInstr {
            offset,
            opcode,
            operands,
            wide,
            line: code.line_for_offset(offset),
        });
        offset += opcode.size(wide);
    }

    Ok(Disassembly {
        name: code.name.clone(),
        instructions,
        names: code.names.clone(),
        consts: code.consts.iter().map(ToString::to_string).collect(),
    })
}

fn truncated(offset: usize) -> CompileError {
    CompileError::internal(format!("truncated instruction at offset {offset}"))
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Disassembly of {}:", self.name)?;
        let mut last_line = None;
        for instr in &self.instructions {
            if last_line != Some(instr.line) {
                write!(f, "{:>4} ", instr.line)?;
                last_line = Some(instr.line);
            } else {
                f.write_str("     ")?;
            }
            write!(f, "{:>6} {:<24}", instr.offset, instr.opcode.mnemonic())?;
            for (index, (imm, value)) in instr.opcode.imms().iter().zip(&instr.operands).enumerate() {
                f.write_str(if index == 0 { " " } else { ", " })?;
                self.operand(f, *imm, *value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Disassembly {
    fn operand(&self, f: &mut fmt::Formatter<'_>, imm: Imm, value: i64) -> fmt::Result {
        let lookup = |pool: &[String]| pool.get(value as usize).cloned();
        match imm {
            Imm::Reg | Imm::Base => write!(f, "r{value}"),
            Imm::Jump => write!(f, "to {value}"),
            Imm::Str => match lookup(&self.names) {
                Some(name) => write!(f, "{value} ({name})"),
                None => write!(f, "{value}"),
            },
            Imm::Const => match lookup(&self.consts) {
                Some(constant) => write!(f, "{value} ({constant})"),
                None => write!(f, "{value}"),
            },
            Imm::Intrinsic => match u8::try_from(value).ok().and_then(|v| Intrinsic::try_from(v).ok()) {
                Some(intrinsic) => f.write_str(intrinsic.name()),
                None => write!(f, "{value}"),
            },
            Imm::Lit | Imm::Imm16 => write!(f, "{value}"),
        }
    }
}
