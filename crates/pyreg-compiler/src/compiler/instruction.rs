// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Symbolic instructions produced by the code generator.

use std::fmt;

use super::opcode::{Imm, Intrinsic, Opcode};

/// Placeholder for an instruction address; resolved by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// A symbolic operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Frame register
    Reg(u32),
    /// Literal
    Lit(u32),
    /// Name pool index
    Name(u32),
    /// Constant pool index
    Const(u32),
    /// Jump target
    Jump(Label),
    /// 16-bit literal
    Imm16(u32),
    /// Callee frame base register
    Base(u32),
    /// VM helper
    Intrinsic(Intrinsic),
}

impl Operand {
    /// The immediate kind this operand encodes as.
    pub fn kind(&self) -> Imm {
        match self {
            Operand::Reg(_) => Imm::Reg,
            Operand::Lit(_) => Imm::Lit,
            Operand::Name(_) => Imm::Str,
            Operand::Const(_) => Imm::Const,
            Operand::Jump(_) => Imm::Jump,
            Operand::Imm16(_) => Imm::Imm16,
            Operand::Base(_) => Imm::Base,
            Operand::Intrinsic(_) => Imm::Intrinsic,
        }
    }
}

/// One instruction before assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
    /// Operands, in the opcode's immediate order
    pub operands: Vec<Operand>,
    /// Source line, set when the instruction starts a new line
    pub line: Option<u32>,
}

impl Instruction {
    /// Creates an instruction without line information.
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            operands,
            line: None,
        }
    }

    /// Jump target, if any.
    pub fn target(&self) -> Option<Label> {
        self.operands.iter().find_map(|op| match op {
            Operand::Jump(label) => Some(*label),
            _ => None,
        })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) | Operand::Base(r) => write!(f, "r{r}"),
            Operand::Lit(n) | Operand::Imm16(n) => write!(f, "{n}"),
            Operand::Name(n) => write!(f, "name#{n}"),
            Operand::Const(n) => write!(f, "const#{n}"),
            Operand::Jump(Label(l)) => write!(f, "L{l}"),
            Operand::Intrinsic(i) => f.write_str(i.name()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}
