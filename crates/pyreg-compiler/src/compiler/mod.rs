// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bytecode compiler for the core IR.
//!
//! Turns a desugared module into a tree of code objects for the register
//! VM.
//!
//! # Module Structure
//!
//! - `opcode`: Opcode and intrinsic tables, immediate kinds
//! - `instruction`: Symbolic instructions with unresolved labels
//! - `scope`: Name classification and register assignment
//! - `codegen`: Code generation from the IR
//! - `assembler`: Layout, encoding, line and exception tables
//! - `code`: Code objects and their constant/name pools
//! - `disasm`: Decoding bytecode back into listings

pub mod assembler;
pub mod code;
pub mod codegen;
pub mod disasm;
pub mod instruction;
pub mod opcode;
pub mod scope;

pub use code::{CodeFlags, CodeObject, ConstValue, ExceptionHandler, PackedFlags};
pub use codegen::generate;
pub use disasm::{disassemble, DecodedInstr, Disassembly};
pub use opcode::{intrinsic_table, opcode_table, Intrinsic, Opcode};
pub use scope::ScopeTable;
