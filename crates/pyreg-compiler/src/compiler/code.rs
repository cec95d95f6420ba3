// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code objects and their pools.

use std::fmt;

use num_bigint::BigInt;
use pyreg_macros::bitflags;
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};

use crate::ast;

bitflags! {
    /// Code flags as seen by the runtime (`co_flags`).
    CodeFlags: u32 {
        OPTIMIZED = 0x0001,
        NEWLOCALS = 0x0002,
        VARARGS = 0x0004,
        VARKEYWORDS = 0x0008,
        NESTED = 0x0010,
        GENERATOR = 0x0020,
    }
}

bitflags! {
    /// Flags packed with the argument count, checked by the VM on every call.
    PackedFlags: u32 {
        VARARGS = 0x0001_0000,
        VARKEYWORDS = 0x0004_0000,
        HAS_CELLS = 0x0008_0000,
        HAS_FREEVARS = 0x0010_0000,
        KWD_ONLY_ARGS = 0x0020_0000,
        OVERFLOW = 0x0040_0000,
        LOCALS_DICT = 0x0080_0000,
        GENERATOR = 0x0100_0000,
    }
}

/// Mask of the argument count inside the packed flags.
pub const PACKED_ARGCOUNT_MASK: u32 = 0xff;

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConstValue {
    /// `None`
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(#[serde(with = "crate::ast::decimal")] BigInt),
    /// Float
    Float(f64),
    /// Complex
    Complex {
        /// Real part
        re: f64,
        /// Imaginary part
        im: f64,
    },
    /// Text
    Str(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// `...`
    Ellipsis,
    /// Tuple of constants (keyword names, import lists)
    Tuple(Vec<ConstValue>),
    /// Nested code object
    Code(Box<CodeObject>),
}

impl ConstValue {
    /// String constant.
    pub fn str(s: impl Into<String>) -> Self {
        ConstValue::Str(s.into())
    }

    /// Nested code object, if this is one.
    pub fn as_code(&self) -> Option<&CodeObject> {
        match self {
            ConstValue::Code(code) => Some(code),
            _ => None,
        }
    }
}

impl From<&ast::Constant> for ConstValue {
    fn from(constant: &ast::Constant) -> Self {
        match constant {
            ast::Constant::None => ConstValue::None,
            ast::Constant::Bool(b) => ConstValue::Bool(*b),
            ast::Constant::Int(n) => ConstValue::Int(n.clone()),
            ast::Constant::Float(f) => ConstValue::Float(*f),
            ast::Constant::Complex { re, im } => ConstValue::Complex { re: *re, im: *im },
            ast::Constant::Str(s) => ConstValue::Str(s.clone()),
            ast::Constant::Bytes(b) => ConstValue::Bytes(b.clone()),
            ast::Constant::Ellipsis => ConstValue::Ellipsis,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::None => f.write_str("None"),
            ConstValue::Bool(true) => f.write_str("True"),
            ConstValue::Bool(false) => f.write_str("False"),
            ConstValue::Int(n) => write!(f, "{n}"),
            ConstValue::Float(x) => write!(f, "{x:?}"),
            ConstValue::Complex { re, im } => write!(f, "({re:?}+{im:?}j)"),
            ConstValue::Str(s) => write!(f, "{s:?}"),
            ConstValue::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            ConstValue::Ellipsis => f.write_str("Ellipsis"),
            ConstValue::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            ConstValue::Code(code) => write!(f, "<code {}>", code.name),
        }
    }
}

/// Deduplication key: the value together with its type, so `1`, `1.0` and
/// `True` stay distinct and `0.0` differs from `-0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    None,
    Bool(bool),
    Int(BigInt),
    Float(u64),
    Complex(u64, u64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<ConstKey>),
}

impl ConstKey {
    fn of(value: &ConstValue) -> Option<Self> {
        Some(match value {
            ConstValue::None => ConstKey::None,
            ConstValue::Bool(b) => ConstKey::Bool(*b),
            ConstValue::Int(n) => ConstKey::Int(n.clone()),
            ConstValue::Float(x) => ConstKey::Float(x.to_bits()),
            ConstValue::Complex { re, im } => ConstKey::Complex(re.to_bits(), im.to_bits()),
            ConstValue::Str(s) => ConstKey::Str(s.clone()),
            ConstValue::Bytes(b) => ConstKey::Bytes(b.clone()),
            ConstValue::Ellipsis => ConstKey::Ellipsis,
            ConstValue::Tuple(items) => {
                ConstKey::Tuple(items.iter().map(ConstKey::of).collect::<Option<_>>()?)
            }
            ConstValue::Code(_) => return None,
        })
    }
}

/// Order-preserving, deduplicating constant pool of one compilation unit.
#[derive(Debug, Default)]
pub struct ConstantPool {
    values: Vec<ConstValue>,
    index: FxHashMap<ConstKey, u32>,
}

impl ConstantPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `value`, adding it if needed. Code objects are
    /// never shared.
    pub fn add(&mut self, value: ConstValue) -> u32 {
        let next = self.values.len() as u32;
        match ConstKey::of(&value) {
            Some(key) => {
                let index = *self.index.entry(key).or_insert(next);
                if index == next {
                    self.values.push(value);
                }
                index
            }
            None => {
                self.values.push(value);
                next
            }
        }
    }

    /// Appends `value` at the next index even if an equal entry exists.
    /// Later `add` calls of an equal value reuse the first such slot.
    pub fn push(&mut self, value: ConstValue) -> u32 {
        let next = self.values.len() as u32;
        if let Some(key) = ConstKey::of(&value) {
            self.index.entry(key).or_insert(next);
        }
        self.values.push(value);
        next
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The entries, in index order.
    pub fn into_vec(self) -> Vec<ConstValue> {
        self.values
    }
}

/// Order-preserving name pool used by name-index operands.
#[derive(Debug, Default)]
pub struct NamePool {
    names: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl NamePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `name`, adding it if needed.
    pub fn add(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.index.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), index);
        index
    }

    /// The names, in index order.
    pub fn into_vec(self) -> Vec<String> {
        self.names
    }
}

/// One entry of the exception table. Offsets are in bytes from the start
/// of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExceptionHandler {
    /// First protected byte
    pub start: u32,
    /// Handler entry; the protected range ends here
    pub handler: u32,
    /// End of the handler code
    pub handler_end: u32,
    /// Register pair receiving the link value and the pending exception
    pub link_reg: u32,
}

/// A compiled module, function or class body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeObject {
    /// Function, class or module name
    pub name: String,
    /// Source file
    pub filename: String,
    /// First source line
    pub firstlineno: u32,
    /// Encoded instructions
    pub code: Vec<u8>,
    /// Constant pool
    pub consts: Vec<ConstValue>,
    /// Name pool
    pub names: Vec<String>,
    /// Register names: locals, cells and free variables
    pub varnames: Vec<String>,
    /// Local names captured by nested scopes
    pub cellvars: Vec<String>,
    /// Names captured from enclosing scopes
    pub freevars: Vec<String>,
    /// Positional parameters, positional-only included
    pub argcount: u32,
    /// Positional-only parameters
    pub posonlyargcount: u32,
    /// Keyword-only parameters
    pub kwonlyargcount: u32,
    /// Positional plus keyword-only parameters
    pub totalargcount: u32,
    /// Default-value pairs at the start of `free2reg`
    pub ndefaultargs: u32,
    /// Fixed registers
    pub nlocals: u32,
    /// Registers the frame needs
    pub framesize: u32,
    /// Inline cache slots
    pub nmeta: u32,
    /// Runtime flags
    #[serde(serialize_with = "code_flags")]
    pub flags: CodeFlags,
    /// Call-time flags
    #[serde(serialize_with = "packed_flags")]
    pub packed_flags: PackedFlags,
    /// Delta-encoded line table
    pub linetable: Vec<u8>,
    /// Exception handlers, innermost first
    pub exception_table: Vec<ExceptionHandler>,
    /// Register of each cell variable
    pub cell2reg: Vec<u32>,
    /// (enclosing register, own register) pairs: defaults, then free variables
    pub free2reg: Vec<(u32, u32)>,
}

fn code_flags<S: Serializer>(flags: &CodeFlags, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(flags.bits())
}

fn packed_flags<S: Serializer>(flags: &PackedFlags, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(flags.bits())
}

impl PackedFlags {
    /// Packs the call-time flags of a code object.
    pub fn compute(
        argcount: u32,
        totalargcount: u32,
        flags: CodeFlags,
        ncells: usize,
        nfree: usize,
    ) -> Self {
        let mut packed = if argcount <= PACKED_ARGCOUNT_MASK {
            PackedFlags::from_bits(argcount)
        } else {
            PackedFlags::OVERFLOW
        };
        packed.set(PackedFlags::HAS_CELLS, ncells > 0);
        packed.set(PackedFlags::HAS_FREEVARS, nfree > 0);
        packed.set(PackedFlags::VARARGS, flags.contains(CodeFlags::VARARGS));
        packed.set(PackedFlags::VARKEYWORDS, flags.contains(CodeFlags::VARKEYWORDS));
        packed.set(PackedFlags::KWD_ONLY_ARGS, totalargcount > argcount);
        packed.set(PackedFlags::LOCALS_DICT, !flags.contains(CodeFlags::NEWLOCALS));
        packed.set(PackedFlags::GENERATOR, flags.contains(CodeFlags::GENERATOR));
        packed
    }
}

impl CodeObject {
    /// Source line of the instruction at byte `offset`.
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        let mut addr = 0usize;
        let mut line = i64::from(self.firstlineno);
        for pair in self.linetable.chunks_exact(2) {
            addr += usize::from(pair[0]);
            if addr > offset {
                break;
            }
            line += i64::from(pair[1] as i8);
        }
        line as u32
    }

    /// Nested code objects in constant order.
    pub fn children(&self) -> impl Iterator<Item = &CodeObject> {
        self.consts.iter().filter_map(ConstValue::as_code)
    }

    /// Serializes the code object tree as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
