// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The instruction set.
//!
//! Numbers, mnemonics and immediate layouts are shared with the virtual
//! machine's dispatch table. The table is append-only: new opcodes take
//! unused numbers and existing entries never change. Opcode 255 is reserved
//! for the VM's register dump.

use pyreg_macros::{const_assert, intrinsics, opcodes};
use serde::Serialize;

/// Immediate operand kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Imm {
    /// Frame register
    Reg,
    /// Small literal (counts, comparison kinds, metaslots)
    Lit,
    /// Index into the name pool
    Str,
    /// Index into the constant pool
    Const,
    /// Signed offset in 4-byte units, relative to the instruction start
    Jump,
    /// 16-bit literal (packed argument counts)
    Imm16,
    /// First register of a callee frame
    Base,
    /// Intrinsic id
    Intrinsic,
}

impl Imm {
    /// Bytes the immediate takes in the compact encoding.
    pub const fn compact_size(self) -> usize {
        match self {
            Imm::Jump | Imm::Imm16 => 2,
            _ => 1,
        }
    }

    /// Whether `value` fits the compact encoding.
    pub fn fits_compact(self, value: i64) -> bool {
        match self {
            Imm::Jump => i16::try_from(value).is_ok(),
            Imm::Imm16 => u16::try_from(value).is_ok(),
            _ => u8::try_from(value).is_ok(),
        }
    }
}

opcodes! {
    /// Bytecode operations.
    Opcode: u8 => Imm {
        ClearAcc = 1, "CLEAR_ACC", [];
        ClearFast = 2, "CLEAR_FAST", [Reg];
        Alias = 3, "ALIAS", [Reg, Reg];
        Copy = 4, "COPY", [Reg, Reg];
        Move = 5, "MOVE", [Reg, Reg];
        FuncHeader = 6, "FUNC_HEADER", [Lit];
        MethodHeader = 7, "METHOD_HEADER", [];
        CFuncHeader = 9, "CFUNC_HEADER", [];
        CFuncHeaderNoArgs = 10, "CFUNC_HEADER_NOARGS", [];
        CFuncHeaderO = 11, "CFUNC_HEADER_O", [];
        CMethodNoArgs = 12, "CMETHOD_NOARGS", [];
        CMethodO = 13, "CMETHOD_O", [];
        FuncTpCallHeader = 14, "FUNC_TPCALL_HEADER", [];
        UnaryPositive = 15, "UNARY_POSITIVE", [];
        UnaryNegative = 16, "UNARY_NEGATIVE", [];
        UnaryNot = 17, "UNARY_NOT", [];
        UnaryNotFast = 18, "UNARY_NOT_FAST", [];
        UnaryInvert = 19, "UNARY_INVERT", [];
        BinaryMatrixMultiply = 20, "BINARY_MATRIX_MULTIPLY", [Reg];
        BinaryPower = 21, "BINARY_POWER", [Reg];
        BinaryMultiply = 22, "BINARY_MULTIPLY", [Reg];
        BinaryModulo = 23, "BINARY_MODULO", [Reg];
        BinaryAdd = 24, "BINARY_ADD", [Reg];
        BinarySubtract = 25, "BINARY_SUBTRACT", [Reg];
        BinarySubscr = 26, "BINARY_SUBSCR", [Reg];
        BinaryFloorDivide = 27, "BINARY_FLOOR_DIVIDE", [Reg];
        BinaryTrueDivide = 28, "BINARY_TRUE_DIVIDE", [Reg];
        BinaryLshift = 29, "BINARY_LSHIFT", [Reg];
        BinaryRshift = 30, "BINARY_RSHIFT", [Reg];
        BinaryAnd = 31, "BINARY_AND", [Reg];
        BinaryXor = 32, "BINARY_XOR", [Reg];
        BinaryOr = 33, "BINARY_OR", [Reg];
        IsOp = 34, "IS_OP", [Reg];
        ContainsOp = 35, "CONTAINS_OP", [Reg];
        CompareOp = 36, "COMPARE_OP", [Lit, Reg];
        InplaceFloorDivide = 37, "INPLACE_FLOOR_DIVIDE", [Reg];
        InplaceTrueDivide = 38, "INPLACE_TRUE_DIVIDE", [Reg];
        InplaceAdd = 39, "INPLACE_ADD", [Reg];
        InplaceSubtract = 40, "INPLACE_SUBTRACT", [Reg];
        InplaceMultiply = 41, "INPLACE_MULTIPLY", [Reg];
        InplaceLshift = 42, "INPLACE_LSHIFT", [Reg];
        InplaceRshift = 43, "INPLACE_RSHIFT", [Reg];
        InplaceAnd = 44, "INPLACE_AND", [Reg];
        InplaceXor = 45, "INPLACE_XOR", [Reg];
        InplaceOr = 46, "INPLACE_OR", [Reg];
        InplaceModulo = 47, "INPLACE_MODULO", [Reg];
        InplaceMatrixMultiply = 48, "INPLACE_MATRIX_MULTIPLY", [Reg];
        InplacePower = 49, "INPLACE_POWER", [Reg];
        LoadFast = 50, "LOAD_FAST", [Reg];
        LoadName = 51, "LOAD_NAME", [Str, Lit];
        LoadConst = 52, "LOAD_CONST", [Const];
        LoadAttr = 53, "LOAD_ATTR", [Reg, Str, Lit];
        LoadGlobal = 54, "LOAD_GLOBAL", [Str, Lit];
        LoadMethod = 55, "LOAD_METHOD", [Reg, Str, Lit];
        LoadDeref = 56, "LOAD_DEREF", [Reg];
        LoadClassDeref = 57, "LOAD_CLASSDEREF", [Reg, Str];
        StoreFast = 58, "STORE_FAST", [Reg];
        StoreName = 59, "STORE_NAME", [Str];
        StoreAttr = 60, "STORE_ATTR", [Reg, Str];
        StoreGlobal = 61, "STORE_GLOBAL", [Str];
        StoreSubscr = 62, "STORE_SUBSCR", [Reg, Reg];
        StoreDeref = 63, "STORE_DEREF", [Reg];
        DeleteFast = 64, "DELETE_FAST", [Reg];
        DeleteName = 65, "DELETE_NAME", [Str];
        DeleteAttr = 66, "DELETE_ATTR", [Str];
        DeleteGlobal = 67, "DELETE_GLOBAL", [Str];
        DeleteSubscr = 68, "DELETE_SUBSCR", [Reg];
        DeleteDeref = 69, "DELETE_DEREF", [Reg];
        CallFunction = 70, "CALL_FUNCTION", [Base, Imm16];
        CallFunctionEx = 71, "CALL_FUNCTION_EX", [Base];
        CallMethod = 72, "CALL_METHOD", [Base, Imm16];
        CallIntrinsic1 = 73, "CALL_INTRINSIC_1", [Intrinsic];
        CallIntrinsicN = 74, "CALL_INTRINSIC_N", [Intrinsic, Base, Lit];
        ReturnValue = 75, "RETURN_VALUE", [];
        Raise = 76, "RAISE", [];
        YieldValue = 77, "YIELD_VALUE", [];
        YieldFrom = 78, "YIELD_FROM", [Reg];
        Jump = 79, "JUMP", [Jump];
        JumpIfFalse = 80, "JUMP_IF_FALSE", [Jump];
        JumpIfTrue = 81, "JUMP_IF_TRUE", [Jump];
        JumpIfNotExcMatch = 82, "JUMP_IF_NOT_EXC_MATCH", [Reg, Jump];
        PopJumpIfFalse = 83, "POP_JUMP_IF_FALSE", [Jump];
        PopJumpIfTrue = 84, "POP_JUMP_IF_TRUE", [Jump];
        GetIter = 85, "GET_ITER", [Reg];
        GetYieldFromIter = 86, "GET_YIELD_FROM_ITER", [Reg];
        ForIter = 87, "FOR_ITER", [Reg, Jump];
        ImportName = 88, "IMPORT_NAME", [Const];
        ImportFrom = 89, "IMPORT_FROM", [Reg, Str];
        ImportStar = 90, "IMPORT_STAR", [Reg];
        BuildSlice = 91, "BUILD_SLICE", [Reg];
        BuildTuple = 92, "BUILD_TUPLE", [Reg, Lit];
        BuildList = 93, "BUILD_LIST", [Reg, Lit];
        BuildSet = 94, "BUILD_SET", [Reg, Lit];
        BuildMap = 95, "BUILD_MAP", [Lit];
        EndExcept = 96, "END_EXCEPT", [Reg];
        CallFinally = 97, "CALL_FINALLY", [Reg, Jump];
        EndFinally = 98, "END_FINALLY", [Reg];
        LoadBuildClass = 99, "LOAD_BUILD_CLASS", [];
        GetAwaitable = 100, "GET_AWAITABLE", [Reg, Lit];
        GetAiter = 101, "GET_AITER", [Reg];
        GetAnext = 102, "GET_ANEXT", [Reg];
        EndAsyncWith = 103, "END_ASYNC_WITH", [Reg];
        EndAsyncFor = 104, "END_ASYNC_FOR", [Reg];
        Unpack = 105, "UNPACK", [Reg, Lit, Lit];
        MakeFunction = 106, "MAKE_FUNCTION", [Const];
        SetupWith = 107, "SETUP_WITH", [Reg];
        EndWith = 108, "END_WITH", [Reg];
        SetupAsyncWith = 109, "SETUP_ASYNC_WITH", [Reg];
        ListExtend = 110, "LIST_EXTEND", [Reg];
        ListAppend = 111, "LIST_APPEND", [Reg];
        SetAdd = 112, "SET_ADD", [Reg];
        SetUpdate = 113, "SET_UPDATE", [Reg];
        DictMerge = 114, "DICT_MERGE", [Reg];
        DictUpdate = 115, "DICT_UPDATE", [Reg];
        SetupAnnotations = 116, "SETUP_ANNOTATIONS", [];
        SetFuncAnnotations = 117, "SET_FUNC_ANNOTATIONS", [Reg];
        Wide = 118, "WIDE", [];
    }
}

intrinsics! {
    /// VM helpers reachable through `CALL_INTRINSIC_1` / `CALL_INTRINSIC_N`.
    Intrinsic: u8 {
        Str = 1, "PyObject_Str", Some(1);
        Repr = 2, "PyObject_Repr", Some(1);
        Ascii = 3, "PyObject_ASCII", Some(1);
        FormatValue = 4, "vm_format_value", Some(1);
        FormatValueSpec = 5, "vm_format_value_spec", Some(2);
        BuildString = 6, "vm_build_string", None;
        ListToTuple = 7, "PyList_AsTuple", Some(1);
        RaiseAssertionError = 8, "vm_raise_assertion_error", Some(1);
        ExcSetCause = 9, "vm_exc_set_cause", Some(2);
        Print = 10, "vm_print", Some(1);
        AsyncGenValueWrapper = 11, "_PyAsyncGenValueWrapperNew", Some(1);
    }
}

/// Opcode number the VM reserves for dumping registers.
pub const DEBUG_REGS: u8 = 255;

/// Width of one instruction unit in bytes.
pub const UNIT: usize = 4;

const_assert!((Opcode::Wide as u8) < DEBUG_REGS, "opcode 255 is reserved");

impl Opcode {
    /// Whether control never falls through to the next instruction.
    pub const fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Jump | Opcode::ReturnValue | Opcode::Raise)
    }

    /// Index of the jump immediate, if the instruction has one.
    pub fn jump_operand(&self) -> Option<usize> {
        self.imms().iter().position(|imm| *imm == Imm::Jump)
    }

    /// Encoded size in bytes, compact or wide.
    pub fn size(&self, wide: bool) -> usize {
        if wide {
            UNIT + UNIT * self.imms().len()
        } else {
            UNIT
        }
    }
}

/// One row of the exported opcode table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpcodeRow {
    /// Opcode number
    pub number: u8,
    /// Mnemonic
    pub mnemonic: &'static str,
    /// Immediate kinds in encoding order
    pub imms: &'static [Imm],
}

/// One row of the exported intrinsic table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntrinsicRow {
    /// Intrinsic id
    pub id: u8,
    /// C helper name
    pub name: &'static str,
    /// Fixed argument count, absent for variadic helpers
    pub arity: Option<u8>,
}

/// The opcode table as data, for the native dispatch-table generator.
pub fn opcode_table() -> Vec<OpcodeRow> {
    Opcode::all()
        .iter()
        .map(|op| OpcodeRow {
            number: *op as u8,
            mnemonic: op.mnemonic(),
            imms: op.imms(),
        })
        .collect()
}

/// The intrinsic table as data.
pub fn intrinsic_table() -> Vec<IntrinsicRow> {
    Intrinsic::all()
        .iter()
        .map(|i| IntrinsicRow {
            id: *i as u8,
            name: i.name(),
            arity: i.arity(),
        })
        .collect()
}
