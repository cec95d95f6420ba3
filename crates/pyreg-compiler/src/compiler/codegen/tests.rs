// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for the code generator.
//!
//! Module bodies keep `<locals>` in r0, so their temporaries start at r1.

use pyreg_macros::{assert_contains, assert_matches, assert_ok, assert_run};

use super::generate;
use crate::ast::{self as a, BinOperator, CmpOperator};
use crate::compiler::code::{CodeFlags, CodeObject, ConstValue, PackedFlags};
use crate::compiler::disasm::{disassemble, DecodedInstr, Disassembly};
use crate::compiler::opcode::{Intrinsic, Opcode};
use crate::compiler::scope::ScopeTable;
use crate::config::CompileOptions;
use crate::desugar::desugar;
use crate::error::{CompileError, Result};

fn compile_with(body: Vec<a::Stmt>, options: &CompileOptions) -> Result<CodeObject> {
    let module = desugar(&a::Module { body }, options);
    let table = ScopeTable::build(&module)?;
    generate(&module, &table, options)
}

fn compile(body: Vec<a::Stmt>) -> Result<CodeObject> {
    compile_with(body, &CompileOptions::default())
}

fn compile_ok(body: Vec<a::Stmt>) -> CodeObject {
    assert_ok!(compile(body))
}

fn dis(code: &CodeObject) -> Disassembly {
    assert_ok!(disassemble(code))
}

fn child<'c>(code: &'c CodeObject, name: &str) -> &'c CodeObject {
    code.children()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no nested code object '{name}' in {}", code.name))
}

fn name_index(code: &CodeObject, name: &str) -> i64 {
    code.names
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("'{name}' not in names {:?}", code.names)) as i64
}

fn only(d: &Disassembly, opcode: Opcode) -> &DecodedInstr {
    let found: Vec<_> = d.find(opcode).collect();
    assert_eq!(found.len(), 1, "expected one {opcode} in {d}");
    found[0]
}

fn syntax_message(result: Result<CodeObject>) -> String {
    match result {
        Err(CompileError::Syntax { message, .. }) => message,
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

// ============================================================================
// Module bodies
// ============================================================================

#[test]
fn test_compile_empty_module() {
    let code = compile_ok(vec![]);
    let d = dis(&code);
    assert_eq!(d.mnemonics(), ["FUNC_HEADER", "LOAD_CONST", "RETURN_VALUE"]);
    assert_eq!(code.consts, vec![ConstValue::None]);
    assert_eq!(code.name, "<module>");
    assert!(code.flags.is_empty());
}

#[test]
fn test_compile_module_assignment() {
    // x = 1 + 2
    let code = compile_ok(vec![a::assign(
        a::name("x"),
        a::binop(a::int(1), BinOperator::Add, a::int(2)),
    )
    .at(1)]);
    let d = dis(&code);
    assert_eq!(
        d.mnemonics(),
        [
            "FUNC_HEADER",
            "LOAD_CONST",
            "STORE_FAST",
            "LOAD_CONST",
            "BINARY_ADD",
            "CLEAR_FAST",
            "STORE_NAME",
            "LOAD_CONST",
            "RETURN_VALUE",
        ]
    );
    assert_contains!(code.consts, &ConstValue::Int(1.into()));
    assert_contains!(code.consts, &ConstValue::Int(2.into()));
    assert_eq!(only(&d, Opcode::StoreName).operands, vec![name_index(&code, "x")]);
    assert_eq!(only(&d, Opcode::BinaryAdd).operands, vec![1]);
    assert_eq!(code.framesize, 2);
}

#[test]
fn test_compile_constant_statement_is_dropped() {
    let code = compile_ok(vec![a::expr_stmt(a::int(7)).at(1)]);
    assert_eq!(dis(&code).mnemonics(), ["FUNC_HEADER", "LOAD_CONST", "RETURN_VALUE"]);
}

#[test]
fn test_compile_expression_statement_clears_acc() {
    let code = compile_ok(vec![a::expr_stmt(a::name("x")).at(1)]);
    assert_run!(dis(&code).mnemonics(), ["LOAD_NAME", "CLEAR_ACC"]);
}

#[test]
fn test_compile_interactive_prints() {
    let options = CompileOptions {
        interactive: true,
        ..CompileOptions::default()
    };
    let code = assert_ok!(compile_with(vec![a::expr_stmt(a::name("x")).at(1)], &options));
    let d = dis(&code);
    assert_run!(d.mnemonics(), ["LOAD_NAME", "CALL_INTRINSIC_1", "CLEAR_ACC"]);
    assert_eq!(
        only(&d, Opcode::CallIntrinsic1).operands,
        vec![i64::from(Intrinsic::Print as u8)]
    );
}

#[test]
fn test_compile_module_docstring() {
    let code = compile_ok(vec![
        a::expr_stmt(a::string("About.")).at(1),
        a::pass().at(2),
    ]);
    let d = dis(&code);
    assert_run!(d.mnemonics(), ["LOAD_CONST", "STORE_NAME"]);
    assert_eq!(code.names, vec!["__doc__"]);
    assert_contains!(code.consts, &ConstValue::str("About."));
}

#[test]
fn test_compile_global_loads_share_metaslot() {
    let code = compile_ok(vec![
        a::expr_stmt(a::name("x")).at(1),
        a::expr_stmt(a::name("x")).at(2),
        a::expr_stmt(a::name("y")).at(3),
    ]);
    let d = dis(&code);
    let loads: Vec<_> = d.find(Opcode::LoadName).collect();
    assert_eq!(loads.len(), 3);
    assert_eq!(loads[0].operands[1], loads[1].operands[1]);
    assert_ne!(loads[0].operands[1], loads[2].operands[1]);
    assert_eq!(code.nmeta, 4);
}

// ============================================================================
// Functions and closures
// ============================================================================

#[test]
fn test_compile_simple_function() {
    // def f(a): return a + 1
    let code = compile_ok(vec![a::def(
        "f",
        a::params(&["a"]),
        vec![a::ret(Some(a::binop(a::name("a"), BinOperator::Add, a::int(1)))).at(2)],
    )
    .at(1)]);
    assert_run!(dis(&code).mnemonics(), ["MAKE_FUNCTION", "STORE_NAME"]);

    let f = child(&code, "f");
    assert_eq!(f.argcount, 1);
    assert!(f.freevars.is_empty());
    assert!(f.cellvars.is_empty());
    assert_eq!(f.varnames, vec!["a"]);
    assert_eq!(f.consts[0], ConstValue::None);
    assert_eq!(f.consts[1], ConstValue::str("f"));
    assert!(f.flags.contains(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS));

    let d = dis(f);
    assert_eq!(
        d.mnemonics(),
        ["FUNC_HEADER", "LOAD_CONST", "BINARY_ADD", "RETURN_VALUE"]
    );
    assert_eq!(only(&d, Opcode::BinaryAdd).operands, vec![0]);
}

#[test]
fn test_function_none_shares_header_slot() {
    // def f(): return None
    let code = compile_ok(vec![
        a::def("f", a::params(&[]), vec![a::ret(Some(a::none())).at(2)]).at(1),
    ]);
    let f = child(&code, "f");
    assert_eq!(f.consts, vec![ConstValue::None, ConstValue::str("f")]);
    assert_eq!(only(&dis(f), Opcode::LoadConst).operands, vec![0]);
}

#[test]
fn test_compile_closure_cells() {
    // def outer(a):
    //     def inner(): return a
    //     return inner
    let code = compile_ok(vec![a::def(
        "outer",
        a::params(&["a"]),
        vec![
            a::def("inner", a::params(&[]), vec![a::ret(Some(a::name("a"))).at(3)]).at(2),
            a::ret(Some(a::name("inner"))).at(4),
        ],
    )
    .at(1)]);
    let outer = child(&code, "outer");
    let inner = child(outer, "inner");

    assert_eq!(outer.cellvars, vec!["a"]);
    assert_eq!(inner.freevars, vec!["a"]);
    let cell = outer.cell2reg[0];
    let own = inner.varnames.iter().position(|n| n == "a").unwrap() as u32;
    assert_eq!(inner.free2reg, vec![(cell, own)]);
    assert_eq!(inner.ndefaultargs, 0);
    assert!(inner.flags.contains(CodeFlags::NESTED));
    assert!(inner.packed_flags.contains(PackedFlags::HAS_FREEVARS));
    assert!(outer.packed_flags.contains(PackedFlags::HAS_CELLS));
    assert_eq!(inner.consts[1], ConstValue::str("outer.<locals>.inner"));
    assert_contains!(dis(inner).mnemonics(), &"LOAD_DEREF");
}

#[test]
fn test_compile_nonlocal_shares_register() {
    // def outer():
    //     x = 1
    //     def inner():
    //         nonlocal x
    //         x = 2
    //     inner()
    //     return x
    let code = compile_ok(vec![a::def(
        "outer",
        a::params(&[]),
        vec![
            a::assign(a::name("x"), a::int(1)).at(2),
            a::def(
                "inner",
                a::params(&[]),
                vec![a::nonlocal(&["x"]).at(4), a::assign(a::name("x"), a::int(2)).at(5)],
            )
            .at(3),
            a::expr_stmt(a::call(a::name("inner"), vec![])).at(6),
            a::ret(Some(a::name("x"))).at(7),
        ],
    )
    .at(1)]);
    let outer = child(&code, "outer");
    let inner = child(outer, "inner");
    let cell = outer.cell2reg[0];

    let inner_dis = dis(inner);
    let store = only(&inner_dis, Opcode::StoreDeref);
    assert_eq!(inner.free2reg, vec![(cell, store.operands[0] as u32)]);

    let outer_dis = dis(outer);
    let load = only(&outer_dis, Opcode::LoadDeref);
    assert_eq!(load.operands, vec![i64::from(cell)]);
    let call = only(&outer_dis, Opcode::CallFunction);
    assert!(load.offset > call.offset);
}

#[test]
fn test_compile_defaults_become_register_pairs() {
    // def f(a, b=1, *, c=2, d): pass
    let mut params = a::params(&["a", "b"]);
    params.defaults = vec![a::int(1)];
    params.kwonlyargs = vec!["c".into(), "d".into()];
    params.kw_defaults = vec![Some(a::int(2)), None];
    let code = compile_ok(vec![a::def("f", params, vec![a::pass().at(2)]).at(1)]);
    let f = child(&code, "f");

    assert_eq!(f.argcount, 2);
    assert_eq!(f.kwonlyargcount, 2);
    assert_eq!(f.totalargcount, 4);
    assert_eq!(f.ndefaultargs, 2);
    assert_eq!(f.free2reg, vec![(1, 1), (2, 2)]);
    assert!(f.packed_flags.contains(PackedFlags::KWD_ONLY_ARGS));
    assert_run!(
        dis(&code).mnemonics(),
        ["MAKE_FUNCTION", "CLEAR_FAST", "CLEAR_FAST", "STORE_NAME"]
    );
}

#[test]
fn test_compile_parameter_register_order() {
    // def f(p, /, a, *args, k, **kw): pass
    let params = a::Arguments {
        posonlyargs: vec!["p".into()],
        args: vec!["a".into()],
        vararg: Some("args".into()),
        kwonlyargs: vec!["k".into()],
        kw_defaults: vec![None],
        kwarg: Some("kw".into()),
        defaults: vec![],
    };
    let code = compile_ok(vec![a::def("f", params, vec![a::pass()])]);
    let f = child(&code, "f");
    assert_eq!(f.varnames, vec!["p", "a", "k", "args", "kw"]);
    assert_eq!(f.posonlyargcount, 1);
    assert!(f.flags.contains(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS));
}

#[test]
fn test_compile_generator_flag() {
    let code = compile_ok(vec![a::def(
        "g",
        a::params(&[]),
        vec![a::expr_stmt(a::yield_(Some(a::int(1))))],
    )]);
    let g = child(&code, "g");
    assert!(g.flags.contains(CodeFlags::GENERATOR));
    assert!(g.packed_flags.contains(PackedFlags::GENERATOR));
    assert_run!(dis(g).mnemonics(), ["LOAD_CONST", "YIELD_VALUE", "CLEAR_ACC"]);
}

#[test]
fn test_compile_list_comprehension() {
    // squares = [x * x for x in xs]
    let comp = a::list_comp(
        a::binop(a::name("x"), BinOperator::Mult, a::name("x")),
        vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
    );
    let code = compile_ok(vec![a::assign(a::name("squares"), comp).at(1)]);
    let d = dis(&code);
    assert_run!(d.mnemonics(), ["LOAD_NAME", "GET_ITER", "CALL_FUNCTION"]);

    let listcomp = child(&code, "<listcomp>");
    assert_eq!(listcomp.argcount, 1);
    let inner = dis(listcomp);
    assert_contains!(inner.mnemonics(), &"BUILD_LIST");
    assert_contains!(inner.mnemonics(), &"LIST_APPEND");
    assert_contains!(inner.mnemonics(), &"FOR_ITER");
}

#[test]
fn test_named_expr_in_comprehension_binds_outside() {
    // [(y := x) for x in xs]
    let comp = a::list_comp(
        a::named_expr("y", a::name("x")),
        vec![a::comp_for(a::name("x"), a::name("xs"), vec![])],
    );
    let code = compile_ok(vec![a::expr_stmt(comp.clone()).at(1)]);
    let listcomp = child(&code, "<listcomp>");
    let d = dis(listcomp);
    assert_eq!(only(&d, Opcode::StoreGlobal).operands[0], name_index(listcomp, "y"));
    assert!(!listcomp.varnames.iter().any(|n| n == "y"));

    // def f(xs):
    //     return [(y := x) for x in xs]
    let code = compile_ok(vec![
        a::def("f", a::params(&["xs"]), vec![a::ret(Some(comp)).at(2)]).at(1),
    ]);
    let f = child(&code, "f");
    assert!(f.cellvars.iter().any(|n| n == "y"));
    let listcomp = child(f, "<listcomp>");
    assert_eq!(listcomp.freevars, vec!["y"]);
    assert_eq!(dis(listcomp).find(Opcode::StoreDeref).count(), 1);
}

// ============================================================================
// Classes
// ============================================================================

#[test]
fn test_compile_class_body() {
    let code = compile_ok(vec![a::class("C", vec![a::name("Base")], vec![a::pass().at(2)]).at(1)]);
    let d = dis(&code);
    assert_run!(d.mnemonics(), ["LOAD_BUILD_CLASS", "STORE_FAST", "MAKE_FUNCTION"]);
    assert_eq!(only(&d, Opcode::CallFunction).operands[1], 3);

    let body = child(&code, "C");
    assert_eq!(body.argcount, 0);
    assert!(body.flags.is_empty());
    assert_eq!(body.names, vec!["__name__", "__module__", "__qualname__"]);
    assert_run!(dis(body).mnemonics(), ["LOAD_CONST", "RETURN_VALUE"]);
}

#[test]
fn test_compile_class_cell_returned() {
    // class C:
    //     def f(self): return super()
    let code = compile_ok(vec![a::class(
        "C",
        vec![],
        vec![a::def(
            "f",
            a::params(&["self"]),
            vec![a::ret(Some(a::call(a::name("super"), vec![])))],
        )],
    )]);
    let body = child(&code, "C");
    assert_contains!(body.names, &"__classcell__".to_string());
    assert_run!(
        dis(body).mnemonics(),
        ["LOAD_FAST", "STORE_NAME", "LOAD_FAST", "RETURN_VALUE"]
    );
    let method = child(body, "f");
    assert_eq!(method.consts[1], ConstValue::str("C.f"));
}

#[test]
fn test_compile_private_names_mangled() {
    // class C:
    //     __x = 1
    //     __dunder__ = 2
    //     def m(self): return self.__y
    let code = compile_ok(vec![a::class(
        "C",
        vec![],
        vec![
            a::assign(a::name("__x"), a::int(1)),
            a::assign(a::name("__dunder__"), a::int(2)),
            a::def(
                "m",
                a::params(&["self"]),
                vec![a::ret(Some(a::attr(a::name("self"), "__y")))],
            ),
        ],
    )]);
    let body = child(&code, "C");
    assert_contains!(body.names, &"_C__x".to_string());
    assert_contains!(body.names, &"__dunder__".to_string());
    assert!(!body.names.contains(&"__x".to_string()));

    let method = child(body, "m");
    let d = dis(method);
    let load = only(&d, Opcode::LoadAttr);
    assert_eq!(load.operands[1], name_index(method, "_C__y"));
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_compile_call_layout() {
    // f(1, k=2)
    let call = a::call_kw(a::name("f"), vec![a::int(1)], vec![a::keyword(Some("k"), a::int(2))]);
    let code = compile_ok(vec![a::expr_stmt(call).at(1)]);
    let d = dis(&code);
    // Keyword value in r1, names in r2, callee in base - 1.
    assert_eq!(only(&d, Opcode::CallFunction).operands, vec![7, 1 | (1 << 8)]);
    assert_contains!(code.consts, &ConstValue::Tuple(vec![ConstValue::str("k")]));
    assert_eq!(code.framesize, 8);
}

#[test]
fn test_compile_method_call() {
    // o.m(1)
    let call = a::call(a::attr(a::name("o"), "m"), vec![a::int(1)]);
    let code = compile_ok(vec![a::expr_stmt(call).at(1)]);
    let d = dis(&code);
    assert_run!(
        d.mnemonics(),
        ["LOAD_NAME", "LOAD_METHOD", "LOAD_CONST", "STORE_FAST", "CALL_METHOD"]
    );
    assert_eq!(only(&d, Opcode::LoadMethod).operands[0], 4);
    assert_eq!(only(&d, Opcode::CallMethod).operands, vec![5, 2]);
}

#[test]
fn test_compile_starred_call_uses_ex() {
    // f(*args, **kw)
    let call = a::call_kw(
        a::name("f"),
        vec![a::starred(a::name("args"))],
        vec![a::keyword(None, a::name("kw"))],
    );
    let code = compile_ok(vec![a::expr_stmt(call).at(1)]);
    let d = dis(&code);
    let ex = only(&d, Opcode::CallFunctionEx);
    assert_eq!(ex.operands, vec![7]);
    // Argument tuple in base - 6, keyword dict in base - 5.
    let stores: Vec<i64> = d.find(Opcode::StoreFast).map(|i| i.operands[0]).collect();
    assert_eq!(stores, vec![6, 1, 2]);
}

#[test]
fn test_compile_duplicate_keyword() {
    let call = a::call_kw(
        a::name("f"),
        vec![],
        vec![a::keyword(Some("k"), a::int(1)), a::keyword(Some("k"), a::int(2).at(1))],
    );
    let message = syntax_message(compile(vec![a::expr_stmt(call)]));
    assert_eq!(message, "keyword argument repeated: k");
}

// ============================================================================
// Assignment
// ============================================================================

#[test]
fn test_import_name_indexes_constant_tuple() {
    // import os
    let import: a::Stmt = a::StmtKind::Import {
        names: vec![a::Alias {
            name: "os".into(),
            asname: None,
        }],
    }
    .into();
    let code = compile_ok(vec![import.at(1)]);
    let d = dis(&code);
    let index = only(&d, Opcode::ImportName).operands[0] as usize;
    assert_eq!(
        code.consts[index],
        ConstValue::Tuple(vec![
            ConstValue::str("os"),
            ConstValue::None,
            ConstValue::Int(0.into()),
        ])
    );
    assert_eq!(only(&d, Opcode::StoreName).operands[0], name_index(&code, "os"));
}

#[test]
fn test_compile_starred_unpack() {
    // a, *b = x
    let target = a::tuple(vec![a::name("a"), a::starred(a::name("b"))]);
    let code = compile_ok(vec![a::assign(target, a::name("x")).at(1)]);
    let d = dis(&code);
    assert_eq!(only(&d, Opcode::Unpack).operands, vec![1, 1, 1]);
    let stores: Vec<i64> = d.find(Opcode::StoreName).map(|i| i.operands[0]).collect();
    assert_eq!(stores, vec![name_index(&code, "a"), name_index(&code, "b")]);
    // The last target sits at the base register.
    let loads: Vec<i64> = d.find(Opcode::LoadFast).map(|i| i.operands[0]).collect();
    assert_eq!(loads, vec![2, 1]);
}

#[test]
fn test_compile_fast_unpack_moves() {
    // def f(x): a, b = x
    let target = a::tuple(vec![a::name("a"), a::name("b")]);
    let code = compile_ok(vec![a::def(
        "f",
        a::params(&["x"]),
        vec![a::assign(target, a::name("x"))],
    )]);
    let d = dis(child(&code, "f"));
    assert_eq!(only(&d, Opcode::Unpack).operands, vec![3, 2, 0]);
    let moves: Vec<Vec<i64>> = d.find(Opcode::Move).map(|i| i.operands.clone()).collect();
    assert_eq!(moves, vec![vec![1, 4], vec![2, 3]]);
}

#[test]
fn test_compile_multiple_starred_targets() {
    let target = a::tuple(vec![a::starred(a::name("a")), a::starred(a::name("b"))]);
    let message = syntax_message(compile(vec![a::assign(target, a::name("x"))]));
    assert_eq!(message, "multiple starred expressions in assignment");
}

#[test]
fn test_compile_lone_starred_target() {
    let message = syntax_message(compile(vec![a::assign(
        a::starred(a::name("a")),
        a::name("x"),
    )]));
    assert_eq!(message, "starred assignment target must be in a list or tuple");
}

#[test]
fn test_compile_augmented_subscript() {
    // d[k] += 1
    let target = a::subscript(a::name("d"), a::name("k"));
    let code = compile_ok(vec![a::aug_assign(target, BinOperator::Add, a::int(1)).at(1)]);
    assert_run!(
        dis(&code).mnemonics(),
        ["BINARY_SUBSCR", "STORE_FAST", "LOAD_CONST", "INPLACE_ADD", "CLEAR_FAST", "STORE_SUBSCR"]
    );
}

#[test]
fn test_compile_compare_chain() {
    // a < b < c
    let chain = a::Expr::from(a::ExprKind::Compare {
        left: Box::new(a::name("a")),
        ops: vec![CmpOperator::Lt, CmpOperator::Lt],
        comparators: vec![a::name("b"), a::name("c")],
    });
    let code = compile_ok(vec![a::expr_stmt(chain).at(1)]);
    let d = dis(&code);
    assert_run!(
        d.mnemonics(),
        ["COMPARE_OP", "JUMP_IF_FALSE", "CLEAR_ACC", "MOVE"]
    );
    assert_eq!(d.find(Opcode::CompareOp).count(), 2);
    let clears: Vec<i64> = d.find(Opcode::ClearFast).map(|i| i.operands[0]).collect();
    assert_eq!(clears, vec![2, 1]);
}

#[test]
fn test_compile_is_not() {
    let code = compile_ok(vec![a::expr_stmt(a::compare(
        a::name("a"),
        CmpOperator::IsNot,
        a::none(),
    ))]);
    assert_run!(dis(&code).mnemonics(), ["IS_OP", "UNARY_NOT_FAST"]);
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_compile_for_loop_shape() {
    // for i in range(3): pass
    let code = compile_ok(vec![a::for_(
        a::name("i"),
        a::call(a::name("range"), vec![a::int(3)]),
        vec![a::pass().at(1)],
        vec![],
    )
    .at(1)]);
    let d = dis(&code);
    let get_iter = only(&d, Opcode::GetIter);
    let jump = only(&d, Opcode::Jump);
    let for_iter = only(&d, Opcode::ForIter);

    assert!(get_iter.offset < jump.offset);
    assert_eq!(jump.jump_target(), Some(for_iter.offset));
    // Loop top is the target binding right after the initial jump.
    let top = d
        .instructions
        .iter()
        .find(|i| i.offset > jump.offset)
        .unwrap();
    assert_eq!(top.opcode, Opcode::StoreName);
    assert_eq!(for_iter.jump_target(), Some(top.offset));
    assert_eq!(for_iter.operands[0], get_iter.operands[0]);

    let tail: Vec<_> = d
        .instructions
        .iter()
        .filter(|i| i.offset > for_iter.offset)
        .map(|i| i.opcode)
        .collect();
    assert_eq!(tail, vec![Opcode::LoadConst, Opcode::ReturnValue]);
}

#[test]
fn test_compile_while_loop_tests_at_bottom() {
    // while x: x = x - 1
    let code = compile_ok(vec![a::while_(
        a::name("x"),
        vec![a::assign(a::name("x"), a::binop(a::name("x"), BinOperator::Sub, a::int(1)))],
        vec![],
    )]);
    let d = dis(&code);
    let jump = only(&d, Opcode::Jump);
    let back = only(&d, Opcode::PopJumpIfTrue);
    assert!(back.offset > jump.offset);
    assert_eq!(back.jump_target(), Some(jump.offset + 4));
}

#[test]
fn test_compile_break_clears_iterator() {
    // for i in xs: break
    let code = compile_ok(vec![a::for_(
        a::name("i"),
        a::name("xs"),
        vec![a::break_()],
        vec![],
    )]);
    let d = dis(&code);
    let for_iter = only(&d, Opcode::ForIter);
    assert_run!(d.mnemonics(), ["STORE_NAME", "CLEAR_FAST", "JUMP"]);
    let clear = only(&d, Opcode::ClearFast);
    assert_eq!(clear.operands[0], for_iter.operands[0]);
}

#[test]
fn test_compile_continue_jumps_to_next() {
    // while x: continue
    let code = compile_ok(vec![a::while_(a::name("x"), vec![a::continue_()], vec![])]);
    let d = dis(&code);
    let jumps: Vec<_> = d.find(Opcode::Jump).collect();
    assert_eq!(jumps.len(), 2);
    assert_eq!(jumps[0].jump_target(), jumps[1].jump_target());
}

#[test]
fn test_compile_break_outside_loop() {
    let message = syntax_message(compile(vec![a::break_().at(3)]));
    assert_eq!(message, "'break' outside loop");
}

#[test]
fn test_compile_continue_outside_loop() {
    let err = compile(vec![a::def("f", a::params(&[]), vec![a::continue_().at(2)])]);
    assert_matches!(err, Err(CompileError::Syntax { line: 2, .. }));
}

#[test]
fn test_compile_return_outside_function() {
    let message = syntax_message(compile(vec![a::ret(None)]));
    assert_eq!(message, "'return' outside function");
}

#[test]
fn test_compile_yield_outside_function() {
    let message = syntax_message(compile(vec![a::expr_stmt(a::yield_(None))]));
    assert_eq!(message, "'yield' outside function");
}

#[test]
fn test_compile_unreachable_code_skipped() {
    // def f():
    //     return 1
    //     g()
    let code = compile_ok(vec![a::def(
        "f",
        a::params(&[]),
        vec![
            a::ret(Some(a::int(1))),
            a::expr_stmt(a::call(a::name("g"), vec![])),
        ],
    )]);
    assert_eq!(
        dis(child(&code, "f")).mnemonics(),
        ["FUNC_HEADER", "LOAD_CONST", "RETURN_VALUE"]
    );
}

// ============================================================================
// Exceptions and with
// ============================================================================

#[test]
fn test_compile_try_finally_single_entry() {
    // try: f()
    // finally: g()
    let code = compile_ok(vec![a::try_(
        vec![a::expr_stmt(a::call(a::name("f"), vec![])).at(2)],
        vec![],
        vec![],
        vec![a::expr_stmt(a::call(a::name("g"), vec![])).at(4)],
    )
    .at(1)]);
    let d = dis(&code);
    assert_eq!(code.exception_table.len(), 1);
    let entry = code.exception_table[0];

    let g = name_index(&code, "g");
    let loads_g: Vec<_> = d
        .find(Opcode::LoadName)
        .filter(|i| i.operands[0] == g)
        .collect();
    assert_eq!(loads_g.len(), 1);
    assert_eq!(entry.handler as usize, loads_g[0].offset);
    assert!(entry.start < entry.handler);

    let end = only(&d, Opcode::EndFinally);
    assert_eq!(end.operands, vec![i64::from(entry.link_reg)]);
    assert_eq!(entry.handler_end as usize, end.offset + 4);
}

#[test]
fn test_compile_return_through_finally() {
    // def f():
    //     try: return 1
    //     finally: g()
    let code = compile_ok(vec![a::def(
        "f",
        a::params(&[]),
        vec![a::try_(
            vec![a::ret(Some(a::int(1)))],
            vec![],
            vec![],
            vec![a::expr_stmt(a::call(a::name("g"), vec![]))],
        )],
    )]);
    let f = child(&code, "f");
    let d = dis(f);
    let link = i64::from(f.exception_table[0].link_reg);
    assert_run!(d.mnemonics(), ["LOAD_CONST", "STORE_FAST", "CALL_FINALLY", "RETURN_VALUE"]);
    let call = only(&d, Opcode::CallFinally);
    assert_eq!(call.operands[0], link);
    assert_eq!(call.jump_target(), Some(f.exception_table[0].handler as usize));
}

#[test]
fn test_compile_try_except_as() {
    // try: f()
    // except E as e: g(e)
    let code = compile_ok(vec![a::try_(
        vec![a::expr_stmt(a::call(a::name("f"), vec![]))],
        vec![a::except(
            Some(a::name("E")),
            Some("e"),
            vec![a::expr_stmt(a::call(a::name("g"), vec![a::name("e")]))],
        )],
        vec![],
        vec![],
    )]);
    let d = dis(&code);
    assert_eq!(code.exception_table.len(), 2);
    // Sorted by handler offset: the clause body, and with it the
    // name-clearing region, comes after the outer handler entry.
    let (outer, inner) = (code.exception_table[0], code.exception_table[1]);
    assert!(outer.handler < inner.start);
    assert!(inner.handler_end < outer.handler_end);
    assert_eq!(inner.link_reg, outer.link_reg + 2);

    let test = only(&d, Opcode::JumpIfNotExcMatch);
    assert_eq!(test.operands[0], i64::from(outer.link_reg));
    assert_contains!(d.mnemonics(), &"END_EXCEPT");
    assert_run!(d.mnemonics(), ["LOAD_CONST", "STORE_NAME", "DELETE_NAME"]);
}

#[test]
fn test_compile_default_except_must_be_last() {
    let message = syntax_message(compile(vec![a::try_(
        vec![a::pass()],
        vec![
            a::except(None, None, vec![a::pass()]),
            a::except(Some(a::name("E")), None, vec![a::pass()]),
        ],
        vec![],
        vec![],
    )]));
    assert_eq!(message, "default 'except:' must be last");
}

#[test]
fn test_compile_with_registers() {
    // with open(p) as fh: pass
    let code = compile_ok(vec![a::with(
        vec![(a::call(a::name("open"), vec![a::name("p")]), Some(a::name("fh")))],
        vec![a::pass()],
    )]);
    let d = dis(&code);
    assert_run!(d.mnemonics(), ["SETUP_WITH", "STORE_NAME", "END_WITH"]);
    assert_eq!(only(&d, Opcode::SetupWith).operands, vec![1]);
    assert_eq!(only(&d, Opcode::EndWith).operands, vec![1]);
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(code.exception_table[0].link_reg, 3);
}

#[test]
fn test_compile_raise_from() {
    let code = compile_ok(vec![a::raise(Some(a::name("E")), Some(a::name("cause")))]);
    let d = dis(&code);
    let set_cause = only(&d, Opcode::CallIntrinsicN);
    assert_eq!(
        set_cause.operands,
        vec![i64::from(Intrinsic::ExcSetCause as u8), 1, 2]
    );
    assert_run!(d.mnemonics(), ["CALL_INTRINSIC_N", "RAISE"]);
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_compile_register_depth_restored() {
    // A body that exercises most temporaries compiles without tripping the
    // per-statement depth check.
    let code = compile_ok(vec![a::def(
        "f",
        a::params(&["xs", "d"]),
        vec![
            a::assign(
                a::subscript(a::name("d"), a::string("k")),
                a::list(vec![a::int(1), a::starred(a::name("xs")), a::int(2)]),
            ),
            a::for_(
                a::tuple(vec![a::name("i"), a::name("j")]),
                a::call(a::attr(a::name("d"), "items"), vec![]),
                vec![a::aug_assign(
                    a::attr(a::name("d"), "n"),
                    BinOperator::Add,
                    a::binop(a::name("i"), BinOperator::Mult, a::name("j")),
                )],
                vec![],
            ),
            a::ret(Some(a::tuple(vec![a::name("d"), a::name("xs")]))),
        ],
    )]);
    let f = child(&code, "f");
    assert_eq!(f.nlocals, 4);
    assert!(f.framesize > f.nlocals);
}

#[test]
fn test_compile_line_table_marks() {
    let code = compile_ok(vec![
        a::assign(a::name("x"), a::name("a")).at(1),
        a::assign(a::name("y"), a::name("b")).at(3),
    ]);
    let d = dis(&code);
    let stores: Vec<u32> = d.find(Opcode::StoreName).map(|i| i.line).collect();
    assert_eq!(stores, vec![1, 3]);
    assert_eq!(code.firstlineno, 1);
}
