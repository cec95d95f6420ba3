// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compilation throughput.
//!
//! Measures whole-module compilation for straight-line code, nested loops
//! with exception handling, and batches of modules.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pyreg_compiler::ast::*;
use pyreg_compiler::{CompileOptions, compile_module, compile_modules};

/// `v0 = 0; v1 = v0 + 1; ...` inside one function.
fn straight_line(n: usize) -> Module {
    let mut body = vec![assign(name("v0"), int(0)).at(2)];
    for i in 1..n {
        let prev = name(&format!("v{}", i - 1));
        body.push(
            assign(
                name(&format!("v{i}")),
                binop(prev, BinOperator::Add, int(i as i64)),
            )
            .at(i as u32 + 2),
        );
    }
    body.push(ret(Some(name(&format!("v{}", n - 1)))).at(n as u32 + 2));
    Module {
        body: vec![def("f", params(&[]), body).at(1)],
    }
}

/// Nested loops whose bodies raise and catch.
fn nested_loops(depth: usize) -> Module {
    let mut body = vec![try_(
        vec![expr_stmt(call(name("work"), vec![name("i0")])).at(3)],
        vec![except(Some(name("ValueError")), Some("err"), vec![continue_().at(5)])],
        vec![],
        vec![aug_assign(name("count"), BinOperator::Add, int(1)).at(7)],
    )
    .at(2)];
    for level in 0..depth {
        let var = format!("i{level}");
        body = vec![for_(
            name(&var),
            call(name("range"), vec![int(10)]),
            body,
            vec![],
        )
        .at(2)];
    }
    Module {
        body: vec![
            def(
                "g",
                params(&[]),
                [vec![assign(name("count"), int(0)).at(2)], body].concat(),
            )
            .at(1),
        ],
    }
}

fn bench_single_module(c: &mut Criterion) {
    let options = CompileOptions::default();
    let mut group = c.benchmark_group("single_module");

    for n in [10, 100, 1000] {
        let module = straight_line(n);
        group.bench_with_input(BenchmarkId::new("straight_line", n), &module, |b, m| {
            b.iter(|| black_box(compile_module(m, &options)))
        });
    }

    for depth in [1, 4, 8] {
        let module = nested_loops(depth);
        group.bench_with_input(BenchmarkId::new("nested_loops", depth), &module, |b, m| {
            b.iter(|| black_box(compile_module(m, &options)))
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let units: Vec<_> = (0..64)
        .map(|i| {
            let options = CompileOptions {
                module_name: format!("mod{i}"),
                ..CompileOptions::default()
            };
            (straight_line(200), options)
        })
        .collect();

    c.bench_function("batch_64_modules", |b| {
        b.iter(|| black_box(compile_modules(&units)))
    });
}

criterion_group!(benches, bench_single_module, bench_batch);
criterion_main!(benches);
