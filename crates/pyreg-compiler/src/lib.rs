// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # pyreg-compiler
//!
//! An ahead-of-time compiler from a Python-like AST to the bytecode of a
//! register-based accumulator VM.
//!
//! ## Overview
//!
//! Compilation runs in four stages, each a pure function of its input:
//! - **Desugaring** rewrites surface constructs (asserts, lambdas,
//!   decorators, comprehensions, multi-item `with`) into a smaller core IR
//! - **Scope analysis** classifies every name and assigns registers
//! - **Code generation** emits symbolic instructions per body
//! - **Assembly** encodes them into bytes with line and exception tables
//!
//! The front end (tokenizer, parser, grammar checks) lives outside this
//! crate; it hands over an [`ast::Module`], directly or as JSON.
//!
//! ## Quick Start
//!
//! ```
//! use pyreg_compiler::ast::*;
//! use pyreg_compiler::{compile_module, disassemble, CompileOptions};
//!
//! // x = 1 + 2
//! let module = Module {
//!     body: vec![assign(name("x"), binop(int(1), BinOperator::Add, int(2))).at(1)],
//! };
//! let code = compile_module(&module, &CompileOptions::default())?;
//! let listing = disassemble(&code)?;
//! assert!(listing.mnemonics().contains(&"STORE_NAME"));
//! # Ok::<(), pyreg_compiler::CompileError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod config;
pub mod desugar;
pub mod error;

pub use compiler::{
    disassemble, intrinsic_table, opcode_table, CodeObject, ConstValue, Disassembly, Opcode,
};
pub use config::CompileOptions;
pub use error::{CompileError, Result};

use tracing::debug;

/// Compiles one module into its code object tree.
pub fn compile_module(module: &ast::Module, options: &CompileOptions) -> Result<CodeObject> {
    let ir = desugar::desugar(module, options);
    let table = compiler::ScopeTable::build(&ir)?;
    debug!(module = %options.module_name, scopes = table.len(), "scopes analyzed");
    compiler::generate(&ir, &table, options)
}

/// Decodes a module from JSON and compiles it.
pub fn compile_json(json: &str, options: &CompileOptions) -> Result<CodeObject> {
    let module = ast::Module::from_json(json)?;
    compile_module(&module, options)
}

/// Compiles independent modules, in parallel when the `parallel` feature is
/// enabled. Results keep the input order.
pub fn compile_modules(units: &[(ast::Module, CompileOptions)]) -> Vec<Result<CodeObject>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        units
            .par_iter()
            .map(|(module, options)| compile_module(module, options))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        units
            .iter()
            .map(|(module, options)| compile_module(module, options))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use pyreg_macros::{assert_err, assert_matches, assert_ok};

    fn module(body: Vec<Stmt>) -> Module {
        Module { body }
    }

    #[test]
    fn test_compile_module() {
        test_support::init_tracing();
        let code = assert_ok!(compile_module(
            &module(vec![assign(name("x"), int(1)).at(1)]),
            &CompileOptions::default()
        ));
        assert_eq!(code.name, "<module>");
        assert_eq!(code.filename, "<string>");
    }

    #[test]
    fn test_compile_json_rejects_garbage() {
        let err = assert_err!(compile_json("{\"body\": 3}", &CompileOptions::default()));
        assert_matches!(err, CompileError::Json(_));
    }

    #[test]
    fn test_compile_modules_keeps_order() {
        test_support::init_tracing();
        let units: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| {
                let options = CompileOptions {
                    module_name: n.to_string(),
                    ..CompileOptions::default()
                };
                (module(vec![expr_stmt(name(n)).at(1)]), options)
            })
            .collect();
        let names: Vec<String> = compile_modules(&units)
            .into_iter()
            .map(|r| assert_ok!(r).name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_errors_abort_only_their_unit() {
        let units = vec![
            (module(vec![ret(None)]), CompileOptions::default()),
            (module(vec![pass()]), CompileOptions::default()),
        ];
        let results = compile_modules(&units);
        assert_matches!(results[0], Err(CompileError::Syntax { .. }));
        assert!(results[1].is_ok());
    }
}
