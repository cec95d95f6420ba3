// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative macros shared by the pyreg workspace.
//!
//! # Macros Overview
//!
//! ## Instruction Set
//! - [`opcodes!`] - Opcode enum with mnemonics and immediate layouts
//! - [`intrinsics!`] - VM helper table addressed by `CALL_INTRINSIC_*`
//!
//! ## Types
//! - [`bitflags!`] - Integer bitsets for code-object flags
//! - [`const_assert!`] - Compile-time assertions
//!
//! ## Error Handling
//! - [`bail!`] - Early return with an error
//! - [`ensure!`] - Invariant check that returns an error instead of panicking
//!
//! ## Testing
//! - [`assert_matches!`], [`assert_ok!`], [`assert_err!`]
//! - [`assert_contains!`], [`assert_run!`]
//!
//! # Examples
//!
//! ```
//! use pyreg_macros::*;
//!
//! fn depth(before: usize, after: usize) -> Result<(), String> {
//!     ensure!(before == after, "register depth {} != {}", before, after);
//!     Ok(())
//! }
//!
//! assert!(depth(3, 3).is_ok());
//! assert_err!(depth(3, 4));
//! ```

#![warn(missing_docs)]

#[macro_use]
mod error;
#[macro_use]
mod opcodes;
#[macro_use]
mod testing;
#[macro_use]
mod types;
