// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the compiler.

use thiserror::Error;

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors that abort compilation of a unit.
#[derive(Debug, Error)]
pub enum CompileError {
    /// `global`/`nonlocal` declaration after the name was already bound or read
    #[error("name '{name}' is {usage} prior to {declaration} declaration in {scope}")]
    ScopeOrder {
        /// Offending identifier
        name: String,
        /// Scope that holds the declaration
        scope: String,
        /// "used" or "assigned"
        usage: &'static str,
        /// "global" or "nonlocal"
        declaration: &'static str,
    },

    /// `nonlocal` declaration with no binding in any enclosing function
    #[error("no binding for nonlocal '{name}' found in {scope}")]
    UnboundNonlocal {
        /// Offending identifier
        name: String,
        /// Scope that holds the declaration
        scope: String,
    },

    /// Construct that is valid grammar but not valid in its position
    #[error("SyntaxError: {message} (line {line})")]
    Syntax {
        /// Description
        message: String,
        /// Source line
        line: u32,
    },

    /// Compiler bug: the generated code would be malformed
    #[error("internal compiler error: {message}")]
    Internal {
        /// Description
        message: String,
    },

    /// Invalid configuration value
    #[error("invalid option '{key}': {message}")]
    Config {
        /// Option name
        key: String,
        /// Description
        message: String,
    },

    /// AST document could not be decoded
    #[error("AST decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    /// Creates a syntax error attributed to `line`.
    pub fn syntax(message: impl Into<String>, line: u32) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
        }
    }

    /// Creates an internal invariant violation.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// `ensure!`/`bail!` with a format string report invariant violations.
impl From<String> for CompileError {
    fn from(message: String) -> Self {
        Self::internal(message)
    }
}
