// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compilation options.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// Prefix of environment variables read by [`CompileOptions::from_env`].
pub const ENV_PREFIX: &str = "PYREG_";

/// Options for one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// File name recorded in every code object
    pub filename: String,

    /// Name of the module code object
    pub module_name: String,

    /// 0 keeps everything, 1 drops asserts, 2 also drops docstrings
    pub optimize: u8,

    /// Print the value of module-level expression statements
    pub interactive: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: "<string>".to_string(),
            module_name: "<module>".to_string(),
            optimize: 0,
            interactive: false,
        }
    }
}

impl CompileOptions {
    /// Defaults overlaid with `PYREG_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        options.load_from_env()?;
        Ok(options)
    }

    /// Parses options from a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies `PYREG_<KEY>` environment variables.
    pub fn load_from_env(&mut self) -> Result<()> {
        for (key, value) in std::env::vars() {
            if let Some(option) = key.strip_prefix(ENV_PREFIX) {
                let option = option.to_lowercase().replace('_', "-");
                self.set(&option, &value)?;
            }
        }
        Ok(())
    }

    /// Sets a single option from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |message: &str| CompileError::Config {
            key: key.to_string(),
            message: message.to_string(),
        };
        match key {
            "filename" => self.filename = value.to_string(),
            "module-name" => self.module_name = value.to_string(),
            "optimize" => {
                self.optimize = value
                    .parse()
                    .ok()
                    .filter(|level| *level <= 2)
                    .ok_or_else(|| invalid("expected 0, 1 or 2"))?;
            }
            "interactive" => {
                self.interactive = match value {
                    "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    _ => return Err(invalid("expected a boolean")),
                };
            }
            _ => return Err(invalid("unknown option")),
        }
        Ok(())
    }

    /// Whether `assert` statements are compiled.
    pub fn keep_asserts(&self) -> bool {
        self.optimize < 1
    }

    /// Whether docstrings are kept.
    pub fn keep_docstrings(&self) -> bool {
        self.optimize < 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.filename, "<string>");
        assert_eq!(options.module_name, "<module>");
        assert!(options.keep_asserts());
        assert!(options.keep_docstrings());
    }

    #[test]
    fn test_set() {
        let mut options = CompileOptions::default();
        options.set("optimize", "2").unwrap();
        options.set("interactive", "yes").unwrap();
        options.set("module-name", "pkg.mod").unwrap();
        assert!(!options.keep_asserts());
        assert!(!options.keep_docstrings());
        assert!(options.interactive);
        assert_eq!(options.module_name, "pkg.mod");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut options = CompileOptions::default();
        assert!(matches!(
            options.set("optimize", "7"),
            Err(CompileError::Config { .. })
        ));
        assert!(options.set("interactive", "maybe").is_err());
        assert!(options.set("colour", "red").is_err());
        assert_eq!(options, CompileOptions::default());
    }

    #[test]
    fn test_from_json_partial() {
        let options = CompileOptions::from_json(r#"{"filename": "app.py"}"#).unwrap();
        assert_eq!(options.filename, "app.py");
        assert_eq!(options.optimize, 0);
    }
}
