//! Compile options

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::opcodes::CodeFlags;

/// Language capabilities of the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialect {
    /// Accept `async def`, `await`, `async for` and `async with`
    pub async_support: bool,
    /// Emit list, set and dict comprehensions inline in function bodies
    /// instead of as nested code units
    pub inline_comprehensions: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect {
            async_support: true,
            inline_comprehensions: false,
        }
    }
}

/// Options for one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// 0 keeps asserts and docstrings, 1 drops asserts, 2 also drops
    /// docstrings and expands `@inline` functions
    pub optimize: u8,
    /// Declare and type-check the module and emit specialised code
    pub static_types: bool,
    #[allow(missing_docs)]
    pub dialect: Dialect,
    /// Extra flags set on every generated code unit
    pub flags: CodeFlags,
}

impl CompileOptions {
    /// Options for statically compiled code.
    pub fn static_python() -> Self {
        CompileOptions {
            static_types: true,
            ..CompileOptions::default()
        }
    }

    /// Set the optimization level.
    pub fn with_optimize(mut self, optimize: u8) -> Self {
        self.optimize = optimize;
        self
    }

    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> CompileResult<Self> {
        let options: CompileOptions = serde_json::from_str(text).map_err(|err| CompileError::Config {
            message: err.to_string(),
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize the options as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Reject option combinations the compiler cannot honour.
    pub fn validate(&self) -> CompileResult<()> {
        if self.optimize > 2 {
            return Err(CompileError::Config {
                message: format!("optimize must be 0, 1 or 2, got {}", self.optimize),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.optimize, 0);
        assert!(!options.static_types);
        assert!(options.dialect.async_support);
        assert!(!options.dialect.inline_comprehensions);
        assert_eq!(options.flags, CodeFlags::empty());
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let options = CompileOptions::from_json(r#"{"optimize": 2, "dialect": {"inline_comprehensions": true}}"#)
            .unwrap();
        assert_eq!(options.optimize, 2);
        assert!(options.dialect.inline_comprehensions);
        assert!(options.dialect.async_support);
    }

    #[test]
    fn test_json_round_trip() {
        let options = CompileOptions::static_python().with_optimize(1);
        let parsed = CompileOptions::from_json(&options.to_json()).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_invalid_options() {
        let err = CompileOptions::from_json(r#"{"optimize": 3}"#).unwrap_err();
        assert!(matches!(err, CompileError::Config { .. }));
        assert!(err.to_string().contains("optimize must be 0, 1 or 2"));

        let err = CompileOptions::from_json("{not json").unwrap_err();
        assert!(matches!(err, CompileError::Config { .. }));
    }
}
