//! Compilation errors

use std::fmt;

use codespan_reporting::diagnostic::Severity;
use stpy_checker::diagnostic::error_code;
use stpy_checker::{CheckError, Diagnostic, ErrorCode};
use stpy_parser::{Span, SyntaxError};
use thiserror::Error;

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Message prefixes of code generator errors and their codes.
const CODEGEN_CODES: &[(&str, &str)] = &[
    ("'break' outside loop", "E4001"),
    ("'continue' not properly in loop", "E4002"),
    ("'return' with value in async generator", "E4003"),
    ("default 'except:' must be last", "E4004"),
    ("'await' outside", "E4005"),
    ("'yield' inside", "E4006"),
];

/// A located, user-facing compile error.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedSyntaxError {
    /// Error message without location
    pub message: String,
    /// File the error was found in
    pub filename: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// Text of the offending line, when the source is available
    pub source_line: Option<String>,
    /// Byte range of the offending node
    pub span: Span,
    /// Pass that rejected the code: `syntax`, `scope`, `declaration`,
    /// `type`, `future` or `codegen`
    pub category: &'static str,
    /// Stable error code, e.g. `E3001`
    pub code: &'static str,
}

impl TypedSyntaxError {
    /// Error at `span` in `filename`, pulling the offending line out of
    /// `source`.
    pub fn new(
        message: impl Into<String>,
        category: &'static str,
        code: &'static str,
        span: Span,
        filename: &str,
        source: Option<&str>,
    ) -> Self {
        let source_line = source.and_then(|text| {
            let index = span.line.checked_sub(1)? as usize;
            text.lines().nth(index).map(str::to_string)
        });
        TypedSyntaxError {
            message: message.into(),
            filename: filename.to_string(),
            line: span.line,
            column: span.column,
            source_line,
            span,
            category,
            code,
        }
    }

    /// Convert a checker error. Internal checker errors have no location and
    /// are turned into [`CompileError::Internal`] by the caller.
    pub fn from_check_error(err: &CheckError, filename: &str, source: Option<&str>) -> Self {
        let ErrorCode(code) = error_code(err);
        let span = err.span().unwrap_or_default();
        TypedSyntaxError::new(err.message(), err.category(), code, span, filename, source)
    }

    /// Convert a lexer or parser error.
    pub fn from_syntax_error(err: &SyntaxError, filename: &str, source: &str) -> Self {
        TypedSyntaxError::new(err.message(), "syntax", "E0001", err.span(), filename, Some(source))
    }

    /// Error raised while generating code.
    pub fn codegen(message: impl Into<String>, span: Span, filename: &str, source: Option<&str>) -> Self {
        let message = message.into();
        let code = CODEGEN_CODES
            .iter()
            .find(|(prefix, _)| message.starts_with(prefix))
            .map(|(_, code)| *code)
            .unwrap_or("E4000");
        TypedSyntaxError::new(message, "codegen", code, span, filename, source)
    }
}

impl fmt::Display for TypedSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, line {})", self.message, self.filename, self.line)
    }
}

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// The source text could not be parsed
    #[error("{0}")]
    Parse(TypedSyntaxError),

    /// The program is rejected by scope analysis, declaration, type binding
    /// or code generation
    #[error("{0}")]
    Syntax(TypedSyntaxError),

    /// A pass was driven out of order or a specialisation precondition
    /// failed; never caused by user code
    #[error("Internal compiler error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },

    /// Invalid compile options
    #[error("Invalid compile options: {message}")]
    Config {
        /// What went wrong
        message: String,
    },
}

impl CompileError {
    /// Internal error with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }

    /// Wrap a checker error raised while compiling `filename`.
    pub fn from_check_error(err: CheckError, filename: &str, source: Option<&str>) -> Self {
        if err.is_internal() {
            return CompileError::Internal {
                message: err.message().to_string(),
            };
        }
        CompileError::Syntax(TypedSyntaxError::from_check_error(&err, filename, source))
    }

    /// The structured error, unless this is an internal or config error.
    pub fn syntax_error(&self) -> Option<&TypedSyntaxError> {
        match self {
            CompileError::Parse(err) | CompileError::Syntax(err) => Some(err),
            CompileError::Internal { .. } | CompileError::Config { .. } => None,
        }
    }

    /// Message without location.
    pub fn message(&self) -> String {
        match self {
            CompileError::Parse(err) | CompileError::Syntax(err) => err.message.clone(),
            CompileError::Internal { message } | CompileError::Config { message } => message.clone(),
        }
    }

    /// Render as a diagnostic against file `file_id`.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic {
        match self {
            CompileError::Parse(err) | CompileError::Syntax(err) => {
                let label = match err.category {
                    "syntax" => "invalid syntax",
                    "scope" => "invalid scoping",
                    "declaration" => "invalid declaration",
                    "future" => "invalid future import",
                    "codegen" => "cannot compile",
                    _ => "type error",
                };
                Diagnostic::error(err.message.clone())
                    .with_code(ErrorCode(err.code))
                    .with_primary_label(file_id, err.span, label)
            }
            CompileError::Internal { message } => {
                Diagnostic::new(Severity::Bug, format!("internal error: {}", message)).with_code(ErrorCode("E9000"))
            }
            CompileError::Config { message } => Diagnostic::error(message.clone()).with_code(ErrorCode("E9001")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(line: u32, column: u32) -> Span {
        Span {
            start: 0,
            end: 1,
            line,
            column,
        }
    }

    #[test]
    fn test_source_line_is_extracted() {
        let err = TypedSyntaxError::codegen("'break' outside loop", span(2, 5), "m.py", Some("x = 1\nbreak\n"));
        assert_eq!(err.source_line.as_deref(), Some("break"));
        assert_eq!(err.code, "E4001");
        assert_eq!(err.to_string(), "'break' outside loop (m.py, line 2)");
    }

    #[test]
    fn test_check_errors_keep_category() {
        let check = CheckError::type_error("type mismatch: str cannot be assigned to int", span(1, 1));
        let err = CompileError::from_check_error(check, "m.py", Some("x: int = 'a'\n"));
        let syntax = err.syntax_error().expect("structured error");
        assert_eq!(syntax.category, "type");
        assert_eq!(syntax.code, "E3001");
        assert_eq!(syntax.source_line.as_deref(), Some("x: int = 'a'"));
    }

    #[test]
    fn test_internal_check_error_stays_internal() {
        let err = CompileError::from_check_error(CheckError::internal("out of order"), "m.py", None);
        assert!(matches!(err, CompileError::Internal { .. }));
        assert!(err.syntax_error().is_none());
    }

    #[test]
    fn test_unknown_codegen_message_gets_fallback_code() {
        let err = TypedSyntaxError::codegen("something else", span(1, 1), "m.py", None);
        assert_eq!(err.code, "E4000");
        assert_eq!(err.source_line, None);
    }
}
