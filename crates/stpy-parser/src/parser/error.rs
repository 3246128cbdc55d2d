//! Parse error types and error reporting

use crate::token::{Span, Token};
use std::fmt;

/// A parse error with location and contextual information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error that occurred
    pub kind: ParseErrorKind,

    /// Source location of the error
    pub span: Span,

    /// Human-readable error message
    pub message: String,

    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
}

/// The kind of parse error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// Unexpected token found
    UnexpectedToken { expected: Vec<Token>, found: Token },

    /// Unexpected end of file
    UnexpectedEof { expected: Vec<Token> },

    /// Invalid syntax
    InvalidSyntax { reason: String },

    /// Expression that cannot be assigned to, deleted or annotated
    InvalidTarget { target: String },

    /// Parser exceeded its nesting limit
    ParserLimitExceeded { message: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at {}:{}: {}",
            self.span.line, self.span.column, self.message
        )?;

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    /// Create an "unexpected token" error.
    pub fn unexpected_token(expected: Vec<Token>, found: Token, span: Span) -> Self {
        let message = match expected.as_slice() {
            [] => format!("invalid syntax: unexpected '{}'", found),
            [one] => format!("expected '{}', found '{}'", one, found),
            _ => {
                let names: Vec<String> = expected.iter().map(|t| format!("'{}'", t)).collect();
                format!("expected one of {}, found '{}'", names.join(", "), found)
            }
        };

        Self {
            kind: ParseErrorKind::UnexpectedToken { expected, found },
            span,
            message,
            suggestion: None,
        }
    }

    /// Create an "unexpected end of file" error.
    pub fn unexpected_eof(expected: Vec<Token>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::UnexpectedEof { expected },
            span,
            message: "unexpected EOF while parsing".to_string(),
            suggestion: None,
        }
    }

    /// Create an "invalid syntax" error.
    pub fn invalid_syntax(reason: impl Into<String>, span: Span) -> Self {
        let reason = reason.into();
        Self {
            message: reason.clone(),
            kind: ParseErrorKind::InvalidSyntax { reason },
            span,
            suggestion: None,
        }
    }

    /// Create an error for an expression used as an assignment or delete
    /// target that cannot be one.
    pub fn invalid_target(target: impl Into<String>, verb: &str, span: Span) -> Self {
        let target = target.into();
        Self {
            message: format!("cannot {} {}", verb, target),
            kind: ParseErrorKind::InvalidTarget { target },
            span,
            suggestion: None,
        }
    }

    /// Create a nesting-limit error.
    pub fn parser_limit_exceeded(message: impl Into<String>, span: Span) -> Self {
        let message = message.into();
        Self {
            kind: ParseErrorKind::ParserLimitExceeded {
                message: message.clone(),
            },
            span,
            message,
            suggestion: None,
        }
    }

    /// Attach a suggestion to the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}
