//! Static Python Parser
//!
//! Lexer, syntax tree and recursive descent parser feeding the Static Python
//! compiler pipeline.

#![warn(missing_docs)]

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, ParseErrorKind, Parser};
pub use token::{Span, Token};

use thiserror::Error;

/// Failure to turn source text into a syntax tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    /// One or more tokens could not be lexed.
    #[error("{}", .0.first().map(|e| e.to_string()).unwrap_or_default())]
    Lex(Vec<LexError>),

    /// The token stream does not form a valid module.
    #[error("{0}")]
    Parse(ParseError),
}

impl SyntaxError {
    /// Location of the (first) error.
    pub fn span(&self) -> Span {
        match self {
            SyntaxError::Lex(errors) => errors.first().map(|e| e.span()).unwrap_or_default(),
            SyntaxError::Parse(err) => err.span,
        }
    }

    /// Message of the (first) error without location prefix.
    pub fn message(&self) -> String {
        match self {
            SyntaxError::Lex(errors) => errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "invalid syntax".to_string()),
            SyntaxError::Parse(err) => err.message.clone(),
        }
    }
}

/// Parse a whole module from source text.
pub fn parse_module(source: &str) -> Result<ast::Module, SyntaxError> {
    let parser = Parser::new(source).map_err(SyntaxError::Lex)?;
    parser.parse().map_err(SyntaxError::Parse)
}
