//! Parser for Static Python source
//!
//! A recursive descent parser that turns the lexer's token stream (with
//! layout tokens already synthesized) into a [`Module`].

pub mod error;
pub mod expr;
pub mod stmt;

use crate::ast::*;
use crate::lexer::{LexError, Lexer};
use crate::token::{Span, Token};

pub use error::{ParseError, ParseErrorKind};

/// Maximum nesting of statements and expressions before the parser gives up.
pub const MAX_PARSE_DEPTH: usize = 200;

/// Parser state.
pub struct Parser {
    /// Pre-tokenized input
    tokens: Vec<(Token, Span)>,

    /// Current position in token stream
    pos: usize,

    /// Next node id to hand out
    next_id: u32,

    /// Current recursion depth
    pub(crate) depth: usize,
}

impl Parser {
    /// Create a new parser from source code.
    pub fn new(source: &str) -> Result<Self, Vec<LexError>> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            next_id: 0,
            depth: 0,
        })
    }

    /// Parse the entire source file into a Module AST.
    ///
    /// Parsing stops at the first error.
    pub fn parse(mut self) -> Result<Module, ParseError> {
        let start_span = self.current_span();
        let mut body = Vec::new();

        while !self.at_eof() {
            if self.check(&Token::Newline) {
                self.advance();
                continue;
            }
            body.extend(stmt::parse_statement(&mut self)?);
        }

        let span = match body.last() {
            Some(last) => start_span.merge(&last.span),
            None => start_span,
        };

        Ok(Module {
            id: self.next_id(),
            body,
            span,
        })
    }

    // ========================================================================
    // Node Construction
    // ========================================================================

    /// Allocate a fresh node id.
    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn mk_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_id();
        Expr::new(id, kind, span)
    }

    pub(crate) fn mk_stmt(&mut self, kind: StmtKind, start: Span) -> Stmt {
        let id = self.next_id();
        let span = start.merge(&self.previous_span());
        Stmt::new(id, kind, span)
    }

    /// Span from `start` through the most recently consumed token.
    pub(crate) fn span_from(&self, start: Span) -> Span {
        start.merge(&self.previous_span())
    }

    // ========================================================================
    // Token Management
    // ========================================================================

    /// Get the current token.
    #[inline]
    pub fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    /// Get the current token's span.
    #[inline]
    pub fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    /// Span of the last consumed token.
    pub fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.tokens[0].1
        } else {
            self.tokens[self.pos - 1].1
        }
    }

    /// Peek at the next token (lookahead).
    #[inline]
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(tok, _)| tok)
    }

    /// Advance to the next token, returning the previous current token.
    pub fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    /// Check if the current token matches the given kind.
    #[inline]
    pub fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    /// Check if the current token matches any of the given kinds.
    pub fn check_any(&self, expected: &[Token]) -> bool {
        expected.iter().any(|tok| self.check(tok))
    }

    /// Consume the current token if it matches, reporting whether it did.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Check if we've reached EOF.
    #[inline]
    pub fn at_eof(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    /// Consume the current token if it matches the expected kind.
    pub fn expect(&mut self, expected: Token) -> Result<Token, ParseError> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected_token(&[expected]))
        }
    }

    /// Consume an identifier and return its text.
    pub fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.current() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected_token(&[Token::Identifier(String::new())])),
        }
    }

    // ========================================================================
    // Error Handling
    // ========================================================================

    /// Create an "unexpected token" error at the current position.
    pub fn unexpected_token(&self, expected: &[Token]) -> ParseError {
        let span = self.current_span();
        if self.at_eof() {
            ParseError::unexpected_eof(expected.to_vec(), span)
        } else {
            ParseError::unexpected_token(expected.to_vec(), self.current().clone(), span)
        }
    }

    /// Run `f` one nesting level deeper, failing past [`MAX_PARSE_DEPTH`].
    pub(crate) fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Parser) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            self.depth -= 1;
            return Err(ParseError::parser_limit_exceeded(
                format!("Maximum nesting depth ({}) exceeded", MAX_PARSE_DEPTH),
                self.current_span(),
            ));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }
}
