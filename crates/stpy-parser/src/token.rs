//! Token definitions for the Static Python front end.
//!
//! This module defines every token the lexer can produce, including the
//! synthetic layout tokens (`Newline`, `Indent`, `Dedent`) derived from
//! indentation.

use serde::Serialize;
use std::fmt;

/// A token of the source language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // Literals
    Identifier(String),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    LeftShift,
    RightShift,
    Amp,
    Pipe,
    Caret,
    Tilde,
    ColonEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    EqualEqual,
    NotEqual,

    // Augmented assignment
    PlusEqual,
    MinusEqual,
    StarEqual,
    DoubleStarEqual,
    SlashEqual,
    DoubleSlashEqual,
    PercentEqual,
    AtEqual,
    AmpEqual,
    PipeEqual,
    CaretEqual,
    LeftShiftEqual,
    RightShiftEqual,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Equal,
    Arrow,
    Ellipsis,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Token {
    /// Whether this token opens a bracketed region (implicit line joining).
    pub fn is_open_bracket(&self) -> bool {
        matches!(self, Token::LeftParen | Token::LeftBracket | Token::LeftBrace)
    }

    /// Whether this token closes a bracketed region.
    pub fn is_close_bracket(&self) -> bool {
        matches!(
            self,
            Token::RightParen | Token::RightBracket | Token::RightBrace
        )
    }
}

/// Source location information for a token or syntax node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Smallest span covering both `self` and `other`. Line and column are
    /// taken from whichever span starts first.
    pub fn merge(&self, other: &Span) -> Span {
        let (line, column) = if self.start <= other.start {
            (self.line, self.column)
        } else {
            (other.line, other.column)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            column,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::False => write!(f, "False"),
            Token::None => write!(f, "None"),
            Token::True => write!(f, "True"),
            Token::And => write!(f, "and"),
            Token::As => write!(f, "as"),
            Token::Assert => write!(f, "assert"),
            Token::Async => write!(f, "async"),
            Token::Await => write!(f, "await"),
            Token::Break => write!(f, "break"),
            Token::Class => write!(f, "class"),
            Token::Continue => write!(f, "continue"),
            Token::Def => write!(f, "def"),
            Token::Del => write!(f, "del"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::Except => write!(f, "except"),
            Token::Finally => write!(f, "finally"),
            Token::For => write!(f, "for"),
            Token::From => write!(f, "from"),
            Token::Global => write!(f, "global"),
            Token::If => write!(f, "if"),
            Token::Import => write!(f, "import"),
            Token::In => write!(f, "in"),
            Token::Is => write!(f, "is"),
            Token::Lambda => write!(f, "lambda"),
            Token::Nonlocal => write!(f, "nonlocal"),
            Token::Not => write!(f, "not"),
            Token::Or => write!(f, "or"),
            Token::Pass => write!(f, "pass"),
            Token::Raise => write!(f, "raise"),
            Token::Return => write!(f, "return"),
            Token::Try => write!(f, "try"),
            Token::While => write!(f, "while"),
            Token::With => write!(f, "with"),
            Token::Yield => write!(f, "yield"),
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::DoubleStar => write!(f, "**"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
            Token::At => write!(f, "@"),
            Token::LeftShift => write!(f, "<<"),
            Token::RightShift => write!(f, ">>"),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Caret => write!(f, "^"),
            Token::Tilde => write!(f, "~"),
            Token::ColonEqual => write!(f, ":="),
            Token::Less => write!(f, "<"),
            Token::Greater => write!(f, ">"),
            Token::LessEqual => write!(f, "<="),
            Token::GreaterEqual => write!(f, ">="),
            Token::EqualEqual => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::PlusEqual => write!(f, "+="),
            Token::MinusEqual => write!(f, "-="),
            Token::StarEqual => write!(f, "*="),
            Token::DoubleStarEqual => write!(f, "**="),
            Token::SlashEqual => write!(f, "/="),
            Token::DoubleSlashEqual => write!(f, "//="),
            Token::PercentEqual => write!(f, "%="),
            Token::AtEqual => write!(f, "@="),
            Token::AmpEqual => write!(f, "&="),
            Token::PipeEqual => write!(f, "|="),
            Token::CaretEqual => write!(f, "^="),
            Token::LeftShiftEqual => write!(f, "<<="),
            Token::RightShiftEqual => write!(f, ">>="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::LeftBracket => write!(f, "["),
            Token::RightBracket => write!(f, "]"),
            Token::LeftBrace => write!(f, "{{"),
            Token::RightBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Semicolon => write!(f, ";"),
            Token::Equal => write!(f, "="),
            Token::Arrow => write!(f, "->"),
            Token::Ellipsis => write!(f, "..."),
            Token::Newline => write!(f, "NEWLINE"),
            Token::Indent => write!(f, "INDENT"),
            Token::Dedent => write!(f, "DEDENT"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge_keeps_first_position() {
        let a = Span::new(10, 14, 2, 5);
        let b = Span::new(0, 3, 1, 1);
        let merged = a.merge(&b);
        assert_eq!(merged.start, 0);
        assert_eq!(merged.end, 14);
        assert_eq!((merged.line, merged.column), (1, 1));
    }

    #[test]
    fn test_span_slice() {
        let source = "x = 42";
        assert_eq!(Span::new(4, 6, 1, 5).slice(source), "42");
        assert_eq!(Span::new(4, 6, 1, 5).len(), 2);
        assert!(Span::new(3, 3, 1, 4).is_empty());
    }
}
