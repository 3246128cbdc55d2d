//! Lexer for the Static Python front end.
//!
//! Raw tokens are produced by logos. A layout pass on top of it joins lines
//! inside brackets and synthesizes `Newline`, `Indent` and `Dedent` tokens from
//! leading whitespace, so the parser only ever sees logical lines.

use crate::token::{Span, Token};
use logos::Logos;
use thiserror::Error;

/// String literal payload produced by the logos callback.
#[derive(Debug, Clone, PartialEq)]
enum StringLit {
    Str(String),
    Bytes(Vec<u8>),
}

/// Logos-based token enum for lexing.
///
/// Converted to [`Token`] after lexing; layout tokens are added by
/// [`Lexer::tokenize`].
#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    // Whitespace, comments and explicit line joins (skip)
    #[regex(r"[ \t\x0C]+", logos::skip)]
    Whitespace,

    #[regex(r"#[^\r\n]*", logos::skip)]
    Comment,

    #[regex(r"\\\r?\n", logos::skip)]
    LineJoin,

    #[regex(r"\r?\n")]
    Newline,

    // Keywords (must come before identifiers)
    #[token("False")]
    False,
    #[token("None")]
    None,
    #[token("True")]
    True,
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("assert")]
    Assert,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("break")]
    Break,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("from")]
    From,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("lambda")]
    Lambda,
    #[token("nonlocal")]
    Nonlocal,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("raise")]
    Raise,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("while")]
    While,
    #[token("with")]
    With,
    #[token("yield")]
    Yield,

    // Identifiers (must come after keywords)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Numbers with underscore separators
    #[regex(r"0[xX](_?[0-9a-fA-F])+", parse_hex)]
    #[regex(r"0[bB](_?[01])+", parse_binary)]
    #[regex(r"0[oO](_?[0-7])+", parse_octal)]
    #[regex(r"[0-9](_?[0-9])*", parse_int)]
    Int(i128),

    #[regex(r"[0-9](_?[0-9])*\.([0-9](_?[0-9])*)?([eE][+-]?[0-9](_?[0-9])*)?", parse_float)]
    #[regex(r"\.[0-9](_?[0-9])*([eE][+-]?[0-9](_?[0-9])*)?", parse_float)]
    #[regex(r"[0-9](_?[0-9])*[eE][+-]?[0-9](_?[0-9])*", parse_float)]
    Float(f64),

    // Strings: the callback scans to the closing quote
    #[regex(r#"[rRbBuUfF]{0,2}["']"#, lex_string)]
    String(StringLit),

    // Operators (longest first)
    #[token("**=")]
    DoubleStarEqual,
    #[token("//=")]
    DoubleSlashEqual,
    #[token("<<=")]
    LeftShiftEqual,
    #[token(">>=")]
    RightShiftEqual,
    #[token("...")]
    Ellipsis,
    #[token("**")]
    DoubleStar,
    #[token("//")]
    DoubleSlash,
    #[token("<<")]
    LeftShift,
    #[token(">>")]
    RightShift,
    #[token(":=")]
    ColonEqual,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("->")]
    Arrow,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("@=")]
    AtEqual,
    #[token("&=")]
    AmpEqual,
    #[token("|=")]
    PipeEqual,
    #[token("^=")]
    CaretEqual,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("@")]
    At,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Equal,
}

// Helper parsing functions
fn parse_radix(lex: &mut logos::Lexer<LogosToken>, radix: u32) -> Option<i128> {
    let s = lex.slice()[2..].replace('_', "");
    i128::from_str_radix(&s, radix).ok()
}

fn parse_hex(lex: &mut logos::Lexer<LogosToken>) -> Option<i128> {
    parse_radix(lex, 16)
}

fn parse_binary(lex: &mut logos::Lexer<LogosToken>) -> Option<i128> {
    parse_radix(lex, 2)
}

fn parse_octal(lex: &mut logos::Lexer<LogosToken>) -> Option<i128> {
    parse_radix(lex, 8)
}

fn parse_int(lex: &mut logos::Lexer<LogosToken>) -> Option<i128> {
    let s = lex.slice().replace('_', "");
    // Leading zeros are only allowed for zero itself.
    if s.len() > 1 && s.starts_with('0') && s.bytes().any(|b| b != b'0') {
        return None;
    }
    s.parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    lex.slice().replace('_', "").parse().ok()
}

fn lex_string(lex: &mut logos::Lexer<LogosToken>) -> Option<StringLit> {
    let slice = lex.slice();
    let quote = slice.bytes().last()?;
    let prefix = slice[..slice.len() - 1].to_ascii_lowercase();
    if prefix.contains('f') || (prefix.contains('u') && prefix.len() > 1) {
        return None;
    }
    let raw = prefix.contains('r');
    let is_bytes = prefix.contains('b');
    if prefix.len() == 2 && !(raw && is_bytes) {
        return None;
    }

    let rest = lex.remainder().as_bytes();
    let triple = rest.len() >= 2 && rest[0] == quote && rest[1] == quote;
    let body_start = if triple { 2 } else { 0 };
    let mut i = body_start;
    let (body_end, consumed) = loop {
        let c = *rest.get(i)?;
        match c {
            b'\\' => i += 2,
            b'\n' if !triple => return None,
            c if c == quote => {
                if !triple {
                    break (i, i + 1);
                }
                if rest.get(i + 1) == Some(&quote) && rest.get(i + 2) == Some(&quote) {
                    break (i, i + 3);
                }
                i += 1;
            }
            _ => i += 1,
        }
    };

    let body = lex.remainder()[body_start..body_end].to_string();
    lex.bump(consumed);

    let text = if raw { body } else { unescape_string(&body) };
    if is_bytes {
        if !text.is_ascii() {
            return None;
        }
        Some(StringLit::Bytes(text.into_bytes()))
    } else {
        Some(StringLit::Str(text))
    }
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('\n') => {}
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('a') => result.push('\x07'),
            Some('b') => result.push('\x08'),
            Some('f') => result.push('\x0C'),
            Some('v') => result.push('\x0B'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                result.extend(char::from_u32(value));
            }
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(ch) if digits.len() == width => result.push(ch),
                    _ => {
                        result.push('\\');
                        result.push(kind);
                        result.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

/// Width of a run of leading whitespace; tabs advance to the next multiple
/// of eight and form feeds reset the count.
fn indentation_width(prefix: &str) -> u32 {
    let mut width = 0u32;
    for c in prefix.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            '\x0C' => width = 0,
            _ => {}
        }
    }
    width
}

/// Lexer error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("Unexpected character '{char}' at {}:{}", span.line, span.column)]
    UnexpectedCharacter { char: char, span: Span },

    #[error("Unterminated string at {}:{}", span.line, span.column)]
    UnterminatedString { span: Span },

    #[error("Invalid number '{text}' at {}:{}", span.line, span.column)]
    InvalidNumber { text: String, span: Span },

    #[error("unindent does not match any outer indentation level at {}:{}", span.line, span.column)]
    InconsistentDedent { span: Span },
}

impl LexError {
    /// Source location of the error.
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::InvalidNumber { span, .. }
            | LexError::InconsistentDedent { span } => *span,
        }
    }
}

/// Main lexer structure.
pub struct Lexer<'a> {
    source: &'a str,
    tokens: Vec<(Token, Span)>,
    errors: Vec<LexError>,
    /// Open indentation levels; the bottom entry is always zero.
    indents: Vec<u32>,
    /// Bracket nesting depth; newlines are ignored while positive.
    depth: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            errors: Vec::new(),
            indents: vec![0],
            depth: 0,
            at_line_start: true,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<(Token, Span)>, Vec<LexError>> {
        let mut logos_lexer = LogosToken::lexer(self.source);
        let mut line = 1u32;
        let mut column = 1u32;
        let mut last_end = 0;

        while let Some(token_result) = logos_lexer.next() {
            let range = logos_lexer.span();

            // Update line and column based on skipped text
            for c in self.source[last_end..range.start].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }

            let span = Span::new(range.start, range.end, line, column);

            match token_result {
                Ok(LogosToken::Newline) => {
                    if self.depth == 0 && !self.at_line_start {
                        self.tokens.push((Token::Newline, span));
                        self.at_line_start = true;
                    }
                }
                Ok(logos_token) => {
                    if self.at_line_start && self.depth == 0 {
                        self.handle_indentation(span);
                    }
                    self.at_line_start = false;

                    let token = self.convert_token(logos_token);
                    if token.is_open_bracket() {
                        self.depth += 1;
                    } else if token.is_close_bracket() {
                        self.depth = self.depth.saturating_sub(1);
                    }
                    self.tokens.push((token, span));
                }
                Err(()) => {
                    let text = &self.source[range.start..range.end];
                    let error = match text.chars().next() {
                        Some(c) if c.is_ascii_digit() || c == '.' => LexError::InvalidNumber {
                            text: text.to_string(),
                            span,
                        },
                        Some(c)
                            if text.ends_with('"')
                                || text.ends_with('\'')
                                || c == '"'
                                || c == '\'' =>
                        {
                            LexError::UnterminatedString { span }
                        }
                        Some(c) => LexError::UnexpectedCharacter { char: c, span },
                        None => LexError::UnexpectedCharacter { char: '\0', span },
                    };
                    self.errors.push(error);
                }
            }

            // Update column for this token
            for c in self.source[range.start..range.end].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }

            last_end = range.end;
        }

        let end = self.source.len();
        let eof_span = Span::new(end, end, line, column);
        if !self.at_line_start {
            self.tokens.push((Token::Newline, eof_span));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens.push((Token::Dedent, eof_span));
        }
        self.tokens.push((Token::Eof, eof_span));

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    /// Compare the first token of a logical line against the indentation
    /// stack and emit `Indent`/`Dedent` tokens.
    fn handle_indentation(&mut self, span: Span) {
        let line_start = self.source[..span.start].rfind('\n').map_or(0, |i| i + 1);
        let width = indentation_width(&self.source[line_start..span.start]);
        let marker = Span::new(span.start, span.start, span.line, span.column);
        let current = self.indents.last().copied().unwrap_or(0);

        if width > current {
            self.indents.push(width);
            self.tokens.push((Token::Indent, marker));
        } else if width < current {
            while let Some(&top) = self.indents.last() {
                if top <= width {
                    break;
                }
                self.indents.pop();
                self.tokens.push((Token::Dedent, marker));
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                self.errors.push(LexError::InconsistentDedent { span: marker });
            }
        }
    }

    fn convert_token(&self, logos_token: LogosToken) -> Token {
        match logos_token {
            LogosToken::False => Token::False,
            LogosToken::None => Token::None,
            LogosToken::True => Token::True,
            LogosToken::And => Token::And,
            LogosToken::As => Token::As,
            LogosToken::Assert => Token::Assert,
            LogosToken::Async => Token::Async,
            LogosToken::Await => Token::Await,
            LogosToken::Break => Token::Break,
            LogosToken::Class => Token::Class,
            LogosToken::Continue => Token::Continue,
            LogosToken::Def => Token::Def,
            LogosToken::Del => Token::Del,
            LogosToken::Elif => Token::Elif,
            LogosToken::Else => Token::Else,
            LogosToken::Except => Token::Except,
            LogosToken::Finally => Token::Finally,
            LogosToken::For => Token::For,
            LogosToken::From => Token::From,
            LogosToken::Global => Token::Global,
            LogosToken::If => Token::If,
            LogosToken::Import => Token::Import,
            LogosToken::In => Token::In,
            LogosToken::Is => Token::Is,
            LogosToken::Lambda => Token::Lambda,
            LogosToken::Nonlocal => Token::Nonlocal,
            LogosToken::Not => Token::Not,
            LogosToken::Or => Token::Or,
            LogosToken::Pass => Token::Pass,
            LogosToken::Raise => Token::Raise,
            LogosToken::Return => Token::Return,
            LogosToken::Try => Token::Try,
            LogosToken::While => Token::While,
            LogosToken::With => Token::With,
            LogosToken::Yield => Token::Yield,
            LogosToken::Identifier(s) => Token::Identifier(s),
            LogosToken::Int(n) => Token::Int(n),
            LogosToken::Float(n) => Token::Float(n),
            LogosToken::String(StringLit::Str(s)) => Token::Str(s),
            LogosToken::String(StringLit::Bytes(b)) => Token::Bytes(b),
            LogosToken::DoubleStarEqual => Token::DoubleStarEqual,
            LogosToken::DoubleSlashEqual => Token::DoubleSlashEqual,
            LogosToken::LeftShiftEqual => Token::LeftShiftEqual,
            LogosToken::RightShiftEqual => Token::RightShiftEqual,
            LogosToken::Ellipsis => Token::Ellipsis,
            LogosToken::DoubleStar => Token::DoubleStar,
            LogosToken::DoubleSlash => Token::DoubleSlash,
            LogosToken::LeftShift => Token::LeftShift,
            LogosToken::RightShift => Token::RightShift,
            LogosToken::ColonEqual => Token::ColonEqual,
            LogosToken::LessEqual => Token::LessEqual,
            LogosToken::GreaterEqual => Token::GreaterEqual,
            LogosToken::EqualEqual => Token::EqualEqual,
            LogosToken::NotEqual => Token::NotEqual,
            LogosToken::Arrow => Token::Arrow,
            LogosToken::PlusEqual => Token::PlusEqual,
            LogosToken::MinusEqual => Token::MinusEqual,
            LogosToken::StarEqual => Token::StarEqual,
            LogosToken::SlashEqual => Token::SlashEqual,
            LogosToken::PercentEqual => Token::PercentEqual,
            LogosToken::AtEqual => Token::AtEqual,
            LogosToken::AmpEqual => Token::AmpEqual,
            LogosToken::PipeEqual => Token::PipeEqual,
            LogosToken::CaretEqual => Token::CaretEqual,
            LogosToken::Plus => Token::Plus,
            LogosToken::Minus => Token::Minus,
            LogosToken::Star => Token::Star,
            LogosToken::Slash => Token::Slash,
            LogosToken::Percent => Token::Percent,
            LogosToken::At => Token::At,
            LogosToken::Amp => Token::Amp,
            LogosToken::Pipe => Token::Pipe,
            LogosToken::Caret => Token::Caret,
            LogosToken::Tilde => Token::Tilde,
            LogosToken::Less => Token::Less,
            LogosToken::Greater => Token::Greater,
            LogosToken::LeftParen => Token::LeftParen,
            LogosToken::RightParen => Token::RightParen,
            LogosToken::LeftBracket => Token::LeftBracket,
            LogosToken::RightBracket => Token::RightBracket,
            LogosToken::LeftBrace => Token::LeftBrace,
            LogosToken::RightBrace => Token::RightBrace,
            LogosToken::Comma => Token::Comma,
            LogosToken::Colon => Token::Colon,
            LogosToken::Dot => Token::Dot,
            LogosToken::Semicolon => Token::Semicolon,
            LogosToken::Equal => Token::Equal,
            LogosToken::Newline => Token::Newline,
            LogosToken::Whitespace | LogosToken::Comment | LogosToken::LineJoin => {
                unreachable!("Whitespace and comments should be skipped")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(tok, _)| tok)
            .collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("if x:\n    y\nz\n");
        assert_eq!(
            toks,
            vec![
                Token::If,
                Token::Identifier("x".into()),
                Token::Colon,
                Token::Newline,
                Token::Indent,
                Token::Identifier("y".into()),
                Token::Newline,
                Token::Dedent,
                Token::Identifier("z".into()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("f(1,\n  2)\n");
        assert!(!toks[..toks.len() - 2].contains(&Token::Newline));
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let toks = kinds("x\n\n   # comment\ny\n");
        assert_eq!(
            toks,
            vec![
                Token::Identifier("x".into()),
                Token::Newline,
                Token::Identifier("y".into()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_prefixes_and_triple_quotes() {
        let toks = kinds("r'\\n' b\"ab\" '''a\nb'''");
        assert_eq!(toks[0], Token::Str("\\n".into()));
        assert_eq!(toks[1], Token::Bytes(b"ab".to_vec()));
        assert_eq!(toks[2], Token::Str("a\nb".into()));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(unescape_string(r"a\tb\x41\101\u00e9"), "a\tbAAé");
    }

    #[test]
    fn test_numbers() {
        let toks = kinds("0xff 1_000 3.5 1e3 .5");
        assert_eq!(toks[0], Token::Int(255));
        assert_eq!(toks[1], Token::Int(1000));
        assert_eq!(toks[2], Token::Float(3.5));
        assert_eq!(toks[3], Token::Float(1000.0));
        assert_eq!(toks[4], Token::Float(0.5));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let errors = Lexer::new("if x:\n    y\n  z\n").tokenize().unwrap_err();
        assert!(matches!(errors[0], LexError::InconsistentDedent { .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let errors = Lexer::new("x = 'abc\n").tokenize().unwrap_err();
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }
}
