//! Formula lexer and the infix-to-postfix converter.
//!
//! The dialect is the Excel-like language the reduction inherited: arithmetic
//! and comparison operators, numeric literals, a fixed function vocabulary,
//! bare named constants, and bracket-quoted references to other named
//! expressions: `["206/238"]`, optionally prefixed with an uncertainty
//! directive as in `[±"Age"]` or `[%"Age"]`.

mod shunting_yard;

pub use shunting_yard::{infix_to_postfix, PostfixOutput};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Uncertainty annotation carried by a named reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UncertaintyDirective {
    #[default]
    None,
    /// `[±"name"]`: the reference evaluates to the absolute one-sigma.
    Absolute,
    /// `[%"name"]`: the reference evaluates to the percent one-sigma.
    Percent,
}

impl UncertaintyDirective {
    pub fn prefix(self) -> &'static str {
        match self {
            UncertaintyDirective::None => "",
            UncertaintyDirective::Absolute => "±",
            UncertaintyDirective::Percent => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Numeric literal, lexeme preserved.
    Number(String),
    /// Function name or bare named constant; classified downstream against
    /// the function table.
    Ident(String),
    /// Bracket-quoted named-expression reference.
    Reference {
        name: String,
        directive: UncertaintyDirective,
    },
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl TokenKind {
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Caret
                | TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub fn lex(formula: &str) -> Result<Vec<Token>, ParseError> {
    let (tokens, _) = Lexer::new(formula).lex_with_mode(LexMode::Strict)?;
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialLex {
    pub tokens: Vec<Token>,
    pub error: Option<ParseError>,
}

/// Best-effort lexing for editor scenarios: never fails, returns as many
/// tokens as possible plus the first error encountered.
pub fn lex_partial(formula: &str) -> PartialLex {
    let (tokens, error) = Lexer::new(formula)
        .lex_with_mode(LexMode::BestEffort)
        .expect("best-effort lexer should not return an error");
    PartialLex { tokens, error }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexMode {
    Strict,
    BestEffort,
}

struct Lexer<'a> {
    src: &'a str,
    idx: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            idx: 0,
            tokens: Vec::new(),
        }
    }

    fn lex_with_mode(
        mut self,
        mode: LexMode,
    ) -> Result<(Vec<Token>, Option<ParseError>), ParseError> {
        let mut first_error: Option<ParseError> = None;

        while let Some(ch) = self.peek_char() {
            let start = self.idx;
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump(ch);
                }
                '[' => match self.lex_reference(start) {
                    Ok(kind) => self.push(kind, start),
                    Err(err) => match mode {
                        LexMode::Strict => return Err(err),
                        LexMode::BestEffort => {
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                            // Resynchronize past the closing bracket if any.
                            self.skip_until(']');
                        }
                    },
                },
                '0'..='9' | '.' => {
                    let kind = self.lex_number();
                    self.push(kind, start);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let kind = self.lex_ident();
                    self.push(kind, start);
                }
                '+' => self.single(TokenKind::Plus, ch),
                '-' => self.single(TokenKind::Minus, ch),
                '*' => self.single(TokenKind::Star, ch),
                '/' => self.single(TokenKind::Slash, ch),
                '^' => self.single(TokenKind::Caret, ch),
                '(' => self.single(TokenKind::LParen, ch),
                ')' => self.single(TokenKind::RParen, ch),
                ',' => self.single(TokenKind::Comma, ch),
                '=' => {
                    self.bump(ch);
                    if self.peek_char() == Some('=') {
                        self.bump('=');
                        self.push(TokenKind::Eq, start);
                    } else {
                        let err =
                            ParseError::new("Expected '==' for equality", Span::new(start, self.idx));
                        match mode {
                            LexMode::Strict => return Err(err),
                            LexMode::BestEffort => {
                                if first_error.is_none() {
                                    first_error = Some(err);
                                }
                                self.push(TokenKind::Eq, start);
                            }
                        }
                    }
                }
                '<' => {
                    self.bump(ch);
                    match self.peek_char() {
                        Some('=') => {
                            self.bump('=');
                            self.push(TokenKind::Le, start);
                        }
                        Some('>') => {
                            self.bump('>');
                            self.push(TokenKind::Ne, start);
                        }
                        _ => self.push(TokenKind::Lt, start),
                    }
                }
                '>' => {
                    self.bump(ch);
                    if self.peek_char() == Some('=') {
                        self.bump('=');
                        self.push(TokenKind::Ge, start);
                    } else {
                        self.push(TokenKind::Gt, start);
                    }
                }
                other => {
                    let err = ParseError::new(
                        format!("Unexpected character {other:?}"),
                        Span::new(start, start + other.len_utf8()),
                    );
                    match mode {
                        LexMode::Strict => return Err(err),
                        LexMode::BestEffort => {
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                            self.bump(other);
                        }
                    }
                }
            }
        }

        self.push(TokenKind::Eof, self.idx);
        Ok((self.tokens, first_error))
    }

    fn lex_reference(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        self.bump('[');
        let mut directive = UncertaintyDirective::None;
        if self.peek_char() == Some('±') {
            self.bump('±');
            directive = UncertaintyDirective::Absolute;
        }
        if self.peek_char() == Some('%') {
            self.bump('%');
            if directive == UncertaintyDirective::None {
                directive = UncertaintyDirective::Percent;
            }
        }
        if self.peek_char() != Some('"') {
            return Err(ParseError::new(
                "Expected '\"' in named reference",
                Span::new(start, self.idx),
            ));
        }
        self.bump('"');
        let name_start = self.idx;
        loop {
            match self.peek_char() {
                Some('"') => break,
                Some(c) => self.bump(c),
                None => {
                    return Err(ParseError::new(
                        "Unterminated named reference",
                        Span::new(start, self.idx),
                    ));
                }
            }
        }
        let name = self.src[name_start..self.idx].to_string();
        self.bump('"');
        if self.peek_char() != Some(']') {
            return Err(ParseError::new(
                "Expected ']' to close named reference",
                Span::new(start, self.idx),
            ));
        }
        self.bump(']');
        Ok(TokenKind::Reference { name, directive })
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.idx;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.bump(c);
            } else {
                break;
            }
        }
        // Optional exponent.
        if let Some(e) = self.peek_char() {
            if e == 'e' || e == 'E' {
                let mark = self.idx;
                self.bump(e);
                if let Some(sign) = self.peek_char() {
                    if sign == '+' || sign == '-' {
                        self.bump(sign);
                    }
                }
                if matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    while let Some(c) = self.peek_char() {
                        if c.is_ascii_digit() {
                            self.bump(c);
                        } else {
                            break;
                        }
                    }
                } else {
                    // Not an exponent after all (e.g. `2e` starting an ident).
                    self.idx = mark;
                }
            }
        }
        TokenKind::Number(self.src[start..self.idx].to_string())
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.idx;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump(c);
            } else {
                break;
            }
        }
        TokenKind::Ident(self.src[start..self.idx].to_string())
    }

    fn single(&mut self, kind: TokenKind, ch: char) {
        let start = self.idx;
        self.bump(ch);
        self.push(kind, start);
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.idx..].chars().next()
    }

    fn bump(&mut self, ch: char) {
        self.idx += ch.len_utf8();
    }

    fn skip_until(&mut self, target: char) {
        while let Some(c) = self.peek_char() {
            self.bump(c);
            if c == target {
                break;
            }
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.idx),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(formula: &str) -> Vec<TokenKind> {
        lex(formula).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_arithmetic() {
        assert_eq!(
            kinds("1 + 2.5 * (3 - 4) ^ 2"),
            vec![
                TokenKind::Number("1".into()),
                TokenKind::Plus,
                TokenKind::Number("2.5".into()),
                TokenKind::Star,
                TokenKind::LParen,
                TokenKind::Number("3".into()),
                TokenKind::Minus,
                TokenKind::Number("4".into()),
                TokenKind::RParen,
                TokenKind::Caret,
                TokenKind::Number("2".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_comparisons() {
        assert_eq!(
            kinds("1 <= 2 <> 3 == 4 >= 5 < 6 > 7"),
            vec![
                TokenKind::Number("1".into()),
                TokenKind::Le,
                TokenKind::Number("2".into()),
                TokenKind::Ne,
                TokenKind::Number("3".into()),
                TokenKind::Eq,
                TokenKind::Number("4".into()),
                TokenKind::Ge,
                TokenKind::Number("5".into()),
                TokenKind::Lt,
                TokenKind::Number("6".into()),
                TokenKind::Gt,
                TokenKind::Number("7".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_references_with_directives() {
        assert_eq!(
            kinds(r#"["206/238"] + [±"Age"] + [%"Age"]"#),
            vec![
                TokenKind::Reference {
                    name: "206/238".into(),
                    directive: UncertaintyDirective::None,
                },
                TokenKind::Plus,
                TokenKind::Reference {
                    name: "Age".into(),
                    directive: UncertaintyDirective::Absolute,
                },
                TokenKind::Plus,
                TokenKind::Reference {
                    name: "Age".into(),
                    directive: UncertaintyDirective::Percent,
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_function_call_and_ident() {
        assert_eq!(
            kinds(r#"ln(["254/238"]) + lambda238"#),
            vec![
                TokenKind::Ident("ln".into()),
                TokenKind::LParen,
                TokenKind::Reference {
                    name: "254/238".into(),
                    directive: UncertaintyDirective::None,
                },
                TokenKind::RParen,
                TokenKind::Plus,
                TokenKind::Ident("lambda238".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_scientific_notation() {
        assert_eq!(
            kinds("1.55125e-10"),
            vec![TokenKind::Number("1.55125e-10".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn strict_lex_rejects_unterminated_reference() {
        let err = lex(r#"["206/238"#).unwrap_err();
        assert_eq!(err.message, "Unterminated named reference");
    }

    #[test]
    fn partial_lex_recovers_and_reports_first_error() {
        let out = lex_partial(r#"1 + ["broken + 2"#);
        let err = out.error.expect("expected a lex error");
        assert_eq!(err.message, "Unterminated named reference");
        assert_eq!(out.tokens.first().map(|t| t.kind.clone()), Some(TokenKind::Number("1".into())));
        assert_eq!(out.tokens.last().map(|t| t.kind.clone()), Some(TokenKind::Eof));
    }

    #[test]
    fn spans_use_byte_offsets() {
        let tokens = lex(r#"[±"Age"]"#).unwrap();
        // The ± sign is two bytes in UTF-8.
        assert_eq!(tokens[0].span, Span::new(0, 9));
    }
}
