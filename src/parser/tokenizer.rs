// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tokenizer for the formula language
//!
//! Operands (numbers, quoted strings, identifiers), operator symbols and
//! operator keywords are recognized here. Keywords are matched
//! case-insensitively through a shared, immutable table, so the grammar
//! can be used from any thread without synchronization.

use super::error::{ParseError, ParseResult};
use super::span::{Span, Spanned};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use unicode_xid::UnicodeXID;

/// Formula token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'input> {
    /// Numeric literal with optional fraction and exponent (e.g. 42, 3.5, 1e-3)
    Number(f64),
    /// Quoted string literal with escapes already resolved
    String(String),
    /// Identifier (symbol, function or constant name)
    Identifier(&'input str),

    /// Addition operator (+)
    Plus,
    /// Subtraction operator (-)
    Minus,
    /// Multiplication operator (*)
    Multiply,
    /// Division operator (/)
    Divide,
    /// Modulo operator (%)
    Modulo,
    /// Power operator (^)
    Power,
    /// Concatenation operator (..)
    Concat,
    /// Member access (.)
    Dot,
    /// Argument and tuple separator (,)
    Comma,
    /// Left parenthesis (
    LeftParen,
    /// Right parenthesis )
    RightParen,
    /// Less than operator (<)
    LessThan,
    /// Less than or equal operator (<=)
    LessThanOrEqual,
    /// Greater than operator (>)
    GreaterThan,
    /// Greater than or equal operator (>=)
    GreaterThanOrEqual,

    /// Equality keyword (is)
    Is,
    /// Logical AND keyword (and)
    And,
    /// Logical OR keyword (or)
    Or,
    /// Logical NOT keyword (not)
    Not,
    /// Substring test keyword (contains)
    Contains,
    /// Prefix test keyword (starts)
    Starts,
    /// Suffix test keyword (ends)
    Ends,
    /// Regex test keyword (matches)
    Matches,
    /// Regex substitution keyword (replace)
    Replace,
    /// Substitution separator keyword (with)
    With,
    /// Bounded repetition keyword (repeat)
    Repeat,
    /// Range membership keyword (in)
    In,
    /// Version range keyword following `in` (versions)
    Versions,
}

impl<'input> Token<'input> {
    /// Check if this token is an operator keyword
    #[inline]
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Is
                | Token::And
                | Token::Or
                | Token::Not
                | Token::Contains
                | Token::Starts
                | Token::Ends
                | Token::Matches
                | Token::Replace
                | Token::With
                | Token::Repeat
                | Token::In
                | Token::Versions
        )
    }

    /// Get identifier text
    #[inline]
    pub fn as_identifier(&self) -> Option<&'input str> {
        match self {
            Token::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Source-like rendering used in error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::String(s) => format!("\"{s}\""),
            Token::Identifier(s) => (*s).to_string(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Multiply => "*".into(),
            Token::Divide => "/".into(),
            Token::Modulo => "%".into(),
            Token::Power => "^".into(),
            Token::Concat => "..".into(),
            Token::Dot => ".".into(),
            Token::Comma => ",".into(),
            Token::LeftParen => "(".into(),
            Token::RightParen => ")".into(),
            Token::LessThan => "<".into(),
            Token::LessThanOrEqual => "<=".into(),
            Token::GreaterThan => ">".into(),
            Token::GreaterThanOrEqual => ">=".into(),
            Token::Is => "is".into(),
            Token::And => "and".into(),
            Token::Or => "or".into(),
            Token::Not => "not".into(),
            Token::Contains => "contains".into(),
            Token::Starts => "starts".into(),
            Token::Ends => "ends".into(),
            Token::Matches => "matches".into(),
            Token::Replace => "replace".into(),
            Token::With => "with".into(),
            Token::Repeat => "repeat".into(),
            Token::In => "in".into(),
            Token::Versions => "versions".into(),
        }
    }
}

/// Shared keyword table, keyed by lowercase spelling
static KEYWORD_TABLE: Lazy<FxHashMap<&'static str, Token<'static>>> = Lazy::new(|| {
    let mut map = FxHashMap::default();

    map.insert("is", Token::Is);
    map.insert("and", Token::And);
    map.insert("or", Token::Or);
    map.insert("not", Token::Not);

    // String operators
    map.insert("contains", Token::Contains);
    map.insert("starts", Token::Starts);
    map.insert("ends", Token::Ends);
    map.insert("matches", Token::Matches);
    map.insert("replace", Token::Replace);
    map.insert("with", Token::With);
    map.insert("repeat", Token::Repeat);

    // Version ranges
    map.insert("in", Token::In);
    map.insert("versions", Token::Versions);

    map
});

/// Longest keyword in the table, used to skip lookups for long identifiers
const MAX_KEYWORD_LEN: usize = 8;

/// Streaming tokenizer over a formula
#[derive(Clone)]
pub struct Tokenizer<'input> {
    input: &'input str,
    bytes: &'input [u8],
    pos: usize,
}

impl<'input> Tokenizer<'input> {
    /// Create a new tokenizer
    #[inline]
    pub fn new(input: &'input str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    /// Current byte offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn keyword_lookup(ident: &str) -> Option<Token<'static>> {
        if ident.len() < 2 || ident.len() > MAX_KEYWORD_LEN {
            return None;
        }
        KEYWORD_TABLE.get(ident.to_ascii_lowercase().as_str()).cloned()
    }

    #[inline]
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.input[self.pos..].chars().next() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn is_id_start(ch: char) -> bool {
        ch == '_' || UnicodeXID::is_xid_start(ch)
    }

    fn is_id_continue(ch: char) -> bool {
        UnicodeXID::is_xid_continue(ch)
    }

    fn parse_identifier(&mut self) -> &'input str {
        let start = self.pos;
        for ch in self.input[start..].chars() {
            if Self::is_id_continue(ch) {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    /// Decimal number with optional fraction and exponent. The sign is
    /// handled by the parser as a unary operator.
    fn parse_number(&mut self) -> ParseResult<Token<'input>> {
        let start = self.pos;

        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }

        // A dot only belongs to the number when a digit follows, so `1..2`
        // stays a concatenation.
        if self.peek_byte(0) == Some(b'.') && self.peek_byte(1).is_some_and(|b| b.is_ascii_digit())
        {
            self.pos += 1;
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }

        if matches!(self.peek_byte(0), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_byte(1), Some(b'+' | b'-')) {
                lookahead += 1;
            }
            if self
                .peek_byte(lookahead)
                .is_some_and(|b| b.is_ascii_digit())
            {
                self.pos += lookahead;
                while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::InvalidNumber {
                text: text.to_string(),
                span: Span::new(start, self.pos),
            })
    }

    /// Quoted string literal, either quote style, C-style escapes
    fn parse_string_literal(&mut self) -> ParseResult<Token<'input>> {
        let start = self.pos;
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let mut result = String::new();

        loop {
            let Some(ch) = self.input[self.pos..].chars().next() else {
                return Err(ParseError::UnclosedString {
                    span: Span::new(start, self.pos),
                });
            };

            if ch as u32 == quote as u32 {
                self.pos += 1;
                return Ok(Token::String(result));
            }

            if ch == '\\' {
                let escape_start = self.pos;
                self.pos += 1;
                let decoded = self.parse_escape(escape_start)?;
                result.push(decoded);
            } else {
                result.push(ch);
                self.pos += ch.len_utf8();
            }
        }
    }

    fn parse_escape(&mut self, escape_start: usize) -> ParseResult<char> {
        let Some(ch) = self.input[self.pos..].chars().next() else {
            return Err(ParseError::UnclosedString {
                span: Span::new(escape_start, self.pos),
            });
        };
        self.pos += ch.len_utf8();

        let simple = match ch {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            'a' => Some('\u{07}'),
            'b' => Some('\u{08}'),
            'f' => Some('\u{0C}'),
            'v' => Some('\u{0B}'),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            '?' => Some('?'),
            _ => None,
        };
        if let Some(decoded) = simple {
            return Ok(decoded);
        }

        let code = match ch {
            'x' => self.read_hex_digits(2, escape_start)?,
            'u' => self.read_hex_digits(4, escape_start)?,
            'U' => self.read_hex_digits(8, escape_start)?,
            '0'..='7' => {
                let mut value = ch as u32 - '0' as u32;
                for _ in 0..2 {
                    match self.peek_byte(0) {
                        Some(b @ b'0'..=b'7') => {
                            value = value * 8 + (b - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                value
            }
            _ => {
                return Err(ParseError::InvalidEscape {
                    sequence: format!("\\{ch}"),
                    span: Span::new(escape_start, self.pos),
                });
            }
        };

        char::from_u32(code).ok_or_else(|| ParseError::InvalidEscape {
            sequence: self.input[escape_start..self.pos].to_string(),
            span: Span::new(escape_start, self.pos),
        })
    }

    fn read_hex_digits(&mut self, count: usize, escape_start: usize) -> ParseResult<u32> {
        let digits_start = self.pos;
        let digits_end = digits_start + count;
        let valid = digits_end <= self.bytes.len()
            && self.bytes[digits_start..digits_end]
                .iter()
                .all(|b| b.is_ascii_hexdigit());
        if !valid {
            let end = digits_end.min(self.bytes.len());
            self.pos = end;
            return Err(ParseError::InvalidEscape {
                sequence: self
                    .input
                    .get(escape_start..end)
                    .unwrap_or("\\")
                    .to_string(),
                span: Span::new(escape_start, end),
            });
        }
        self.pos = digits_end;
        u32::from_str_radix(&self.input[digits_start..digits_end], 16).map_err(|_| {
            ParseError::InvalidEscape {
                sequence: self.input[escape_start..digits_end].to_string(),
                span: Span::new(escape_start, digits_end),
            }
        })
    }

    #[inline]
    fn single(&mut self, token: Token<'input>) -> Token<'input> {
        self.pos += 1;
        token
    }

    #[inline]
    fn double(&mut self, token: Token<'input>) -> Token<'input> {
        self.pos += 2;
        token
    }

    /// Produce the next token, or `None` at end of input
    pub fn next_token(&mut self) -> ParseResult<Option<Spanned<Token<'input>>>> {
        self.skip_whitespace();

        if self.pos >= self.bytes.len() {
            return Ok(None);
        }

        let start = self.pos;
        let token = match self.bytes[self.pos] {
            b'(' => self.single(Token::LeftParen),
            b')' => self.single(Token::RightParen),
            b',' => self.single(Token::Comma),
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Multiply),
            b'/' => self.single(Token::Divide),
            b'%' => self.single(Token::Modulo),
            b'^' => self.single(Token::Power),
            b'.' => {
                if self.peek_byte(1) == Some(b'.') {
                    self.double(Token::Concat)
                } else {
                    self.single(Token::Dot)
                }
            }
            b'<' => {
                if self.peek_byte(1) == Some(b'=') {
                    self.double(Token::LessThanOrEqual)
                } else {
                    self.single(Token::LessThan)
                }
            }
            b'>' => {
                if self.peek_byte(1) == Some(b'=') {
                    self.double(Token::GreaterThanOrEqual)
                } else {
                    self.single(Token::GreaterThan)
                }
            }
            b'0'..=b'9' => self.parse_number()?,
            b'"' | b'\'' => self.parse_string_literal()?,
            _ => {
                let ch = self.input[self.pos..].chars().next().unwrap_or('\0');
                if Self::is_id_start(ch) {
                    let ident = self.parse_identifier();
                    Self::keyword_lookup(ident).unwrap_or(Token::Identifier(ident))
                } else {
                    return Err(ParseError::UnexpectedToken {
                        token: ch.to_string(),
                        span: Span::new(start, start + ch.len_utf8()),
                    });
                }
            }
        };

        Ok(Some(Spanned::new(token, start, self.pos)))
    }

    /// Tokenize the whole input
    pub fn tokenize_all(&mut self) -> ParseResult<Vec<Spanned<Token<'input>>>> {
        let mut tokens = Vec::with_capacity(16);
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        Tokenizer::new(input)
            .tokenize_all()
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    #[test]
    fn test_numbers_and_exponents() {
        assert_eq!(tokens("42"), vec![Token::Number(42.0)]);
        assert_eq!(tokens("3.25"), vec![Token::Number(3.25)]);
        assert_eq!(tokens("1e3"), vec![Token::Number(1000.0)]);
        assert_eq!(tokens("2.5E-1"), vec![Token::Number(0.25)]);
    }

    #[test]
    fn test_concat_is_not_a_decimal_point() {
        assert_eq!(
            tokens("1..2"),
            vec![Token::Number(1.0), Token::Concat, Token::Number(2.0)]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            tokens("a AND b Or c"),
            vec![
                Token::Identifier("a"),
                Token::And,
                Token::Identifier("b"),
                Token::Or,
                Token::Identifier("c"),
            ]
        );
    }

    #[test]
    fn test_comparison_operators_are_distinct() {
        assert_eq!(
            tokens("< <= > >="),
            vec![
                Token::LessThan,
                Token::LessThanOrEqual,
                Token::GreaterThan,
                Token::GreaterThanOrEqual,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\n\x41é\U0001F600\101""#),
            vec![Token::String("a\tb\nA\u{e9}\u{1F600}A".to_string())]
        );
        assert_eq!(
            tokens(r#""caf\u00e9 \u0041\u00E9""#),
            vec![Token::String("café A\u{e9}".to_string())]
        );
        assert_eq!(
            tokens(r#"'say "hi"'"#),
            vec![Token::String("say \"hi\"".into())]
        );
    }

    #[test]
    fn test_invalid_escape() {
        let err = Tokenizer::new(r#""\q""#).tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::InvalidEscape { .. }));
        let err = Tokenizer::new(r#""\xZZ""#).tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::InvalidEscape { .. }));
        let err = Tokenizer::new(r#""\u00g9""#).tokenize_all().unwrap_err();
        assert!(matches!(err, ParseError::InvalidEscape { .. }));
    }

    #[test]
    fn test_unclosed_string() {
        let err = Tokenizer::new("\"abc").tokenize_all().unwrap_err();
        assert_eq!(err.span().start, 0);
        assert!(matches!(err, ParseError::UnclosedString { .. }));
    }

    #[test]
    fn test_unknown_character_span() {
        let err = Tokenizer::new("1 # 2").tokenize_all().unwrap_err();
        assert_eq!(err.span(), Span::new(2, 3));
    }
}
