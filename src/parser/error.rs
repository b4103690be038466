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

//! Syntax errors raised while tokenizing and parsing formulas

use super::span::Span;
use thiserror::Error;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors produced by the tokenizer and the Pratt parser
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A token that cannot appear here
    #[error("Unexpected token '{token}' at {span}")]
    UnexpectedToken {
        /// Offending token text
        token: String,
        /// Location of the token
        span: Span,
    },

    /// Input ended while more was expected
    #[error("Unexpected end of formula, expected {expected}")]
    UnexpectedEof {
        /// What the parser was looking for
        expected: String,
        /// End of input
        span: Span,
    },

    /// String literal without a closing quote
    #[error("Unclosed string literal starting at {span}")]
    UnclosedString {
        /// Location of the opening quote
        span: Span,
    },

    /// Malformed escape sequence inside a string literal
    #[error("Invalid escape sequence '{sequence}' at {span}")]
    InvalidEscape {
        /// The escape text as written
        sequence: String,
        /// Location of the escape
        span: Span,
    },

    /// Malformed numeric literal
    #[error("Invalid number '{text}' at {span}")]
    InvalidNumber {
        /// Literal text
        text: String,
        /// Location of the literal
        span: Span,
    },

    /// Nesting deeper than the parser allows
    #[error("Formula nests deeper than {limit} levels at {span}")]
    TooDeep {
        /// Maximum nesting depth
        limit: usize,
        /// Where the limit was reached
        span: Span,
    },

    /// Formula contains no tokens
    #[error("Empty formula")]
    Empty,
}

impl ParseError {
    /// Offending span inside the formula text
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::UnclosedString { span }
            | ParseError::InvalidEscape { span, .. }
            | ParseError::InvalidNumber { span, .. }
            | ParseError::TooDeep { span, .. } => *span,
            ParseError::Empty => Span::default(),
        }
    }
}
