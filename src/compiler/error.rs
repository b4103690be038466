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

// Error types for formula compilation and evaluation

use crate::model::{CoercionError, VersionError};
use crate::parser::{ParseError, Span};
use thiserror::Error;

/// Result type for compile and evaluate operations
pub type FormulaResult<T> = Result<T, FormulaError>;

/// Errors raised while compiling or evaluating a formula
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// Formula text does not parse
    #[error("Syntax error: {0}")]
    Syntax(#[from] ParseError),

    /// No scope provider knows the symbol
    #[error("Unresolved symbol '{name}' at {span}")]
    UnresolvedSymbol {
        /// Symbol path as written
        name: String,
        /// Location in the formula
        span: Span,
    },

    /// Function name is not a builtin
    #[error("Unknown function '{name}' at {span}")]
    UnknownFunction {
        /// Function name
        name: String,
        /// Location of the call
        span: Span,
    },

    /// Wrong number of arguments
    #[error("Function {function} expects {expected} arguments, got {got}")]
    InvalidArity {
        /// Function name
        function: String,
        /// Accepted argument counts
        expected: String,
        /// Supplied argument count
        got: usize,
    },

    /// Runtime conversion failure
    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    /// Bad version or version range text
    #[error("{0}")]
    Version(#[from] VersionError),

    /// Member does not exist on the value
    #[error("Member '{member}' not found on {type_name}")]
    MemberNotFound {
        /// Member name
        member: String,
        /// Friendly type of the target
        type_name: String,
    },

    /// `repeat` result would exceed the length limit
    #[error("repeat would produce {length} characters, limit is {limit}")]
    RepeatLimit {
        /// Requested length
        length: usize,
        /// Configured limit
        limit: usize,
    },

    /// Pattern is not a valid regular expression
    #[error("Invalid regular expression '{pattern}': {message}")]
    Regex {
        /// Pattern text
        pattern: String,
        /// Regex engine message
        message: String,
    },

    /// Operation not defined for its operands
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Error message
        message: String,
    },

    /// Formula nests deeper than the compiler allows
    #[error("Maximum nesting depth of {0} exceeded")]
    MaxDepthExceeded(usize),
}

impl FormulaError {
    /// Create an invalid-operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        FormulaError::InvalidOperation {
            message: message.into(),
        }
    }

    /// Errors detected before evaluation starts
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            FormulaError::Syntax(_)
                | FormulaError::UnresolvedSymbol { .. }
                | FormulaError::UnknownFunction { .. }
                | FormulaError::InvalidArity { .. }
                | FormulaError::MaxDepthExceeded(_)
        )
    }
}
