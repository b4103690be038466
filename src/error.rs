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

//! Error types for patch passes

use crate::compiler::FormulaError;
use crate::document::Position;
use std::fmt;
use thiserror::Error;

/// Result type for patch operations
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors raised while applying patch instructions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    /// Formula failed to compile or evaluate
    #[error("{error} in formula '{formula}' at {position}")]
    Formula {
        /// Underlying error
        #[source]
        error: FormulaError,
        /// Formula text
        formula: String,
        /// Location of the formula
        position: Position,
    },

    /// Value does not fit the field it is assigned to
    #[error("Field '{field}' at {position}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Field or element name
        field: String,
        /// Expected shape
        expected: String,
        /// What was supplied
        found: String,
        /// Location in the document
        position: Position,
    },

    /// Duplicate add or missing update/remove target
    #[error("Identity conflict at {position}: {message}")]
    IdentityConflict {
        /// Description
        message: String,
        /// Location in the document
        position: Position,
    },

    /// Malformed instruction shape
    #[error("Malformed instruction at {position}: {message}")]
    Structural {
        /// Description
        message: String,
        /// Location in the document
        position: Position,
    },

    /// Programmer-level violation that aborts a whole type pass
    #[error("Contract violation: {message}")]
    Contract {
        /// Description
        message: String,
    },
}

/// Classification of [`PatchError`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Formula text does not parse
    Syntax,
    /// Formula names an unknown symbol or function
    UnresolvedSymbol,
    /// Formula failed while evaluating
    Evaluation,
    /// Value does not fit its field
    TypeMismatch,
    /// Duplicate add or missing target
    IdentityConflict,
    /// Malformed instruction shape
    Structural,
    /// Programmer-level violation
    Contract,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::UnresolvedSymbol => "UnresolvedSymbol",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::IdentityConflict => "IdentityConflict",
            ErrorKind::Structural => "StructuralError",
            ErrorKind::Contract => "ContractViolation",
        };
        f.write_str(name)
    }
}

impl PatchError {
    /// Wrap a formula error with its source and position
    pub fn formula(error: FormulaError, formula: impl Into<String>, position: Position) -> Self {
        PatchError::Formula {
            error,
            formula: formula.into(),
            position,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
        position: Position,
    ) -> Self {
        PatchError::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
            position,
        }
    }

    /// Create an identity conflict error
    pub fn identity_conflict(message: impl Into<String>, position: Position) -> Self {
        PatchError::IdentityConflict {
            message: message.into(),
            position,
        }
    }

    /// Create a structural error
    pub fn structural(message: impl Into<String>, position: Position) -> Self {
        PatchError::Structural {
            message: message.into(),
            position,
        }
    }

    /// Create a contract violation
    pub fn contract(message: impl Into<String>) -> Self {
        PatchError::Contract {
            message: message.into(),
        }
    }

    /// Error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::Formula { error, .. } => match error {
                FormulaError::Syntax(_) | FormulaError::MaxDepthExceeded(_) => ErrorKind::Syntax,
                FormulaError::UnresolvedSymbol { .. }
                | FormulaError::UnknownFunction { .. }
                | FormulaError::InvalidArity { .. } => ErrorKind::UnresolvedSymbol,
                _ => ErrorKind::Evaluation,
            },
            PatchError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            PatchError::IdentityConflict { .. } => ErrorKind::IdentityConflict,
            PatchError::Structural { .. } => ErrorKind::Structural,
            PatchError::Contract { .. } => ErrorKind::Contract,
        }
    }

    /// Document position, when known
    pub fn position(&self) -> Option<Position> {
        match self {
            PatchError::Formula { position, .. }
            | PatchError::TypeMismatch { position, .. }
            | PatchError::IdentityConflict { position, .. }
            | PatchError::Structural { position, .. } => Some(*position),
            PatchError::Contract { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseError, Span};

    #[test]
    fn test_kinds() {
        let position = Position::new(2, 4);
        let syntax = PatchError::formula(
            FormulaError::Syntax(ParseError::Empty),
            "",
            position,
        );
        assert_eq!(syntax.kind(), ErrorKind::Syntax);

        let unresolved = PatchError::formula(
            FormulaError::UnresolvedSymbol {
                name: "x".into(),
                span: Span::new(0, 1),
            },
            "x",
            position,
        );
        assert_eq!(unresolved.kind(), ErrorKind::UnresolvedSymbol);
        assert_eq!(unresolved.position(), Some(position));

        let evaluation = PatchError::formula(
            FormulaError::invalid_operation("boom"),
            "boom()",
            position,
        );
        assert_eq!(evaluation.kind(), ErrorKind::Evaluation);
        assert_eq!(PatchError::contract("x").position(), None);
    }

    #[test]
    fn test_messages_carry_positions() {
        let error = PatchError::type_mismatch("Cost", "number", "'abc'", Position::new(5, 3));
        assert_eq!(
            error.to_string(),
            "Field 'Cost' at 5:3: expected number, found 'abc'"
        );
    }
}
