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

//! Abstract Syntax Tree (AST) definitions for formulas

use crate::parser::Span;
use smallvec::SmallVec;
use std::fmt;

/// Parsed formula
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    /// Literal operand or named constant
    Literal(LiteralValue),

    /// Dotted symbol path (`item.Cost`, `MyMod.Counter`)
    Symbol {
        /// Path segments, leftmost first
        path: SmallVec<[String; 2]>,
        /// Location in the formula
        span: Span,
    },

    /// Member access on a computed value (`v("1.2").major`)
    Member {
        /// Expression being accessed
        target: Box<ExpressionNode>,
        /// Member name
        name: String,
    },

    /// Unary operation
    UnaryOp {
        /// The operator
        op: UnaryOperator,
        /// The operand
        operand: Box<ExpressionNode>,
    },

    /// Binary operation
    BinaryOp {
        /// The operator
        op: BinaryOperator,
        /// Left operand
        left: Box<ExpressionNode>,
        /// Right operand
        right: Box<ExpressionNode>,
    },

    /// `input replace "pattern" with "substitute"`
    Replace {
        /// Text being rewritten
        input: Box<ExpressionNode>,
        /// Regular expression
        pattern: Box<ExpressionNode>,
        /// Substitution, `$1` style group references allowed
        replacement: Box<ExpressionNode>,
    },

    /// Function call
    FunctionCall {
        /// Function name as written
        name: String,
        /// Arguments
        args: Vec<ExpressionNode>,
        /// Location of the call
        span: Span,
    },

    /// Parenthesized, comma-separated tuple
    Tuple(Vec<ExpressionNode>),
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Number (all formula arithmetic is double precision)
    Number(f64),
    /// Text
    Text(String),
    /// Boolean
    Boolean(bool),
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// `-x`
    Negate,
    /// `+x`
    Plus,
    /// `not x`
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `^`
    Power,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `is`
    Is,
    /// `and` (short-circuit)
    And,
    /// `or` (short-circuit)
    Or,
    /// `..`
    Concat,
    /// `contains`
    Contains,
    /// `starts`
    StartsWith,
    /// `ends`
    EndsWith,
    /// `matches`
    Matches,
    /// `repeat`
    Repeat,
    /// `in versions`
    InVersions,
}

impl BinaryOperator {
    /// Operator spelling as written in formulas
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "^",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Is => "is",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Concat => "..",
            BinaryOperator::Contains => "contains",
            BinaryOperator::StartsWith => "starts",
            BinaryOperator::EndsWith => "ends",
            BinaryOperator::Matches => "matches",
            BinaryOperator::Repeat => "repeat",
            BinaryOperator::InVersions => "in versions",
        }
    }

    /// Operators whose operands are both numbers
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
                | BinaryOperator::Power
        )
    }

    /// Ordering comparisons
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExpressionNode {
    /// Create a literal node
    pub fn literal(value: LiteralValue) -> Self {
        ExpressionNode::Literal(value)
    }

    /// Create a number literal
    pub fn number(value: f64) -> Self {
        ExpressionNode::Literal(LiteralValue::Number(value))
    }

    /// Create a single-segment symbol
    pub fn symbol(name: impl Into<String>, span: Span) -> Self {
        let mut path = SmallVec::new();
        path.push(name.into());
        ExpressionNode::Symbol { path, span }
    }

    /// Create a binary operation node
    pub fn binary_op(op: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> Self {
        ExpressionNode::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Create a unary operation node
    pub fn unary_op(op: UnaryOperator, operand: ExpressionNode) -> Self {
        ExpressionNode::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    /// Create a member access node
    pub fn member(target: ExpressionNode, name: impl Into<String>) -> Self {
        ExpressionNode::Member {
            target: Box::new(target),
            name: name.into(),
        }
    }

    /// Create a replace node
    pub fn replace(
        input: ExpressionNode,
        pattern: ExpressionNode,
        replacement: ExpressionNode,
    ) -> Self {
        ExpressionNode::Replace {
            input: Box::new(input),
            pattern: Box::new(pattern),
            replacement: Box::new(replacement),
        }
    }

    /// Create a function call node
    pub fn function_call(
        name: impl Into<String>,
        args: Vec<ExpressionNode>,
        span: Span,
    ) -> Self {
        ExpressionNode::FunctionCall {
            name: name.into(),
            args,
            span,
        }
    }

    /// Get literal value if this is a literal
    pub fn as_literal(&self) -> Option<&LiteralValue> {
        match self {
            ExpressionNode::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Get the text if this is a text literal
    pub fn as_text_literal(&self) -> Option<&str> {
        match self {
            ExpressionNode::Literal(LiteralValue::Text(text)) => Some(text),
            _ => None,
        }
    }
}
