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

//! Pratt parser for formulas
//!
//! ### Precedence Levels (highest to lowest):
//! - **Invocation** (12): `.` member access, function calls
//! - **Power** (11): `^` (right associative)
//! - **Unary** (10): `-`, `+`, `not`
//! - **Multiplicative** (9): `*`, `/`, `%`
//! - **Additive** (8): `+`, `-`
//! - **Concat** (7): `..`, `repeat`
//! - **Text** (6): `contains`, `starts`, `ends`, `matches`, `replace ... with ...`
//! - **Comparison** (5): `<`, `<=`, `>`, `>=`
//! - **Membership** (4): `in versions`
//! - **Equality** (3): `is`
//! - **And** (2): `and`
//! - **Or** (1): `or`
//!
//! Each comparison token maps to exactly one operator; `<=` and `>=` are
//! never folded into their strict forms.
//!
//! Nesting (groups, operands of operators, operator chains and member
//! chains) is bounded by a depth limit, so hostile input fails with
//! [`ParseError::TooDeep`] instead of exhausting the stack.

use super::error::{ParseError, ParseResult};
use super::span::{Span, Spanned};
use super::tokenizer::{Token, Tokenizer};
use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator};

/// Operator precedence levels (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Logical OR
    Or = 1,
    /// Logical AND
    And = 2,
    /// Equality (is)
    Equality = 3,
    /// Version range membership (in versions)
    Membership = 4,
    /// Ordering comparisons
    Comparison = 5,
    /// String predicates and substitution
    Text = 6,
    /// Concatenation and repetition
    Concat = 7,
    /// Additive operators
    Additive = 8,
    /// Multiplicative operators
    Multiplicative = 9,
    /// Unary operators
    Unary = 10,
    /// Exponentiation
    Power = 11,
    /// Member access
    Invocation = 12,
}

impl Precedence {
    /// Get the next higher precedence level for left-associative operators
    #[inline(always)]
    pub const fn next_level(self) -> Self {
        match self {
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Membership,
            Precedence::Membership => Precedence::Comparison,
            Precedence::Comparison => Precedence::Text,
            Precedence::Text => Precedence::Concat,
            Precedence::Concat => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative => Precedence::Unary,
            Precedence::Unary => Precedence::Power,
            Precedence::Power => Precedence::Invocation,
            Precedence::Invocation => Precedence::Invocation,
        }
    }

    /// Check if this precedence is right associative
    #[inline(always)]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, Precedence::Power)
    }
}

#[inline(always)]
fn get_precedence(token: &Token<'_>) -> Option<Precedence> {
    match token {
        Token::Plus | Token::Minus => Some(Precedence::Additive),
        Token::Multiply | Token::Divide | Token::Modulo => Some(Precedence::Multiplicative),
        Token::Power => Some(Precedence::Power),
        Token::LessThan
        | Token::LessThanOrEqual
        | Token::GreaterThan
        | Token::GreaterThanOrEqual => Some(Precedence::Comparison),
        Token::Is => Some(Precedence::Equality),
        Token::And => Some(Precedence::And),
        Token::Or => Some(Precedence::Or),
        Token::Concat | Token::Repeat => Some(Precedence::Concat),
        Token::Contains | Token::Starts | Token::Ends | Token::Matches | Token::Replace => {
            Some(Precedence::Text)
        }
        Token::In => Some(Precedence::Membership),
        _ => None,
    }
}

#[inline(always)]
fn token_to_binary_op(token: &Token<'_>) -> Option<BinaryOperator> {
    match token {
        Token::Plus => Some(BinaryOperator::Add),
        Token::Minus => Some(BinaryOperator::Subtract),
        Token::Multiply => Some(BinaryOperator::Multiply),
        Token::Divide => Some(BinaryOperator::Divide),
        Token::Modulo => Some(BinaryOperator::Modulo),
        Token::Power => Some(BinaryOperator::Power),
        Token::LessThan => Some(BinaryOperator::LessThan),
        Token::LessThanOrEqual => Some(BinaryOperator::LessThanOrEqual),
        Token::GreaterThan => Some(BinaryOperator::GreaterThan),
        Token::GreaterThanOrEqual => Some(BinaryOperator::GreaterThanOrEqual),
        Token::Is => Some(BinaryOperator::Is),
        Token::And => Some(BinaryOperator::And),
        Token::Or => Some(BinaryOperator::Or),
        Token::Concat => Some(BinaryOperator::Concat),
        Token::Repeat => Some(BinaryOperator::Repeat),
        Token::Contains => Some(BinaryOperator::Contains),
        Token::Starts => Some(BinaryOperator::StartsWith),
        Token::Ends => Some(BinaryOperator::EndsWith),
        Token::Matches => Some(BinaryOperator::Matches),
        Token::In => Some(BinaryOperator::InVersions),
        _ => None,
    }
}

/// Named constants, matched case-insensitively
fn named_constant(name: &str) -> Option<LiteralValue> {
    let lower = name.to_ascii_lowercase();
    let value = match lower.as_str() {
        "pi" => LiteralValue::Number(std::f64::consts::PI),
        "e" => LiteralValue::Number(std::f64::consts::E),
        "true" => LiteralValue::Boolean(true),
        "false" => LiteralValue::Boolean(false),
        "nan" => LiteralValue::Number(f64::NAN),
        "inf" => LiteralValue::Number(f64::INFINITY),
        _ => return None,
    };
    Some(value)
}

/// Default nesting limit for [`parse_expression_pratt`]
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Pratt parser over a token stream
pub struct PrattParser<'input> {
    tokenizer: Tokenizer<'input>,
    current: Option<Spanned<Token<'input>>>,
    input_len: usize,
    depth: usize,
    max_depth: usize,
}

impl<'input> PrattParser<'input> {
    /// Create new parser, primed with the first token
    pub fn new(input: &'input str) -> ParseResult<Self> {
        Self::with_max_depth(input, DEFAULT_MAX_DEPTH)
    }

    /// Create a parser that rejects nesting deeper than `max_depth`
    pub fn with_max_depth(input: &'input str, max_depth: usize) -> ParseResult<Self> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            input_len: input.len(),
            depth: 0,
            max_depth,
        })
    }

    fn enter(&mut self) -> ParseResult<()> {
        if self.depth >= self.max_depth {
            return Err(ParseError::TooDeep {
                limit: self.max_depth,
                span: self.current_span(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    #[inline(always)]
    fn advance(&mut self) -> ParseResult<()> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    #[inline(always)]
    fn current(&self) -> Option<&Token<'input>> {
        self.current.as_ref().map(|t| &t.value)
    }

    fn current_span(&self) -> Span {
        self.current
            .as_ref()
            .map(|t| t.span)
            .unwrap_or_else(|| Span::at(self.input_len))
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match &self.current {
            Some(token) => ParseError::UnexpectedToken {
                token: token.value.describe(),
                span: token.span,
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
                span: Span::at(self.input_len),
            },
        }
    }

    fn expect(&mut self, expected: Token<'input>, description: &str) -> ParseResult<Span> {
        match &self.current {
            Some(token)
                if std::mem::discriminant(&token.value) == std::mem::discriminant(&expected) =>
            {
                let span = token.span;
                self.advance()?;
                Ok(span)
            }
            _ => Err(self.unexpected(description)),
        }
    }

    /// Parse a complete formula; trailing tokens are an error
    pub fn parse(mut self) -> ParseResult<ExpressionNode> {
        if self.current.is_none() {
            return Err(ParseError::Empty);
        }
        let expr = self.parse_expression_with_precedence(Precedence::Or)?;
        if self.current.is_some() {
            return Err(self.unexpected("end of formula"));
        }
        Ok(expr)
    }

    fn parse_expression_with_precedence(
        &mut self,
        min_precedence: Precedence,
    ) -> ParseResult<ExpressionNode> {
        self.enter()?;
        let mut left = self.parse_unary()?;
        // Left-associative chains nest the tree without recursing here
        let mut chain = 0;

        while let Some(token) = self.current() {
            let Some(precedence) = get_precedence(token) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }

            let next_min = if precedence.is_right_associative() {
                precedence
            } else {
                precedence.next_level()
            };

            let op = match token {
                Token::Replace => None,
                other => match token_to_binary_op(other) {
                    Some(op) => Some(op),
                    None => break,
                },
            };
            self.advance()?;

            left = match op {
                None => {
                    let pattern = self.parse_expression_with_precedence(next_min)?;
                    self.expect(Token::With, "'with' after replace pattern")?;
                    let replacement = self.parse_expression_with_precedence(next_min)?;
                    ExpressionNode::replace(left, pattern, replacement)
                }
                Some(BinaryOperator::InVersions) => {
                    self.expect(Token::Versions, "'versions' after 'in'")?;
                    let right = self.parse_expression_with_precedence(next_min)?;
                    ExpressionNode::binary_op(BinaryOperator::InVersions, left, right)
                }
                Some(op) => {
                    let right = self.parse_expression_with_precedence(next_min)?;
                    ExpressionNode::binary_op(op, left, right)
                }
            };
            self.enter()?;
            chain += 1;
        }

        self.leave(chain + 1);
        Ok(left)
    }

    /// Unary operators bind looser than `^`, so `-2^2` is `-(2^2)`
    fn parse_unary(&mut self) -> ParseResult<ExpressionNode> {
        let op = match self.current() {
            Some(Token::Minus) => UnaryOperator::Negate,
            Some(Token::Plus) => UnaryOperator::Plus,
            Some(Token::Not) => UnaryOperator::Not,
            _ => return self.parse_power(),
        };
        self.advance()?;
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave(1);

        // Fold signed numeric literals so `-5` stays a literal operand
        Ok(match (op, operand) {
            (UnaryOperator::Negate, ExpressionNode::Literal(LiteralValue::Number(n))) => {
                ExpressionNode::number(-n)
            }
            (UnaryOperator::Plus, lit @ ExpressionNode::Literal(LiteralValue::Number(_))) => lit,
            (op, operand) => ExpressionNode::unary_op(op, operand),
        })
    }

    fn parse_power(&mut self) -> ParseResult<ExpressionNode> {
        let base = self.parse_postfix()?;
        if let Some(Token::Power) = self.current() {
            self.advance()?;
            // Right associative, and the exponent may carry its own sign
            self.enter()?;
            let exponent = self.parse_unary()?;
            self.leave(1);
            return Ok(ExpressionNode::binary_op(
                BinaryOperator::Power,
                base,
                exponent,
            ));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> ParseResult<ExpressionNode> {
        let mut expr = self.parse_primary()?;
        let mut chain = 0;

        while let Some(Token::Dot) = self.current() {
            self.advance()?;
            let name = match self.current() {
                Some(Token::Identifier(name)) => name.to_string(),
                _ => return Err(self.unexpected("member name after '.'")),
            };
            let member_span = self.current_span();
            self.advance()?;

            expr = match expr {
                ExpressionNode::Symbol { mut path, span } => {
                    path.push(name);
                    ExpressionNode::Symbol {
                        path,
                        span: span.merge(member_span),
                    }
                }
                other => {
                    self.enter()?;
                    chain += 1;
                    ExpressionNode::member(other, name)
                }
            };
        }

        self.leave(chain);
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<ExpressionNode> {
        let span = self.current_span();
        match self.current() {
            Some(Token::Number(value)) => {
                let value = *value;
                self.advance()?;
                Ok(ExpressionNode::number(value))
            }

            Some(Token::String(value)) => {
                let value = value.clone();
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Text(value)))
            }

            Some(Token::Identifier(name)) => {
                let name = *name;
                self.advance()?;

                if let Some(Token::LeftParen) = self.current() {
                    return self.parse_function_call(name, span);
                }
                if let Some(constant) = named_constant(name) {
                    return Ok(ExpressionNode::literal(constant));
                }
                Ok(ExpressionNode::symbol(name, span))
            }

            Some(Token::LeftParen) => {
                self.advance()?;
                let first = self.parse_expression_with_precedence(Precedence::Or)?;

                if let Some(Token::Comma) = self.current() {
                    let mut items = vec![first];
                    while let Some(Token::Comma) = self.current() {
                        self.advance()?;
                        items.push(self.parse_expression_with_precedence(Precedence::Or)?);
                    }
                    self.expect(Token::RightParen, "')' to close tuple")?;
                    return Ok(ExpressionNode::Tuple(items));
                }

                self.expect(Token::RightParen, "')' to close group")?;
                Ok(first)
            }

            _ => Err(self.unexpected("operand")),
        }
    }

    fn parse_function_call(&mut self, name: &str, start: Span) -> ParseResult<ExpressionNode> {
        self.expect(Token::LeftParen, "'('")?;
        let mut args = Vec::new();

        if let Some(Token::RightParen) = self.current() {
            let end = self.current_span();
            self.advance()?;
            return Ok(ExpressionNode::function_call(name, args, start.merge(end)));
        }

        loop {
            args.push(self.parse_expression_with_precedence(Precedence::Or)?);
            match self.current() {
                Some(Token::Comma) => self.advance()?,
                Some(Token::RightParen) => break,
                _ => return Err(self.unexpected("',' or ')' in argument list")),
            }
        }
        let end = self.expect(Token::RightParen, "')'")?;
        Ok(ExpressionNode::function_call(name, args, start.merge(end)))
    }
}

/// Parse formula text into an expression tree
pub fn parse_expression_pratt(input: &str) -> ParseResult<ExpressionNode> {
    PrattParser::new(input)?.parse()
}

/// Parse formula text, rejecting nesting deeper than `max_depth`
pub fn parse_with_max_depth(input: &str, max_depth: usize) -> ParseResult<ExpressionNode> {
    PrattParser::with_max_depth(input, max_depth)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> ExpressionNode {
        parse_expression_pratt(input).unwrap()
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(Precedence::Power > Precedence::Unary);
        assert!(Precedence::Multiplicative > Precedence::Additive);
        assert!(Precedence::Additive > Precedence::Concat);
        assert!(Precedence::Concat > Precedence::Text);
        assert!(Precedence::Text > Precedence::Comparison);
        assert!(Precedence::Comparison > Precedence::Membership);
        assert!(Precedence::Membership > Precedence::Equality);
        assert!(Precedence::And > Precedence::Or);
        assert_eq!(get_precedence(&Token::Replace), Some(Precedence::Text));
        assert_eq!(get_precedence(&Token::Repeat), Some(Precedence::Concat));
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let result = parse("2 + 3 * 4");
        let ExpressionNode::BinaryOp {
            op: BinaryOperator::Add,
            left,
            right,
        } = result
        else {
            panic!("Expected addition with multiplication on right");
        };
        assert_eq!(*left, ExpressionNode::number(2.0));
        assert!(matches!(
            *right,
            ExpressionNode::BinaryOp {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_power_is_right_associative_and_beats_negation() {
        assert!(matches!(
            parse("-2 ^ 2"),
            ExpressionNode::UnaryOp {
                op: UnaryOperator::Negate,
                ..
            }
        ));
        assert_eq!(parse("-5"), ExpressionNode::number(-5.0));

        let result = parse("2 ^ 3 ^ 2");
        let ExpressionNode::BinaryOp { right, .. } = result else {
            panic!("Expected power");
        };
        assert!(matches!(
            *right,
            ExpressionNode::BinaryOp {
                op: BinaryOperator::Power,
                ..
            }
        ));
    }

    #[test]
    fn test_comparisons_map_to_distinct_operators() {
        for (text, expected) in [
            ("a < b", BinaryOperator::LessThan),
            ("a <= b", BinaryOperator::LessThanOrEqual),
            ("a > b", BinaryOperator::GreaterThan),
            ("a >= b", BinaryOperator::GreaterThanOrEqual),
        ] {
            let ExpressionNode::BinaryOp { op, .. } = parse(text) else {
                panic!("Expected comparison for {text}");
            };
            assert_eq!(op, expected, "{text}");
        }
    }

    #[test]
    fn test_dotted_symbol_path() {
        let ExpressionNode::Symbol { path, .. } = parse("item.Cost.Base") else {
            panic!("Expected symbol");
        };
        assert_eq!(path.as_slice(), ["item", "Cost", "Base"]);
    }

    #[test]
    fn test_member_on_call() {
        assert!(matches!(
            parse("v(\"1.2\").major"),
            ExpressionNode::Member { .. }
        ));
    }

    #[test]
    fn test_nested_call_arguments() {
        let ExpressionNode::FunctionCall { name, args, .. } = parse("max(min(1, 2), 3, -4)") else {
            panic!("Expected call");
        };
        assert_eq!(name, "max");
        assert_eq!(args.len(), 3);
        assert!(matches!(
            &args[0],
            ExpressionNode::FunctionCall { name, args, .. } if name == "min" && args.len() == 2
        ));
        assert_eq!(args[2], ExpressionNode::number(-4.0));
    }

    #[test]
    fn test_replace_with() {
        let ExpressionNode::Replace {
            pattern,
            replacement,
            ..
        } = parse("name replace \"a+\" with \"b\"")
        else {
            panic!("Expected replace");
        };
        assert_eq!(pattern.as_text_literal(), Some("a+"));
        assert_eq!(replacement.as_text_literal(), Some("b"));
    }

    #[test]
    fn test_in_versions() {
        assert!(matches!(
            parse("v(\"1.5\") in versions \"[1.0,2.0)\""),
            ExpressionNode::BinaryOp {
                op: BinaryOperator::InVersions,
                ..
            }
        ));
        assert!(parse_expression_pratt("a in b").is_err());
    }

    #[test]
    fn test_constants_are_case_insensitive() {
        assert_eq!(parse("TRUE"), ExpressionNode::literal(LiteralValue::Boolean(true)));
        assert_eq!(parse("-Inf"), ExpressionNode::number(f64::NEG_INFINITY));
        assert!(matches!(
            parse("NaN"),
            ExpressionNode::Literal(LiteralValue::Number(n)) if n.is_nan()
        ));
    }

    #[test]
    fn test_tuple_literal() {
        let ExpressionNode::Tuple(items) = parse("(1, \"a\", true)") else {
            panic!("Expected tuple");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_syntax_errors_carry_span() {
        let err = parse_expression_pratt("1 + * 2").unwrap_err();
        assert_eq!(err.span(), Span::new(4, 5));

        let err = parse_expression_pratt("(1 + 2").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));

        let err = parse_expression_pratt("1 2").unwrap_err();
        assert_eq!(err.span(), Span::new(2, 3));

        assert_eq!(parse_expression_pratt("   ").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(
            parse_expression_pratt(&deep),
            Err(ParseError::TooDeep { limit: DEFAULT_MAX_DEPTH, .. })
        ));
        for hostile in [
            "-".repeat(200_000) + "1",
            "not ".repeat(200_000) + "true",
            "2 ^ ".repeat(200_000) + "2",
            "1 + ".repeat(200_000) + "1",
            "v(\"1\")".to_string() + &".major".repeat(200_000),
        ] {
            assert!(
                matches!(parse_expression_pratt(&hostile), Err(ParseError::TooDeep { .. })),
                "{}",
                &hostile[..20]
            );
        }

        assert!(parse_with_max_depth("((1))", 3).is_ok());
        assert!(matches!(
            parse_with_max_depth("(((1)))", 3),
            Err(ParseError::TooDeep { limit: 3, .. })
        ));
    }
}
