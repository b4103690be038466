//! Formula parser
//!
//! Turns formula text into an [`ExpressionNode`](crate::ast::ExpressionNode)
//! tree with a hand-written tokenizer and a Pratt parser.

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod pratt;
pub mod span;
pub mod tokenizer;

pub use cache::{AstCache, AstCacheStats, SharedAst, global_cache};
pub use error::{ParseError, ParseResult};
pub use pratt::{DEFAULT_MAX_DEPTH, parse_expression_pratt, parse_with_max_depth};
pub use span::{Span, Spanned};

/// Parse formula text into an expression tree
pub fn parse(input: &str) -> ParseResult<crate::ast::ExpressionNode> {
    parse_expression_pratt(input)
}
