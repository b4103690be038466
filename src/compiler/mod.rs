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

//! Formula compiler
//!
//! Binds a parsed formula against a [`Scope`] and compiles it into a tree
//! of closures. Each node carries the static kind of its result so that
//! coercions are only inserted where an operand's kind differs from what
//! the operator needs.

pub mod error;
pub mod functions;
pub mod regex_cache;
pub mod scope;

pub use error::{FormulaError, FormulaResult};
pub use functions::{Builtin, FunctionSignature, lookup_function};
pub use regex_cache::{RegexCache, regex_cache};
pub use scope::{Bindings, ResolvedSymbol, Scope, ScopeProvider};

use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator};
use crate::model::{TypeCoercion, Value, ValueKind, Version, VersionRange};
use crate::parser::{self, ParseError, Span, global_cache};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Eval<T> = Box<dyn Fn() -> FormulaResult<T> + Send + Sync>;

/// Zero-argument callable produced by compilation
pub type Evaluator = Eval<Value>;

/// Result kind known at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticKind {
    /// Always a number
    Number,
    /// Always text
    Text,
    /// Always a boolean
    Boolean,
    /// Always a version
    Version,
    /// Always a tuple
    Tuple,
    /// Only known at evaluation time
    Dynamic,
}

impl StaticKind {
    fn of(value: &Value) -> Self {
        match value.kind() {
            ValueKind::Number => StaticKind::Number,
            ValueKind::Text => StaticKind::Text,
            ValueKind::Boolean => StaticKind::Boolean,
            ValueKind::Version => StaticKind::Version,
            ValueKind::Tuple => StaticKind::Tuple,
            ValueKind::Null | ValueKind::Record => StaticKind::Dynamic,
        }
    }

    fn type_name(self) -> Option<&'static str> {
        match self {
            StaticKind::Number => Some("number"),
            StaticKind::Text => Some("text"),
            StaticKind::Boolean => Some("boolean"),
            StaticKind::Version => Some("Version"),
            StaticKind::Tuple | StaticKind::Dynamic => None,
        }
    }
}

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Longest text `repeat` may produce
    pub repeat_limit: usize,
    /// Share parsed trees by source text
    pub use_parse_cache: bool,
    /// Maximum expression nesting depth
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            repeat_limit: 2048,
            use_parse_cache: true,
            max_depth: 128,
        }
    }
}

/// A compiled formula
pub struct Formula {
    source: String,
    kind: StaticKind,
    evaluator: Evaluator,
}

impl Formula {
    /// Evaluate the formula
    pub fn evaluate(&self) -> FormulaResult<Value> {
        (self.evaluator)()
    }

    /// Evaluate and coerce to boolean
    pub fn evaluate_bool(&self) -> FormulaResult<bool> {
        Ok(TypeCoercion::to_boolean(&self.evaluate()?)?)
    }

    /// Source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Static result kind
    pub fn kind(&self) -> StaticKind {
        self.kind
    }

    /// Unwrap into the bare callable
    pub fn into_evaluator(self) -> Evaluator {
        self.evaluator
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .finish()
    }
}

struct Compiled {
    kind: StaticKind,
    eval: Evaluator,
}

impl Compiled {
    fn new<F>(kind: StaticKind, eval: F) -> Self
    where
        F: Fn() -> FormulaResult<Value> + Send + Sync + 'static,
    {
        Self {
            kind,
            eval: Box::new(eval),
        }
    }

    fn constant(value: Value) -> Self {
        let kind = StaticKind::of(&value);
        Self::new(kind, move || Ok(value.clone()))
    }

    fn number(self) -> Eval<f64> {
        let eval = self.eval;
        Box::new(move || match eval()? {
            Value::Number(n) => Ok(n),
            other => Ok(TypeCoercion::to_number(&other)?),
        })
    }

    fn text(self) -> Eval<String> {
        let eval = self.eval;
        Box::new(move || match eval()? {
            Value::Text(s) => Ok(s),
            other => Ok(TypeCoercion::to_text(&other)),
        })
    }

    fn boolean(self) -> Eval<bool> {
        let eval = self.eval;
        Box::new(move || match eval()? {
            Value::Boolean(b) => Ok(b),
            other => Ok(TypeCoercion::to_boolean(&other)?),
        })
    }

    fn version(self) -> Eval<Version> {
        let eval = self.eval;
        Box::new(move || match eval()? {
            Value::Version(v) => Ok(v),
            other => Ok(TypeCoercion::to_version(&other)?),
        })
    }
}

/// Compiles formula text against a scope chain
#[derive(Debug, Clone)]
pub struct FormulaCompiler {
    scope: Scope,
    options: CompileOptions,
}

impl FormulaCompiler {
    /// Create a compiler with default options
    pub fn new(scope: Scope) -> Self {
        Self::with_options(scope, CompileOptions::default())
    }

    /// Create a compiler with custom options
    pub fn with_options(scope: Scope, options: CompileOptions) -> Self {
        Self { scope, options }
    }

    /// Scope used for symbol resolution
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Compile formula text. Unknown symbols fail here, not at evaluation.
    pub fn compile(&self, text: &str) -> FormulaResult<Formula> {
        let max_depth = self.options.max_depth;
        let parsed = if self.options.use_parse_cache {
            global_cache().get_or_parse(text, max_depth)
        } else {
            parser::parse_with_max_depth(text, max_depth).map(Arc::new)
        };
        let ast = parsed.map_err(|error| match error {
            ParseError::TooDeep { limit, .. } => FormulaError::MaxDepthExceeded(limit),
            other => FormulaError::Syntax(other),
        })?;
        self.compile_ast(text, &ast)
    }

    /// Compile an already parsed formula
    pub fn compile_ast(&self, source: &str, ast: &ExpressionNode) -> FormulaResult<Formula> {
        let compiled = self.compile_node(ast, 0)?;
        log::trace!("Compiled formula '{}' as {:?}", source, compiled.kind);
        Ok(Formula {
            source: source.to_string(),
            kind: compiled.kind,
            evaluator: compiled.eval,
        })
    }

    fn compile_node(&self, node: &ExpressionNode, depth: usize) -> FormulaResult<Compiled> {
        if depth >= self.options.max_depth {
            return Err(FormulaError::MaxDepthExceeded(self.options.max_depth));
        }
        let depth = depth + 1;

        match node {
            ExpressionNode::Literal(literal) => Ok(Compiled::constant(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Text(s) => Value::Text(s.clone()),
                LiteralValue::Boolean(b) => Value::Boolean(*b),
            })),
            ExpressionNode::Symbol { path, span } => self.compile_symbol(path, *span),
            ExpressionNode::Member { target, name } => {
                let target = self.compile_node(target, depth)?.eval;
                let name = name.clone();
                Ok(Compiled::new(StaticKind::Dynamic, move || {
                    member_of(&target()?, &name)
                }))
            }
            ExpressionNode::UnaryOp { op, operand } => {
                let operand = self.compile_node(operand, depth)?;
                Ok(compile_unary(*op, operand))
            }
            ExpressionNode::BinaryOp { op, left, right } => {
                self.compile_binary(*op, left, right, depth)
            }
            ExpressionNode::Replace {
                input,
                pattern,
                replacement,
            } => {
                let input = self.compile_node(input, depth)?.text();
                let pattern = self.compile_pattern(pattern, depth)?;
                let replacement = self.compile_node(replacement, depth)?.text();
                Ok(Compiled::new(StaticKind::Text, move || {
                    let input = input()?;
                    let regex = pattern()?;
                    let replacement = replacement()?;
                    Ok(Value::Text(
                        regex.replace_all(&input, replacement.as_str()).into_owned(),
                    ))
                }))
            }
            ExpressionNode::FunctionCall { name, args, span } => {
                self.compile_function_call(name, args, *span, depth)
            }
            ExpressionNode::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|item| self.compile_node(item, depth).map(|c| c.eval))
                    .collect::<FormulaResult<Vec<_>>>()?;
                Ok(Compiled::new(StaticKind::Tuple, move || {
                    let values = items
                        .iter()
                        .map(|item| item())
                        .collect::<FormulaResult<Vec<_>>>()?;
                    Ok(Value::tuple(values))
                }))
            }
        }
    }

    fn compile_symbol(&self, path: &[String], span: Span) -> FormulaResult<Compiled> {
        let ResolvedSymbol {
            provider,
            name,
            consumed,
        } = self
            .scope
            .resolve(path)
            .ok_or_else(|| FormulaError::UnresolvedSymbol {
                name: path.join("."),
                span,
            })?;
        let members: Vec<String> = path[consumed..].to_vec();

        Ok(Compiled::new(StaticKind::Dynamic, move || {
            let mut value =
                provider
                    .lookup(&name)
                    .ok_or_else(|| FormulaError::UnresolvedSymbol {
                        name: name.clone(),
                        span,
                    })?;
            for member in &members {
                value = member_of(&value, member)?;
            }
            Ok(value)
        }))
    }

    fn compile_binary(
        &self,
        op: BinaryOperator,
        left_node: &ExpressionNode,
        right_node: &ExpressionNode,
        depth: usize,
    ) -> FormulaResult<Compiled> {
        let left = self.compile_node(left_node, depth)?;

        let compiled = match op {
            BinaryOperator::Add => numeric(left, self.compile_node(right_node, depth)?, |a, b| a + b),
            BinaryOperator::Subtract => {
                numeric(left, self.compile_node(right_node, depth)?, |a, b| a - b)
            }
            BinaryOperator::Multiply => {
                numeric(left, self.compile_node(right_node, depth)?, |a, b| a * b)
            }
            BinaryOperator::Divide => {
                numeric(left, self.compile_node(right_node, depth)?, |a, b| a / b)
            }
            BinaryOperator::Modulo => {
                numeric(left, self.compile_node(right_node, depth)?, |a, b| a % b)
            }
            BinaryOperator::Power => numeric(left, self.compile_node(right_node, depth)?, f64::powf),
            BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => {
                comparison(op, left, self.compile_node(right_node, depth)?)
            }
            BinaryOperator::Is => {
                let (l, r) = (left.eval, self.compile_node(right_node, depth)?.eval);
                Compiled::new(StaticKind::Boolean, move || {
                    Ok(Value::Boolean(values_equal(&l()?, &r()?)))
                })
            }
            BinaryOperator::And => {
                let (l, r) = (left.boolean(), self.compile_node(right_node, depth)?.boolean());
                Compiled::new(StaticKind::Boolean, move || Ok(Value::Boolean(l()? && r()?)))
            }
            BinaryOperator::Or => {
                let (l, r) = (left.boolean(), self.compile_node(right_node, depth)?.boolean());
                Compiled::new(StaticKind::Boolean, move || Ok(Value::Boolean(l()? || r()?)))
            }
            BinaryOperator::Concat => {
                let (l, r) = (left.text(), self.compile_node(right_node, depth)?.text());
                Compiled::new(StaticKind::Text, move || {
                    let mut text = l()?;
                    text.push_str(&r()?);
                    Ok(Value::Text(text))
                })
            }
            BinaryOperator::Contains => {
                let (l, r) = (left.eval, self.compile_node(right_node, depth)?.eval);
                Compiled::new(StaticKind::Boolean, move || {
                    let haystack = l()?;
                    let needle = r()?;
                    let found = match &haystack {
                        Value::Tuple(items) => items.iter().any(|item| values_equal(item, &needle)),
                        other => TypeCoercion::to_text(other)
                            .contains(TypeCoercion::to_text(&needle).as_str()),
                    };
                    Ok(Value::Boolean(found))
                })
            }
            BinaryOperator::StartsWith => {
                let (l, r) = (left.text(), self.compile_node(right_node, depth)?.text());
                Compiled::new(StaticKind::Boolean, move || {
                    Ok(Value::Boolean(l()?.starts_with(r()?.as_str())))
                })
            }
            BinaryOperator::EndsWith => {
                let (l, r) = (left.text(), self.compile_node(right_node, depth)?.text());
                Compiled::new(StaticKind::Boolean, move || {
                    Ok(Value::Boolean(l()?.ends_with(r()?.as_str())))
                })
            }
            BinaryOperator::Matches => {
                let text = left.text();
                let pattern = self.compile_pattern(right_node, depth)?;
                Compiled::new(StaticKind::Boolean, move || {
                    let text = text()?;
                    Ok(Value::Boolean(pattern()?.is_match(&text)))
                })
            }
            BinaryOperator::Repeat => {
                let limit = self.options.repeat_limit;
                let (text, count) = (left.text(), self.compile_node(right_node, depth)?.number());
                Compiled::new(StaticKind::Text, move || {
                    let text = text()?;
                    let count = count()?;
                    if !(count >= 0.0) || count.fract() != 0.0 {
                        return Err(FormulaError::invalid_operation(format!(
                            "repeat count must be a non-negative integer, got {}",
                            TypeCoercion::format_number(count)
                        )));
                    }
                    let count = count as usize;
                    let length = text.chars().count().saturating_mul(count);
                    if length > limit {
                        return Err(FormulaError::RepeatLimit { length, limit });
                    }
                    Ok(Value::Text(text.repeat(count)))
                })
            }
            BinaryOperator::InVersions => {
                let version = left.version();
                let range = self.compile_range(right_node, depth)?;
                Compiled::new(StaticKind::Boolean, move || {
                    let version = version()?;
                    Ok(Value::Boolean(range()?.contains(&version)))
                })
            }
        };
        Ok(compiled)
    }

    /// Literal patterns are compiled once here, so a bad literal pattern is
    /// a compile error
    fn compile_pattern(&self, node: &ExpressionNode, depth: usize) -> FormulaResult<Eval<Arc<Regex>>> {
        if let Some(pattern) = node.as_text_literal() {
            let regex = regex_cache().get_regex(pattern)?;
            return Ok(Box::new(move || Ok(Arc::clone(&regex))));
        }
        let text = self.compile_node(node, depth)?.text();
        Ok(Box::new(move || regex_cache().get_regex(&text()?)))
    }

    fn compile_range(
        &self,
        node: &ExpressionNode,
        depth: usize,
    ) -> FormulaResult<Eval<Arc<VersionRange>>> {
        if let Some(text) = node.as_text_literal() {
            let range = Arc::new(VersionRange::parse(text)?);
            return Ok(Box::new(move || Ok(Arc::clone(&range))));
        }
        let text = self.compile_node(node, depth)?.text();
        Ok(Box::new(move || Ok(Arc::new(VersionRange::parse(&text()?)?))))
    }

    fn compile_function_call(
        &self,
        name: &str,
        args: &[ExpressionNode],
        span: Span,
        depth: usize,
    ) -> FormulaResult<Compiled> {
        // `value()` and friends: zero-argument calls of known symbols
        if args.is_empty() && self.scope.resolve(&[name.to_string()]).is_some() {
            return self.compile_symbol(&[name.to_string()], span);
        }

        let Some(signature) = lookup_function(name) else {
            if args.is_empty() {
                return Err(FormulaError::UnresolvedSymbol {
                    name: name.to_string(),
                    span,
                });
            }
            return Err(FormulaError::UnknownFunction {
                name: name.to_string(),
                span,
            });
        };
        if !signature.accepts(args.len()) {
            return Err(FormulaError::InvalidArity {
                function: signature.name.to_string(),
                expected: signature.arity_text(),
                got: args.len(),
            });
        }

        // `v("1.2")` parses once at compile time
        if let (Builtin::Version, Some(text)) = (signature.builtin, args[0].as_text_literal()) {
            let version = TypeCoercion::to_version(&Value::text(text))?;
            return Ok(Compiled::constant(Value::Version(version)));
        }

        let mut operands = args
            .iter()
            .map(|arg| self.compile_node(arg, depth))
            .collect::<FormulaResult<Vec<_>>>()?
            .into_iter();

        let result = match signature.builtin {
            Builtin::Unary(f) => {
                let x = required(operands.next())?.number();
                Compiled::new(StaticKind::Number, move || Ok(Value::Number(f(x()?))))
            }
            Builtin::Binary(f) => {
                let x = required(operands.next())?.number();
                let y = required(operands.next())?.number();
                Compiled::new(StaticKind::Number, move || Ok(Value::Number(f(x()?, y()?))))
            }
            Builtin::Test(f) => {
                let x = required(operands.next())?.number();
                Compiled::new(StaticKind::Boolean, move || Ok(Value::Boolean(f(x()?))))
            }
            Builtin::Round => {
                let x = required(operands.next())?.number();
                let digits = operands.next().map(Compiled::number);
                Compiled::new(StaticKind::Number, move || {
                    let digits = match &digits {
                        Some(digits) => digits()?,
                        None => 0.0,
                    };
                    Ok(Value::Number(functions::round_away_from_zero(x()?, digits)))
                })
            }
            Builtin::Log => {
                let x = required(operands.next())?.number();
                let base = operands.next().map(Compiled::number);
                Compiled::new(StaticKind::Number, move || {
                    let x = x()?;
                    Ok(Value::Number(match &base {
                        Some(base) => x.log(base()?),
                        None => x.ln(),
                    }))
                })
            }
            Builtin::Min | Builtin::Max => {
                let pick_max = matches!(signature.builtin, Builtin::Max);
                let values: Vec<Eval<f64>> = operands.map(Compiled::number).collect();
                Compiled::new(StaticKind::Number, move || {
                    let mut result: Option<f64> = None;
                    for value in &values {
                        let value = value()?;
                        result = Some(match result {
                            None => value,
                            Some(current) if pick_max => current.max(value),
                            Some(current) => current.min(value),
                        });
                    }
                    Ok(Value::Number(result.unwrap_or(f64::NAN)))
                })
            }
            Builtin::Num => {
                let arg = required(operands.next())?;
                if arg.kind == StaticKind::Number {
                    arg
                } else {
                    let x = arg.number();
                    Compiled::new(StaticKind::Number, move || Ok(Value::Number(x()?)))
                }
            }
            Builtin::Txt => {
                let arg = required(operands.next())?;
                if arg.kind == StaticKind::Text {
                    arg
                } else {
                    let x = arg.text();
                    Compiled::new(StaticKind::Text, move || Ok(Value::Text(x()?)))
                }
            }
            Builtin::Bool => {
                let arg = required(operands.next())?;
                if arg.kind == StaticKind::Boolean {
                    arg
                } else {
                    let x = arg.boolean();
                    Compiled::new(StaticKind::Boolean, move || Ok(Value::Boolean(x()?)))
                }
            }
            Builtin::Type => {
                let arg = required(operands.next())?;
                match arg.kind.type_name() {
                    Some(name) => Compiled::constant(Value::text(name)),
                    None => {
                        let eval = arg.eval;
                        Compiled::new(StaticKind::Text, move || {
                            Ok(Value::Text(eval()?.type_name()))
                        })
                    }
                }
            }
            Builtin::Version => {
                let arg = required(operands.next())?;
                if arg.kind == StaticKind::Version {
                    arg
                } else {
                    let x = arg.version();
                    Compiled::new(StaticKind::Version, move || Ok(Value::Version(x()?)))
                }
            }
            Builtin::At => {
                let target = required(operands.next())?.eval;
                let index = required(operands.next())?.number();
                Compiled::new(StaticKind::Dynamic, move || {
                    let target = target()?;
                    let index = index()?;
                    element_at(&target, index)
                })
            }
        };
        Ok(result)
    }
}

fn required(arg: Option<Compiled>) -> FormulaResult<Compiled> {
    arg.ok_or_else(|| FormulaError::invalid_operation("missing function argument"))
}

fn compile_unary(op: UnaryOperator, operand: Compiled) -> Compiled {
    match op {
        UnaryOperator::Negate => {
            let x = operand.number();
            Compiled::new(StaticKind::Number, move || Ok(Value::Number(-x()?)))
        }
        UnaryOperator::Plus if operand.kind == StaticKind::Number => operand,
        UnaryOperator::Plus => {
            let x = operand.number();
            Compiled::new(StaticKind::Number, move || Ok(Value::Number(x()?)))
        }
        UnaryOperator::Not => {
            let x = operand.boolean();
            Compiled::new(StaticKind::Boolean, move || Ok(Value::Boolean(!x()?)))
        }
    }
}

fn numeric(left: Compiled, right: Compiled, f: fn(f64, f64) -> f64) -> Compiled {
    let (l, r) = (left.number(), right.number());
    Compiled::new(StaticKind::Number, move || Ok(Value::Number(f(l()?, r()?))))
}

fn comparison(op: BinaryOperator, left: Compiled, right: Compiled) -> Compiled {
    let test: fn(Ordering) -> bool = match op {
        BinaryOperator::LessThan => Ordering::is_lt,
        BinaryOperator::LessThanOrEqual => Ordering::is_le,
        BinaryOperator::GreaterThan => Ordering::is_gt,
        _ => Ordering::is_ge,
    };

    if left.kind == StaticKind::Number || right.kind == StaticKind::Number {
        let (l, r) = (left.number(), right.number());
        return Compiled::new(StaticKind::Boolean, move || {
            let (a, b) = (l()?, r()?);
            Ok(Value::Boolean(a.partial_cmp(&b).is_some_and(test)))
        });
    }

    let (l, r) = (left.eval, right.eval);
    Compiled::new(StaticKind::Boolean, move || {
        let ordering = compare_values(&l()?, &r()?)?;
        Ok(Value::Boolean(ordering.is_some_and(test)))
    })
}

fn member_of(value: &Value, member: &str) -> FormulaResult<Value> {
    value
        .member(member)
        .ok_or_else(|| FormulaError::MemberNotFound {
            member: member.to_string(),
            type_name: value.type_name(),
        })
}

fn element_at(target: &Value, index: f64) -> FormulaResult<Value> {
    let out_of_range = || {
        FormulaError::invalid_operation(format!(
            "index {} out of range for {}",
            TypeCoercion::format_number(index),
            target.type_name()
        ))
    };
    if !(index >= 0.0) || index.fract() != 0.0 {
        return Err(out_of_range());
    }
    let index = index as usize;
    match target {
        Value::Tuple(items) => items.get(index).cloned().ok_or_else(out_of_range),
        Value::Text(text) => text
            .chars()
            .nth(index)
            .map(|c| Value::Text(c.to_string()))
            .ok_or_else(out_of_range),
        _ => Err(out_of_range()),
    }
}

/// Ordering between two values: numeric if either side is a number,
/// by version if either is a version, else ordinal text
pub fn compare_values(left: &Value, right: &Value) -> FormulaResult<Option<Ordering>> {
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            let a = TypeCoercion::to_number(left)?;
            let b = TypeCoercion::to_number(right)?;
            Ok(a.partial_cmp(&b))
        }
        (Value::Version(_), _) | (_, Value::Version(_)) => {
            let a = TypeCoercion::to_version(left)?;
            let b = TypeCoercion::to_version(right)?;
            Ok(Some(a.cmp(&b)))
        }
        _ => Ok(Some(
            TypeCoercion::to_text(left).cmp(&TypeCoercion::to_text(right)),
        )),
    }
}

/// Equality used by `is` and tuple `contains`
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), other) | (other, Value::Number(x)) => {
            TypeCoercion::to_number(other).is_ok_and(|y| *x == y)
        }
        (Value::Version(v), other) | (other, Value::Version(v)) => {
            TypeCoercion::to_version(other).is_ok_and(|w| *v == w)
        }
        (Value::Boolean(x), other) | (other, Value::Boolean(x)) => {
            TypeCoercion::to_boolean(other).is_ok_and(|y| *x == y)
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Record(a), Value::Record(b)) => a == b,
        _ => TypeCoercion::to_text(left) == TypeCoercion::to_text(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Object;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn eval(text: &str) -> FormulaResult<Value> {
        FormulaCompiler::new(Scope::new()).compile(text)?.evaluate()
    }

    fn eval_with(text: &str, bindings: Bindings) -> FormulaResult<Value> {
        let scope = Scope::new().with_provider(Arc::new(bindings));
        FormulaCompiler::new(scope).compile(text)?.evaluate()
    }

    #[rstest]
    #[case("2 + 3 * 4", Value::Number(14.0))]
    #[case("(2 + 3) * 4", Value::Number(20.0))]
    #[case("\"a\" .. \"b\"", Value::from("ab"))]
    #[case("7 % 4", Value::Number(3.0))]
    #[case("2 ^ 3 ^ 2", Value::Number(512.0))]
    #[case("-2 ^ 2", Value::Number(-4.0))]
    #[case("1 < 2 and 2 <= 2", Value::Boolean(true))]
    #[case("3 >= 4 or 4 > 3", Value::Boolean(true))]
    #[case("\"10\" > 9", Value::Boolean(true))]
    #[case("\"b\" > \"a\"", Value::Boolean(true))]
    #[case("\"abc\" contains \"b\"", Value::Boolean(true))]
    #[case("\"abc\" starts \"ab\" and \"abc\" ends \"bc\"", Value::Boolean(true))]
    #[case("\"ab12\" matches \"^[a-z]+[0-9]+$\"", Value::Boolean(true))]
    #[case("\"a-b-c\" replace \"-\" with \"+\"", Value::from("a+b+c"))]
    #[case("\"x1y2\" replace \"([a-z])([0-9])\" with \"$2$1\"", Value::from("1x2y"))]
    #[case("\"1.5.0\" in versions \"[1.0,2.0)\"", Value::Boolean(true))]
    #[case("v(\"2.0\") in versions \"[1.0,2.0)\"", Value::Boolean(false))]
    #[case("v(\"1.10\") > v(\"1.9\")", Value::Boolean(true))]
    #[case("1 is \"1\"", Value::Boolean(true))]
    #[case("not (1 is 2)", Value::Boolean(true))]
    #[case("round(2.5) + round(-2.5)", Value::Number(0.0))]
    #[case("isNaN(NaN) and isInf(-inf)", Value::Boolean(true))]
    #[case("max(1, 5, 3) - min(4, 2)", Value::Number(3.0))]
    #[case("txt(14 / 2)", Value::from("7"))]
    #[case("num(\"2.5\") * 2", Value::Number(5.0))]
    #[case("bool(\"yes\")", Value::Boolean(true))]
    #[case("type(1 .. 2)", Value::from("text"))]
    #[case("type((1, \"a\"))", Value::from("(number, text)"))]
    #[case("v(\"1.4.2\").minor", Value::Number(4.0))]
    #[case("at((10, 20, 30), 1)", Value::Number(20.0))]
    #[case("(1, 2, 3) contains 2", Value::Boolean(true))]
    #[case("\"hello\".length", Value::Number(5.0))]
    fn test_evaluate(#[case] text: &str, #[case] expected: Value) {
        assert_eq!(eval(text).unwrap(), expected);
    }

    #[test]
    fn test_repeat_limit() {
        let ok = eval("\"ab\" repeat 1024").unwrap();
        assert_eq!(ok.as_text().map(str::len), Some(2048));

        let err = eval("\"ab\" repeat 1025").unwrap_err();
        assert_eq!(
            err,
            FormulaError::RepeatLimit {
                length: 2050,
                limit: 2048
            }
        );
        assert!(eval("\"ab\" repeat -1").is_err());
    }

    #[test]
    fn test_custom_repeat_limit() {
        let options = CompileOptions {
            repeat_limit: 4,
            ..CompileOptions::default()
        };
        let compiler = FormulaCompiler::with_options(Scope::new(), options);
        assert!(compiler.compile("\"ab\" repeat 2").unwrap().evaluate().is_ok());
        assert!(compiler.compile("\"ab\" repeat 3").unwrap().evaluate().is_err());
    }

    #[test]
    fn test_unresolved_symbol_fails_at_compile_time() {
        let err = FormulaCompiler::new(Scope::new())
            .compile("1 + missing")
            .unwrap_err();
        assert_eq!(
            err,
            FormulaError::UnresolvedSymbol {
                name: "missing".into(),
                span: Span::new(4, 11)
            }
        );
        assert!(err.is_compile_time());
        assert!(matches!(
            eval("value() + 1"),
            Err(FormulaError::UnresolvedSymbol { .. })
        ));
    }

    #[test]
    fn test_syntax_error_carries_span() {
        let err = eval("1 + * 2").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax(_)));
    }

    #[test]
    fn test_value_call_reads_binding() {
        let bindings = Bindings::new().with("value", 2.0);
        assert_eq!(eval_with("value() + 1", bindings).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_symbol_paths_resolve_members() {
        let record = Object::new("Hull").with("Cost", 12i64).with("Name", "Frigate");
        let bindings = Bindings::new().with_record("item", record);
        assert_eq!(
            eval_with("item.Cost * 2", bindings.clone()).unwrap(),
            Value::Number(24.0)
        );
        assert_eq!(
            eval_with("item.Name .. \"!\"", bindings.clone()).unwrap(),
            Value::from("Frigate!")
        );
        assert!(matches!(
            eval_with("item.Missing", bindings),
            Err(FormulaError::MemberNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        assert!(matches!(
            eval("frobnicate(1)"),
            Err(FormulaError::UnknownFunction { .. })
        ));
        assert!(matches!(
            eval("abs(1, 2)"),
            Err(FormulaError::InvalidArity { .. })
        ));
    }

    #[test]
    fn test_coercion_failure_propagates_from_evaluation() {
        let formula = FormulaCompiler::new(Scope::new())
            .compile("\"abc\" * 2")
            .unwrap();
        assert!(matches!(formula.evaluate(), Err(FormulaError::Coercion(_))));
    }

    #[test]
    fn test_bad_literal_pattern_fails_at_compile_time() {
        let err = FormulaCompiler::new(Scope::new())
            .compile("\"a\" matches \"(\"")
            .unwrap_err();
        assert!(matches!(err, FormulaError::Regex { .. }));
    }

    #[test]
    fn test_static_kinds() {
        let compiler = FormulaCompiler::new(Scope::new());
        assert_eq!(compiler.compile("1 + 2").unwrap().kind(), StaticKind::Number);
        assert_eq!(compiler.compile("num(3)").unwrap().kind(), StaticKind::Number);
        assert_eq!(compiler.compile("1 .. 2").unwrap().kind(), StaticKind::Text);
        assert_eq!(compiler.compile("(1, 2)").unwrap().kind(), StaticKind::Tuple);
    }

    #[test]
    fn test_depth_limit() {
        let options = CompileOptions {
            max_depth: 4,
            ..CompileOptions::default()
        };
        let compiler = FormulaCompiler::with_options(Scope::new(), options);
        assert!(compiler.compile("1 + 1").is_ok());
        assert_eq!(
            compiler.compile("((((((1))))))+(1+(1+(1+(1+1))))").unwrap_err(),
            FormulaError::MaxDepthExceeded(4)
        );
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_hostile_nesting_fails_cleanly(#[case] use_parse_cache: bool) {
        let compiler = FormulaCompiler::with_options(
            Scope::new(),
            CompileOptions {
                use_parse_cache,
                ..CompileOptions::default()
            },
        );
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(
            compiler.compile(&deep).unwrap_err(),
            FormulaError::MaxDepthExceeded(128)
        );
        let negations = "-".repeat(200_000) + "1";
        assert_eq!(
            compiler.compile(&negations).unwrap_err(),
            FormulaError::MaxDepthExceeded(128)
        );
    }

    #[test]
    fn test_parse_cache_is_transparent() {
        let cached = FormulaCompiler::new(Scope::new());
        let uncached = FormulaCompiler::with_options(
            Scope::new(),
            CompileOptions {
                use_parse_cache: false,
                ..CompileOptions::default()
            },
        );
        for text in ["2 + 3 * 4", "\"a\" .. \"b\"", "v(\"1.2\").major"] {
            assert_eq!(
                cached.compile(text).unwrap().evaluate().unwrap(),
                uncached.compile(text).unwrap().evaluate().unwrap()
            );
        }
    }
}
