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

//! Builtin function table
//!
//! Math functions work on coerced doubles. Coercion and version functions
//! are compiled specially so they can use the static kind of their
//! argument.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// How a builtin is compiled
#[derive(Debug, Clone, Copy)]
pub enum Builtin {
    /// `f(x)` over a double
    Unary(fn(f64) -> f64),
    /// `f(x, y)` over doubles
    Binary(fn(f64, f64) -> f64),
    /// Predicate over a double
    Test(fn(f64) -> bool),
    /// `round(x)` or `round(x, digits)`, half away from zero
    Round,
    /// `log(x)` or `log(x, base)`
    Log,
    /// `num(x)`
    Num,
    /// `txt(x)`
    Txt,
    /// `bool(x)`
    Bool,
    /// `type(x)`
    Type,
    /// `v(text)`
    Version,
    /// `at(tuple, index)`
    At,
    /// `min(a, b, ...)`
    Min,
    /// `max(a, b, ...)`
    Max,
}

/// Name, arity and implementation of a builtin
#[derive(Debug, Clone, Copy)]
pub struct FunctionSignature {
    /// Canonical spelling
    pub name: &'static str,
    /// Minimum number of arguments
    pub min_arity: usize,
    /// Maximum number of arguments (None for variadic)
    pub max_arity: Option<usize>,
    /// Implementation
    pub builtin: Builtin,
}

impl FunctionSignature {
    const fn new(
        name: &'static str,
        min_arity: usize,
        max_arity: Option<usize>,
        builtin: Builtin,
    ) -> Self {
        Self {
            name,
            min_arity,
            max_arity,
            builtin,
        }
    }

    /// Check an argument count
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_arity && self.max_arity.map_or(true, |max| count <= max)
    }

    /// Human-readable arity for error messages
    pub fn arity_text(&self) -> String {
        match self.max_arity {
            Some(max) if max == self.min_arity => max.to_string(),
            Some(max) => format!("{} to {}", self.min_arity, max),
            None => format!("at least {}", self.min_arity),
        }
    }
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> FunctionSignature {
    FunctionSignature::new(name, 1, Some(1), Builtin::Unary(f))
}

fn binary(name: &'static str, f: fn(f64, f64) -> f64) -> FunctionSignature {
    FunctionSignature::new(name, 2, Some(2), Builtin::Binary(f))
}

fn test(name: &'static str, f: fn(f64) -> bool) -> FunctionSignature {
    FunctionSignature::new(name, 1, Some(1), Builtin::Test(f))
}

/// Round half away from zero to `digits` decimals
pub fn round_away_from_zero(x: f64, digits: f64) -> f64 {
    if digits <= 0.0 {
        return x.round();
    }
    let factor = 10f64.powi(digits.min(15.0) as i32);
    (x * factor).round() / factor
}

/// Keyed by canonical name plus lowercase aliases
static FUNCTION_TABLE: Lazy<FxHashMap<&'static str, FunctionSignature>> = Lazy::new(|| {
    let signatures = [
        unary("abs", f64::abs),
        unary("sin", f64::sin),
        unary("cos", f64::cos),
        unary("tan", f64::tan),
        unary("asin", f64::asin),
        unary("acos", f64::acos),
        unary("atan", f64::atan),
        binary("atan2", f64::atan2),
        binary("pow", f64::powf),
        unary("sqrt", f64::sqrt),
        unary("exp", f64::exp),
        unary("floor", f64::floor),
        unary("ceiling", f64::ceil),
        unary("trunc", f64::trunc),
        test("isInf", f64::is_infinite),
        test("isNaN", f64::is_nan),
        FunctionSignature::new("round", 1, Some(2), Builtin::Round),
        FunctionSignature::new("log", 1, Some(2), Builtin::Log),
        FunctionSignature::new("min", 1, None, Builtin::Min),
        FunctionSignature::new("max", 1, None, Builtin::Max),
        FunctionSignature::new("num", 1, Some(1), Builtin::Num),
        FunctionSignature::new("txt", 1, Some(1), Builtin::Txt),
        FunctionSignature::new("bool", 1, Some(1), Builtin::Bool),
        FunctionSignature::new("type", 1, Some(1), Builtin::Type),
        FunctionSignature::new("v", 1, Some(1), Builtin::Version),
        FunctionSignature::new("at", 2, Some(2), Builtin::At),
    ];

    let mut table = FxHashMap::default();
    for signature in signatures {
        table.insert(signature.name, signature);
    }
    // Lowercase aliases for camel-cased names
    table.insert("isinf", test("isInf", f64::is_infinite));
    table.insert("isnan", test("isNaN", f64::is_nan));
    table
});

/// Find a builtin by name, ignoring case
pub fn lookup_function(name: &str) -> Option<&'static FunctionSignature> {
    FUNCTION_TABLE
        .get(name)
        .or_else(|| FUNCTION_TABLE.get(name.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(lookup_function("ABS").map(|f| f.name), Some("abs"));
        assert_eq!(lookup_function("isnan").map(|f| f.name), Some("isNaN"));
        assert_eq!(lookup_function("IsInf").map(|f| f.name), Some("isInf"));
        assert!(lookup_function("value").is_none());
    }

    #[test]
    fn test_arity() {
        let round = lookup_function("round").unwrap();
        assert!(round.accepts(1));
        assert!(round.accepts(2));
        assert!(!round.accepts(3));
        assert_eq!(round.arity_text(), "1 to 2");
        assert_eq!(lookup_function("max").unwrap().arity_text(), "at least 1");
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_away_from_zero(2.5, 0.0), 3.0);
        assert_eq!(round_away_from_zero(-2.5, 0.0), -3.0);
        assert_eq!(round_away_from_zero(1.25, 1.0), 1.3);
    }
}
