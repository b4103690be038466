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

//! Type coercion and conversion utilities for formula values

use super::data::Data;
use super::types::ScalarKind;
use super::value::Value;
use super::version::Version;
use thiserror::Error;

/// Result type for type coercion operations
pub type CoercionResult<T> = Result<T, CoercionError>;

/// Errors that can occur during type coercion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    /// Cannot coerce between the specified types
    #[error("Cannot coerce from {from} to {to}")]
    IncompatibleTypes {
        /// Source category
        from: String,
        /// Target category
        to: String,
    },
    /// The value format is invalid for the target type
    #[error("Invalid format '{value}' for type {target_type}")]
    InvalidFormat {
        /// Offending text
        value: String,
        /// Target type name
        target_type: String,
    },
    /// Number does not fit the declared width
    #[error("Value {value} is out of range for {target_type}")]
    OutOfRange {
        /// Offending number
        value: f64,
        /// Target type name
        target_type: String,
    },
}

/// Type coercion utility for formula values
pub struct TypeCoercion;

impl TypeCoercion {
    /// Coerce value to a number. Null is zero, booleans are one or zero.
    pub fn to_number(value: &Value) -> CoercionResult<f64> {
        match value {
            Value::Number(n) => Ok(*n),
            Value::Null => Ok(0.0),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => Self::parse_number(s).ok_or_else(|| CoercionError::InvalidFormat {
                value: s.clone(),
                target_type: "number".to_string(),
            }),
            other => Err(CoercionError::IncompatibleTypes {
                from: other.type_name(),
                to: "number".to_string(),
            }),
        }
    }

    /// Coerce value to boolean
    pub fn to_boolean(value: &Value) -> CoercionResult<bool> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0 && !n.is_nan()),
            Value::Null => Ok(false),
            Value::Text(s) => {
                let lower = s.trim().to_lowercase();
                match lower.as_str() {
                    "true" | "t" | "yes" | "y" | "1" | "1.0" => Ok(true),
                    "false" | "f" | "no" | "n" | "0" | "0.0" | "" => Ok(false),
                    _ => Err(CoercionError::InvalidFormat {
                        value: s.clone(),
                        target_type: "boolean".to_string(),
                    }),
                }
            }
            other => Err(CoercionError::IncompatibleTypes {
                from: other.type_name(),
                to: "boolean".to_string(),
            }),
        }
    }

    /// Coerce value to text. Every value has a text form.
    pub fn to_text(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => Self::format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Version(v) => v.to_string(),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Self::to_text).collect();
                format!("({})", parts.join(", "))
            }
            Value::Record(object) => object.type_name().to_string(),
        }
    }

    /// Coerce value to a semantic version
    pub fn to_version(value: &Value) -> CoercionResult<Version> {
        match value {
            Value::Version(v) => Ok(v.clone()),
            Value::Text(s) => Version::parse(s).map_err(|_| CoercionError::InvalidFormat {
                value: s.clone(),
                target_type: "Version".to_string(),
            }),
            Value::Number(n) => {
                let text = Self::format_number(*n);
                Version::parse(&text).map_err(|_| CoercionError::InvalidFormat {
                    value: text,
                    target_type: "Version".to_string(),
                })
            }
            other => Err(CoercionError::IncompatibleTypes {
                from: other.type_name(),
                to: "Version".to_string(),
            }),
        }
    }

    /// Invariant-culture number formatting: integral values print without
    /// a fraction
    pub fn format_number(n: f64) -> String {
        if n.is_nan() {
            "NaN".to_string()
        } else if n.is_infinite() {
            if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        } else if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            format!("{n}")
        }
    }

    /// Invariant-culture number parsing
    pub fn parse_number(text: &str) -> Option<f64> {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "infinity" | "+infinity" | "+inf" | "inf" => Some(f64::INFINITY),
            "-infinity" | "-inf" => Some(f64::NEG_INFINITY),
            "nan" => Some(f64::NAN),
            _ => trimmed.parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Convert a formula value to storage for a declared scalar field
    pub fn to_scalar(value: &Value, kind: ScalarKind) -> CoercionResult<Data> {
        match kind {
            ScalarKind::Bool => Self::to_boolean(value).map(Data::Bool),
            ScalarKind::Integer { bits, signed } => {
                let n = Self::to_number(value)?;
                Self::to_integer(n, bits, signed, kind).map(Data::Int)
            }
            ScalarKind::Float { bits } => {
                let n = Self::to_number(value)?;
                Ok(Data::Float(if bits == 32 { n as f32 as f64 } else { n }))
            }
            ScalarKind::Text => Ok(match value {
                Value::Null => Data::Null,
                other => Data::Text(Self::to_text(other)),
            }),
            ScalarKind::Char | ScalarKind::Decimal | ScalarKind::DateTime => {
                Err(CoercionError::IncompatibleTypes {
                    from: value.type_name(),
                    to: kind.name().to_string(),
                })
            }
        }
    }

    /// Parse a literal scalar without evaluating it as a formula
    pub fn parse_scalar(text: &str, kind: ScalarKind) -> CoercionResult<Data> {
        match kind {
            ScalarKind::Text => Ok(Data::Text(text.to_string())),
            _ => Self::to_scalar(&Value::Text(text.to_string()), kind),
        }
    }

    fn to_integer(n: f64, bits: u8, signed: bool, kind: ScalarKind) -> CoercionResult<i64> {
        let out_of_range = || CoercionError::OutOfRange {
            value: n,
            target_type: kind.name().to_string(),
        };
        if !n.is_finite() {
            return Err(out_of_range());
        }
        // Round half away from zero
        let rounded = n.round();
        let (min, max) = match (bits, signed) {
            (64, true) => (i64::MIN as f64, i64::MAX as f64),
            (64, false) => (0.0, i64::MAX as f64),
            (bits, true) => {
                let half = (1u64 << (bits - 1)) as f64;
                (-half, half - 1.0)
            }
            (bits, false) => (0.0, ((1u64 << bits) - 1) as f64),
        };
        if rounded < min || rounded > max {
            return Err(out_of_range());
        }
        Ok(rounded as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Null, 0.0)]
    #[case(Value::Boolean(true), 1.0)]
    #[case(Value::from(" 2.5 "), 2.5)]
    #[case(Value::from("1e3"), 1000.0)]
    fn test_to_number(#[case] value: Value, #[case] expected: f64) {
        assert_eq!(TypeCoercion::to_number(&value).unwrap(), expected);
    }

    #[test]
    fn test_to_number_rejects_garbage() {
        assert!(TypeCoercion::to_number(&Value::from("abc")).is_err());
        assert!(TypeCoercion::to_number(&Value::tuple(vec![])).is_err());
    }

    #[rstest]
    #[case("yes", true)]
    #[case("T", true)]
    #[case("0", false)]
    #[case("No", false)]
    fn test_to_boolean(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(TypeCoercion::to_boolean(&Value::from(text)).unwrap(), expected);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(TypeCoercion::format_number(14.0), "14");
        assert_eq!(TypeCoercion::format_number(-0.5), "-0.5");
        assert_eq!(TypeCoercion::format_number(f64::INFINITY), "Infinity");
        assert_eq!(TypeCoercion::format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_scalar_conversion() {
        assert_eq!(
            TypeCoercion::to_scalar(&Value::Number(2.5), ScalarKind::INT).unwrap(),
            Data::Int(3)
        );
        assert_eq!(
            TypeCoercion::to_scalar(&Value::Number(-2.5), ScalarKind::INT).unwrap(),
            Data::Int(-3)
        );
        assert!(matches!(
            TypeCoercion::to_scalar(
                &Value::Number(300.0),
                ScalarKind::Integer {
                    bits: 8,
                    signed: false
                }
            ),
            Err(CoercionError::OutOfRange { .. })
        ));
        assert!(TypeCoercion::to_scalar(&Value::Number(1.0), ScalarKind::Decimal).is_err());
        assert_eq!(
            TypeCoercion::parse_scalar("true", ScalarKind::Bool).unwrap(),
            Data::Bool(true)
        );
    }
}
