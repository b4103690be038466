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

//! Core value type for formula evaluation

use super::data::{Data, Object};
use super::type_coercion::TypeCoercion;
use super::version::Version;
use std::fmt;
use std::sync::Arc;

/// Dynamically typed formula value
///
/// Tuples and records are reference counted so that binding a record as
/// `item` or a collection as `collection` does not copy it per lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Missing value
    #[default]
    Null,
    /// Boolean value
    Boolean(bool),
    /// Double precision number
    Number(f64),
    /// Text value
    Text(String),
    /// Semantic version
    Version(Version),
    /// Ordered tuple of values
    Tuple(Arc<Vec<Value>>),
    /// Definition record
    Record(Arc<Object>),
}

/// Category of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Null
    Null,
    /// Boolean
    Boolean,
    /// Number
    Number,
    /// Text
    Text,
    /// Version
    Version,
    /// Tuple
    Tuple,
    /// Record
    Record,
}

impl Value {
    /// Create a text value
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Create a tuple value
    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(values))
    }

    /// Value category
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Text(_) => ValueKind::Text,
            Value::Version(_) => ValueKind::Version,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Record(_) => ValueKind::Record,
        }
    }

    /// Friendly category name as reported by `type()`
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(_) => "boolean".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::Text(_) => "text".to_string(),
            Value::Version(_) => "Version".to_string(),
            Value::Tuple(items) => {
                let names: Vec<String> = items.iter().map(Value::type_name).collect();
                format!("({})", names.join(", "))
            }
            Value::Record(object) => object.type_name().to_string(),
        }
    }

    /// Try to get a number without coercion
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get text without coercion
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a boolean without coercion
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Member access: record fields, tuple and text length, version parts
    pub fn member(&self, name: &str) -> Option<Value> {
        match self {
            Value::Record(object) => object.get_ignore_case(name).map(Value::from_data),
            Value::Tuple(items) => match name.to_ascii_lowercase().as_str() {
                "count" | "length" => Some(Value::Number(items.len() as f64)),
                _ => None,
            },
            Value::Text(text) if name.eq_ignore_ascii_case("length") => {
                Some(Value::Number(text.chars().count() as f64))
            }
            Value::Version(version) => match name.to_ascii_lowercase().as_str() {
                "major" => Some(Value::Number(version.major() as f64)),
                "minor" => Some(Value::Number(version.minor() as f64)),
                "patch" => Some(Value::Number(version.patch() as f64)),
                _ => None,
            },
            _ => None,
        }
    }

    /// View stored record data as a formula value
    pub fn from_data(data: &Data) -> Value {
        match data {
            Data::Null => Value::Null,
            Data::Bool(b) => Value::Boolean(*b),
            Data::Int(i) => Value::Number(*i as f64),
            Data::Float(f) => Value::Number(*f),
            Data::Text(s) | Data::Enum(s) => Value::Text(s.clone()),
            Data::Object(object) => Value::Record(Arc::new(object.clone())),
            Data::List(items) => Value::tuple(items.iter().map(Value::from_data).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&TypeCoercion::to_text(self))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Version> for Value {
    fn from(value: Version) -> Self {
        Value::Version(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::from("a").type_name(), "text");
        assert_eq!(
            Value::tuple(vec![Value::from(1.0), Value::tuple(vec![Value::from(true)])]).type_name(),
            "(number, (boolean))"
        );
        let record = Value::Record(Arc::new(Object::new("ShipHull")));
        assert_eq!(record.type_name(), "ShipHull");
    }

    #[test]
    fn test_member_access() {
        let record = Value::Record(Arc::new(Object::new("Hull").with("Cost", 12i64)));
        assert_eq!(record.member("cost"), Some(Value::Number(12.0)));
        assert_eq!(record.member("Missing"), None);
        assert_eq!(Value::from("abc").member("length"), Some(Value::Number(3.0)));
        assert_eq!(
            Value::tuple(vec![Value::Null, Value::Null]).member("Count"),
            Some(Value::Number(2.0))
        );
        let version = Value::Version(Version::new(1, 4, 2));
        assert_eq!(version.member("minor"), Some(Value::Number(4.0)));
    }

    #[test]
    fn test_lists_become_tuples() {
        let data = Data::List(vec![Data::Int(1), Data::from("x")]);
        assert_eq!(
            Value::from_data(&data),
            Value::tuple(vec![Value::Number(1.0), Value::from("x")])
        );
    }
}
