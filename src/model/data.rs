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

//! Definition record storage
//!
//! Records are introspectable field maps tagged with their type name. The
//! shape of each field is described separately by a
//! [`TypeDescriptor`](super::types::TypeDescriptor).

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// A stored field value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    /// Unset reference
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer width
    Int(i64),
    /// Any float width
    Float(f64),
    /// Text
    Text(String),
    /// Enum variant by canonical name
    Enum(String),
    /// Nested record
    Object(Object),
    /// List or fixed array
    List(Vec<Data>),
}

impl Data {
    /// Check for an unset reference
    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// Borrow as a record
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Data::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Mutably borrow as a record
    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Data::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Borrow as a list
    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric view used for identities
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Int(i) => Some(*i as f64),
            Data::Float(f) => Some(*f),
            Data::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer view used for slot lookups
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Int(i) => Some(*i),
            Data::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Data::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "boolean",
            Data::Int(_) => "integer",
            Data::Float(_) => "float",
            Data::Text(_) => "text",
            Data::Enum(_) => "enum",
            Data::Object(_) => "object",
            Data::List(_) => "list",
        }
    }

    /// Identity equality: numbers compare numerically, text exactly
    pub fn same_identity(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Text(a), Data::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Null => f.write_str("null"),
            Data::Bool(b) => write!(f, "{b}"),
            Data::Int(i) => write!(f, "{i}"),
            Data::Float(x) => write!(f, "{x}"),
            Data::Text(s) | Data::Enum(s) => f.write_str(s),
            Data::Object(object) => write!(f, "{}", object.type_name()),
            Data::List(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Int(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Float(value)
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Bool(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Text(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Text(value)
    }
}

impl From<Object> for Data {
    fn from(value: Object) -> Self {
        Data::Object(value)
    }
}

impl From<Vec<Data>> for Data {
    fn from(value: Vec<Data>) -> Self {
        Data::List(value)
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Null => serializer.serialize_none(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Int(i) => serializer.serialize_i64(*i),
            Data::Float(x) => serializer.serialize_f64(*x),
            Data::Text(s) | Data::Enum(s) => serializer.serialize_str(s),
            Data::Object(object) => object.serialize(serializer),
            Data::List(items) => serializer.collect_seq(items),
        }
    }
}

/// A definition record: named fields in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    type_name: String,
    fields: IndexMap<String, Data>,
}

impl Object {
    /// Create an empty record of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Data>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Concrete type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Read a field by exact name
    pub fn get(&self, name: &str) -> Option<&Data> {
        self.fields.get(name)
    }

    /// Read a field, falling back to a case-insensitive match
    pub fn get_ignore_case(&self, name: &str) -> Option<&Data> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// Mutable field access
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Data> {
        self.fields.get_mut(name)
    }

    /// Set a field, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: Data) -> Option<Data> {
        self.fields.insert(name.into(), value)
    }

    /// Field iterator in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Data)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check for a record without fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_field_lookup() {
        let object = Object::new("Resource").with("ResourceId", 3i64).with("Name", "Ore");
        assert_eq!(object.get("name"), None);
        assert_eq!(object.get_ignore_case("name"), Some(&Data::from("Ore")));
        assert_eq!(object.get_ignore_case("ResourceId"), Some(&Data::Int(3)));
    }

    #[test]
    fn test_identity_equality_is_numeric() {
        assert!(Data::Int(10).same_identity(&Data::Float(10.0)));
        assert!(Data::Int(10).same_identity(&Data::from("10")));
        assert!(!Data::from("a").same_identity(&Data::from("A")));
    }

    #[test]
    fn test_serializes_fields_in_order() {
        let object = Object::new("Hull")
            .with("HullId", 1i64)
            .with("Slots", vec![Data::Int(1), Data::Null]);
        let json = serde_json::to_string(&Data::Object(object)).unwrap();
        assert_eq!(json, r#"{"HullId":1,"Slots":[1,null]}"#);
    }
}
