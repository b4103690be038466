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

//! Definitions loaded from JSON with an inferred schema
//!
//! The top-level object maps type names to either an array of records
//! (a collection) or a single object (a dynamic record). Field types come
//! from the first non-null value seen for each field.

use super::{CollectionError, InMemoryRegistry};
use crate::model::{Data, Object, ScalarKind, Shape, TypeDescriptor};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while loading definitions
#[derive(Error, Debug)]
pub enum LoadError {
    /// Top level is not an object
    #[error("definitions must be a JSON object keyed by type name")]
    NotAnObject,

    /// A type is neither an array nor an object
    #[error("type '{0}' must be an array of records or a single record")]
    InvalidType(String),

    /// Indexed collection has colliding identities
    #[error("type '{type_name}': {source}")]
    Collection {
        /// Type name
        type_name: String,
        /// Rebuild failure
        #[source]
        source: CollectionError,
    },
}

fn infer_value(name: &str, values: &[&JsonValue]) -> Arc<TypeDescriptor> {
    let Some(first) = values.iter().find(|v| !v.is_null()) else {
        return TypeDescriptor::scalar(ScalarKind::Text);
    };
    match first {
        JsonValue::Bool(_) => TypeDescriptor::scalar(ScalarKind::Bool),
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => {
            let all_integral = values
                .iter()
                .filter_map(|v| v.as_number())
                .all(|n| n.is_i64() || n.is_u64());
            TypeDescriptor::scalar(if all_integral {
                ScalarKind::LONG
            } else {
                ScalarKind::DOUBLE
            })
        }
        JsonValue::Number(_) => TypeDescriptor::scalar(ScalarKind::DOUBLE),
        JsonValue::Array(_) => {
            let items: Vec<&JsonValue> = values
                .iter()
                .filter_map(|v| v.as_array())
                .flatten()
                .collect();
            TypeDescriptor::list(infer_value(name, &items))
        }
        JsonValue::Object(_) => {
            let objects: Vec<&Map<String, JsonValue>> =
                values.iter().filter_map(|v| v.as_object()).collect();
            infer_record(name, &objects)
        }
        JsonValue::String(_) | JsonValue::Null => TypeDescriptor::scalar(ScalarKind::Text),
    }
}

fn infer_record(type_name: &str, records: &[&Map<String, JsonValue>]) -> Arc<TypeDescriptor> {
    let mut fields: IndexMap<&str, Vec<&JsonValue>> = IndexMap::new();
    for record in records {
        for (key, value) in record.iter() {
            fields.entry(key.as_str()).or_default().push(value);
        }
    }
    fields
        .into_iter()
        .fold(TypeDescriptor::record(type_name), |builder, (key, values)| {
            builder.field(key, infer_value(&format!("{type_name}{key}"), &values))
        })
        .build()
}

/// Infer a record descriptor from sample records
pub fn infer_descriptor(type_name: &str, records: &[JsonValue]) -> Arc<TypeDescriptor> {
    let objects: Vec<&Map<String, JsonValue>> =
        records.iter().filter_map(JsonValue::as_object).collect();
    infer_record(type_name, &objects)
}

/// Convert JSON to stored data of type `ty`
pub fn data_from_json(ty: &TypeDescriptor, value: &JsonValue) -> Data {
    match (ty.shape(), value) {
        (_, JsonValue::Null) => Data::Null,
        (Shape::Scalar(ScalarKind::Bool), JsonValue::Bool(b)) => Data::Bool(*b),
        (Shape::Scalar(ScalarKind::Integer { .. }), JsonValue::Number(n)) => {
            n.as_i64().map_or_else(|| Data::Float(n.as_f64().unwrap_or_default()), Data::Int)
        }
        (Shape::Scalar(ScalarKind::Float { .. }), JsonValue::Number(n)) => {
            Data::Float(n.as_f64().unwrap_or_default())
        }
        (Shape::Enum(_), JsonValue::String(s)) => Data::Enum(s.clone()),
        (Shape::List { element, .. }, JsonValue::Array(items)) => {
            Data::List(items.iter().map(|item| data_from_json(element, item)).collect())
        }
        (Shape::Nested { .. }, JsonValue::Object(map)) => Data::Object(object_from_json(ty, map)),
        (_, JsonValue::String(s)) => Data::Text(s.clone()),
        (_, other) => Data::Text(other.to_string()),
    }
}

fn object_from_json(ty: &TypeDescriptor, map: &Map<String, JsonValue>) -> Object {
    let mut object = ty.new_instance();
    for (key, value) in map {
        if let Some(field) = ty.field(key) {
            object.set(field.name.clone(), data_from_json(&field.ty, value));
        }
    }
    object
}

/// Load every type of `definitions`; array types named in `indexed` get
/// identity slots, the others list semantics
pub fn load_registry(
    definitions: &JsonValue,
    indexed: &[String],
) -> Result<InMemoryRegistry, LoadError> {
    let types = definitions.as_object().ok_or(LoadError::NotAnObject)?;
    let mut registry = InMemoryRegistry::new();
    for (type_name, body) in types {
        match body {
            JsonValue::Array(records) => {
                let descriptor = infer_descriptor(type_name, records);
                let objects = records
                    .iter()
                    .filter_map(JsonValue::as_object)
                    .map(|map| object_from_json(&descriptor, map))
                    .collect();
                if indexed.iter().any(|name| name.eq_ignore_ascii_case(type_name)) {
                    registry
                        .register_indexed(descriptor, objects)
                        .map_err(|source| LoadError::Collection {
                            type_name: type_name.clone(),
                            source,
                        })?;
                } else {
                    registry.register_ordered(descriptor, objects);
                }
            }
            JsonValue::Object(map) => {
                let descriptor = infer_record(type_name, &[map]);
                let record = object_from_json(&descriptor, map);
                registry.register_dynamic(descriptor, record);
            }
            _ => return Err(LoadError::InvalidType(type_name.clone())),
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_descriptor() {
        let records = vec![
            json!({"ResourceId": 1, "Name": "Ore", "Weight": 2, "Tags": ["a"]}),
            json!({"ResourceId": 2, "Name": null, "Weight": 2.5, "Tags": []}),
        ];
        let descriptor = infer_descriptor("Resource", &records);
        assert_eq!(descriptor.identity(), Some("ResourceId"));
        let weight = descriptor.field("Weight").unwrap();
        assert!(matches!(weight.ty.shape(), Shape::Scalar(ScalarKind::Float { bits: 64 })));
        let tags = descriptor.field("Tags").unwrap();
        assert_eq!(tags.ty.name(), "List<string>");
    }

    #[test]
    fn test_load_registry() {
        let definitions = json!({
            "Resource": [{"ResourceId": 0, "Name": "Ore"}, {"ResourceId": 1, "Name": "Gas"}],
            "Settings": {"Speed": 1.5}
        });
        let registry = load_registry(&definitions, &["resource".to_string()]).unwrap();
        let collection = registry.collection("Resource").unwrap();
        assert!(collection.is_indexed());
        assert_eq!(collection.get_index(&Data::Int(1)), Some(1));
        assert_eq!(
            registry.dynamic("Settings").unwrap().get("Speed"),
            Some(&Data::Float(1.5))
        );
        assert!(matches!(
            load_registry(&json!([1]), &[]),
            Err(LoadError::NotAnObject)
        ));
    }
}
