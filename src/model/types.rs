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

//! Type descriptors for definition records
//!
//! Every record type is described once by a [`TypeDescriptor`] whose
//! [`Shape`] tells the object patcher how to treat each field. Descriptors
//! are registered in a process-wide cache keyed by type name.

use super::data::{Data, Object};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Suffix that marks the conventional identity field
pub const IDENTITY_SUFFIX: &str = "Id";

/// Primitive field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Boolean
    Bool,
    /// Integer of the given width
    Integer {
        /// Width in bits (8, 16, 32 or 64)
        bits: u8,
        /// Signedness
        signed: bool,
    },
    /// Float of the given width (32 or 64)
    Float {
        /// Width in bits
        bits: u8,
    },
    /// Text
    Text,
    /// Single character, not patchable
    Char,
    /// Fixed-point decimal, not patchable
    Decimal,
    /// Timestamp, not patchable
    DateTime,
}

impl ScalarKind {
    /// Signed 32-bit integer
    pub const INT: ScalarKind = ScalarKind::Integer {
        bits: 32,
        signed: true,
    };
    /// Signed 64-bit integer
    pub const LONG: ScalarKind = ScalarKind::Integer {
        bits: 64,
        signed: true,
    };
    /// 32-bit float
    pub const FLOAT: ScalarKind = ScalarKind::Float { bits: 32 };
    /// 64-bit float
    pub const DOUBLE: ScalarKind = ScalarKind::Float { bits: 64 };

    /// Numeric-like kinds accepted by the object patcher
    pub fn is_numeric_like(self) -> bool {
        matches!(
            self,
            ScalarKind::Bool | ScalarKind::Integer { .. } | ScalarKind::Float { .. }
        )
    }

    /// Zero value for the kind
    pub fn default_data(self) -> Data {
        match self {
            ScalarKind::Bool => Data::Bool(false),
            ScalarKind::Integer { .. } => Data::Int(0),
            ScalarKind::Float { .. } => Data::Float(0.0),
            ScalarKind::Text | ScalarKind::Char | ScalarKind::Decimal | ScalarKind::DateTime => {
                Data::Null
            }
        }
    }

    /// Conventional name
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Integer {
                bits: 8,
                signed: false,
            } => "byte",
            ScalarKind::Integer {
                bits: 8,
                signed: true,
            } => "sbyte",
            ScalarKind::Integer {
                bits: 16,
                signed: true,
            } => "short",
            ScalarKind::Integer {
                bits: 16,
                signed: false,
            } => "ushort",
            ScalarKind::Integer {
                bits: 32,
                signed: false,
            } => "uint",
            ScalarKind::Integer {
                bits: 64,
                signed: false,
            } => "ulong",
            ScalarKind::Integer {
                bits: 64,
                signed: true,
            } => "long",
            ScalarKind::Integer { .. } => "int",
            ScalarKind::Float { bits: 32 } => "float",
            ScalarKind::Float { .. } => "double",
            ScalarKind::Text => "string",
            ScalarKind::Char => "char",
            ScalarKind::Decimal => "decimal",
            ScalarKind::DateTime => "DateTime",
        }
    }
}

/// Field descriptor within a nested shape
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: Arc<TypeDescriptor>,
}

/// Closed set of value shapes the patcher understands
#[derive(Debug, Clone)]
pub enum Shape {
    /// Primitive field
    Scalar(ScalarKind),
    /// Enumeration with its variant names
    Enum(Vec<String>),
    /// Record with named fields
    Nested {
        /// Fields in declaration order
        fields: IndexMap<String, FieldDescriptor>,
        /// Identity field, explicit or by convention
        identity: Option<String>,
        /// Value type: never null, zeroed on delete
        by_value: bool,
    },
    /// Homogeneous list or fixed array
    List {
        /// Element type
        element: Arc<TypeDescriptor>,
        /// True arrays may grow past `len + 1` by reallocation
        fixed: bool,
    },
}

/// Descriptor for one record, scalar, enum or list type
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    shape: Shape,
}

impl TypeDescriptor {
    /// Scalar descriptor
    pub fn scalar(kind: ScalarKind) -> Arc<Self> {
        Arc::new(Self {
            name: kind.name().to_string(),
            shape: Shape::Scalar(kind),
        })
    }

    /// Enum descriptor
    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            name: name.into(),
            shape: Shape::Enum(variants.into_iter().map(Into::into).collect()),
        })
    }

    /// Growable list descriptor
    pub fn list(element: Arc<TypeDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("List<{}>", element.name),
            shape: Shape::List {
                element,
                fixed: false,
            },
        })
    }

    /// Fixed array descriptor
    pub fn array(element: Arc<TypeDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("{}[]", element.name),
            shape: Shape::List {
                element,
                fixed: true,
            },
        })
    }

    /// Start describing a record type
    pub fn record(name: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            name: name.into(),
            fields: IndexMap::new(),
            identity: None,
            by_value: false,
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value shape
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Identity field of a record type
    pub fn identity(&self) -> Option<&str> {
        match &self.shape {
            Shape::Nested { identity, .. } => identity.as_deref(),
            _ => None,
        }
    }

    /// Field descriptor of a record type
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        match &self.shape {
            Shape::Nested { fields, .. } => fields.get(name).or_else(|| {
                fields
                    .values()
                    .find(|field| field.name.eq_ignore_ascii_case(name))
            }),
            _ => None,
        }
    }

    /// Check for a value-type record
    pub fn is_by_value(&self) -> bool {
        matches!(self.shape, Shape::Nested { by_value: true, .. })
    }

    /// Default stored value for a field of this type
    ///
    /// Value-type records are constructed, reference records stay null.
    pub fn default_data(&self) -> Data {
        match &self.shape {
            Shape::Scalar(kind) => kind.default_data(),
            Shape::Enum(variants) => variants.first().cloned().map_or(Data::Null, Data::Enum),
            Shape::Nested { by_value: true, .. } => Data::Object(self.new_instance()),
            Shape::Nested { .. } | Shape::List { .. } => Data::Null,
        }
    }

    /// Construct a record with every field at its default
    pub fn new_instance(&self) -> Object {
        let mut object = Object::new(self.name.clone());
        if let Shape::Nested { fields, .. } = &self.shape {
            for field in fields.values() {
                object.set(field.name.clone(), field.ty.default_data());
            }
        }
        object
    }

    /// Construct a record whose list and reference fields are empty
    /// instances instead of null
    pub fn new_populated_instance(&self) -> Object {
        let mut object = Object::new(self.name.clone());
        if let Shape::Nested { fields, .. } = &self.shape {
            for field in fields.values() {
                object.set(field.name.clone(), field.ty.empty_data());
            }
        }
        object
    }

    /// Like [`default_data`](Self::default_data) but lists start empty and
    /// reference records are constructed
    pub fn empty_data(&self) -> Data {
        match &self.shape {
            Shape::List { .. } => Data::List(Vec::new()),
            Shape::Nested { .. } => Data::Object(self.new_instance()),
            _ => self.default_data(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for record descriptors
#[derive(Debug)]
pub struct RecordBuilder {
    name: String,
    fields: IndexMap<String, FieldDescriptor>,
    identity: Option<String>,
    by_value: bool,
}

impl RecordBuilder {
    /// Add a field
    pub fn field(mut self, name: impl Into<String>, ty: Arc<TypeDescriptor>) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldDescriptor { name, ty },
        );
        self
    }

    /// Add a scalar field
    pub fn scalar(self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.field(name, TypeDescriptor::scalar(kind))
    }

    /// Name the identity field explicitly
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity = Some(name.into());
        self
    }

    /// Mark as a value type
    pub fn by_value(mut self) -> Self {
        self.by_value = true;
        self
    }

    /// Finish the descriptor, resolving the identity convention
    pub fn build(self) -> Arc<TypeDescriptor> {
        let identity = self.identity.or_else(|| {
            self.fields
                .keys()
                .find(|name| name.ends_with(IDENTITY_SUFFIX))
                .cloned()
        });
        Arc::new(TypeDescriptor {
            name: self.name,
            shape: Shape::Nested {
                fields: self.fields,
                identity,
                by_value: self.by_value,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hull() -> Arc<TypeDescriptor> {
        let slot = TypeDescriptor::record("Slot")
            .scalar("Size", ScalarKind::INT)
            .by_value()
            .build();
        TypeDescriptor::record("ShipHull")
            .scalar("Name", ScalarKind::Text)
            .scalar("ShipHullId", ScalarKind::INT)
            .scalar("Cost", ScalarKind::DOUBLE)
            .field("Slots", TypeDescriptor::list(slot.clone()))
            .field("Core", slot)
            .build()
    }

    #[test]
    fn test_identity_by_convention() {
        assert_eq!(hull().identity(), Some("ShipHullId"));
        let explicit = TypeDescriptor::record("Tech")
            .scalar("Key", ScalarKind::Text)
            .scalar("OwnerId", ScalarKind::INT)
            .identity("Key")
            .build();
        assert_eq!(explicit.identity(), Some("Key"));
        let none = TypeDescriptor::record("Bare").scalar("Name", ScalarKind::Text).build();
        assert_eq!(none.identity(), None);
    }

    #[test]
    fn test_instances() {
        let hull = hull();
        let plain = hull.new_instance();
        assert_eq!(plain.get("Slots"), Some(&Data::Null));
        assert_eq!(plain.get("Cost"), Some(&Data::Float(0.0)));
        assert!(plain.get("Core").and_then(Data::as_object).is_some());

        let populated = hull.new_populated_instance();
        assert_eq!(populated.get("Slots"), Some(&Data::List(Vec::new())));
    }

    #[test]
    fn test_field_lookup_ignores_case() {
        assert_eq!(hull().field("cost").map(|f| f.name.as_str()), Some("Cost"));
    }
}
