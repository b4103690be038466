//! Definition registry
//!
//! Hosts own their definition collections and lend them to the patch engine
//! one type at a time through [`DefinitionRegistry`].

#![warn(missing_docs)]

pub mod collection;
pub mod json;

pub use collection::{
    Collection, CollectionError, CollectionKind, IdentityKey, IndexedCollection,
    OrderedCollection, RebuildGuard,
};
pub use json::{LoadError, load_registry};

use crate::model::{Object, TypeDescriptor};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Mutable target of one patch pass
#[derive(Debug)]
pub enum TargetMut<'a> {
    /// A collection of definitions
    Collection(&'a mut Collection),
    /// A single non-list record
    Dynamic(&'a mut Object),
}

/// A registered type lent out for one pass
#[derive(Debug)]
pub struct RegistryEntry<'a> {
    /// Record descriptor
    pub descriptor: Arc<TypeDescriptor>,
    /// What the pass mutates
    pub target: TargetMut<'a>,
}

/// Per type-name access to definition data
pub trait DefinitionRegistry {
    /// Borrow the data registered under `type_name`
    fn lookup(&mut self, type_name: &str) -> Option<RegistryEntry<'_>>;

    /// Names of every registered type
    fn type_names(&self) -> Vec<String>;
}

#[derive(Debug)]
enum Stored {
    Collection(Collection),
    Dynamic(Object),
}

#[derive(Debug)]
struct Registration {
    descriptor: Arc<TypeDescriptor>,
    stored: Stored,
}

/// Registry keeping every type in memory
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    types: IndexMap<String, Registration>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, descriptor: Arc<TypeDescriptor>, stored: Stored) {
        self.types.insert(
            descriptor.name().to_string(),
            Registration { descriptor, stored },
        );
    }

    /// Register records with list semantics
    pub fn register_ordered(&mut self, descriptor: Arc<TypeDescriptor>, records: Vec<Object>) {
        let collection = Collection::ordered(descriptor.identity(), records);
        self.register(descriptor, Stored::Collection(collection));
    }

    /// Register records with identity slots
    ///
    /// The records are registered even when their identities collide.
    pub fn register_indexed(
        &mut self,
        descriptor: Arc<TypeDescriptor>,
        records: Vec<Object>,
    ) -> Result<(), CollectionError> {
        let (collection, result) = Collection::indexed(descriptor.identity(), records);
        self.register(descriptor, Stored::Collection(collection));
        result
    }

    /// Register a single non-list record
    pub fn register_dynamic(&mut self, descriptor: Arc<TypeDescriptor>, record: Object) {
        self.register(descriptor, Stored::Dynamic(record));
    }

    /// Descriptor of a registered type
    pub fn descriptor(&self, type_name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(type_name).map(|r| &r.descriptor)
    }

    /// Registered collection
    pub fn collection(&self, type_name: &str) -> Option<&Collection> {
        match &self.types.get(type_name)?.stored {
            Stored::Collection(collection) => Some(collection),
            Stored::Dynamic(_) => None,
        }
    }

    /// Registered dynamic record
    pub fn dynamic(&self, type_name: &str) -> Option<&Object> {
        match &self.types.get(type_name)?.stored {
            Stored::Dynamic(record) => Some(record),
            Stored::Collection(_) => None,
        }
    }

    /// Every type as JSON: collections as arrays, dynamic records as objects
    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        let mut out = Map::new();
        for (name, registration) in &self.types {
            let value = match &registration.stored {
                Stored::Collection(collection) => serde_json::to_value(collection.records())?,
                Stored::Dynamic(record) => serde_json::to_value(record)?,
            };
            out.insert(name.clone(), value);
        }
        Ok(JsonValue::Object(out))
    }
}

impl DefinitionRegistry for InMemoryRegistry {
    fn lookup(&mut self, type_name: &str) -> Option<RegistryEntry<'_>> {
        let key = if self.types.contains_key(type_name) {
            type_name.to_string()
        } else {
            self.types
                .keys()
                .find(|name| name.eq_ignore_ascii_case(type_name))?
                .clone()
        };
        let registration = self.types.get_mut(&key)?;
        let target = match &mut registration.stored {
            Stored::Collection(collection) => TargetMut::Collection(collection),
            Stored::Dynamic(record) => TargetMut::Dynamic(record),
        };
        Some(RegistryEntry {
            descriptor: Arc::clone(&registration.descriptor),
            target,
        })
    }

    fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Data, ScalarKind};

    #[test]
    fn test_lookup_ignores_case() {
        let descriptor = TypeDescriptor::record("Resource")
            .scalar("ResourceId", ScalarKind::INT)
            .build();
        let mut registry = InMemoryRegistry::new();
        registry.register_ordered(
            descriptor,
            vec![Object::new("Resource").with("ResourceId", Data::Int(1))],
        );

        let entry = registry.lookup("resource").unwrap();
        assert_eq!(entry.descriptor.identity(), Some("ResourceId"));
        assert!(matches!(entry.target, TargetMut::Collection(c) if c.len() == 1));
        assert!(registry.lookup("Hull").is_none());
        assert_eq!(registry.type_names(), vec!["Resource".to_string()]);
    }

    #[test]
    fn test_to_json() {
        let descriptor = TypeDescriptor::record("Settings")
            .scalar("Speed", ScalarKind::DOUBLE)
            .build();
        let mut registry = InMemoryRegistry::new();
        registry.register_dynamic(
            descriptor,
            Object::new("Settings").with("Speed", Data::Float(1.5)),
        );
        assert_eq!(
            registry.to_json().unwrap(),
            serde_json::json!({"Settings": {"Speed": 1.5}})
        );
    }

    #[test]
    fn test_registries_keep_their_own_descriptors() {
        let mut first = InMemoryRegistry::new();
        first.register_ordered(
            TypeDescriptor::record("Part")
                .scalar("PartId", ScalarKind::INT)
                .build(),
            Vec::new(),
        );
        let mut second = InMemoryRegistry::new();
        second.register_ordered(
            TypeDescriptor::record("Part")
                .scalar("Code", ScalarKind::Text)
                .build(),
            Vec::new(),
        );

        let identity = |registry: &InMemoryRegistry| {
            registry
                .descriptor("Part")
                .and_then(|d| d.identity().map(str::to_string))
        };
        assert_eq!(identity(&first), Some("PartId".to_string()));
        assert_eq!(identity(&second), None);
        assert!(second.descriptor("Part").unwrap().field("PartId").is_none());
    }
}
