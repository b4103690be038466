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

//! Ordered and indexed definition collections

use crate::model::{Data, Object};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Errors raised by collection maintenance
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    /// A live record already carries the identity
    #[error("A record with identity {identity} already exists")]
    DuplicateIdentity {
        /// Identity as text
        identity: String,
    },

    /// Rebuild found records it could not index
    #[error("Index rebuild found {duplicates} duplicate and {missing} missing identities")]
    Inconsistent {
        /// Records sharing an identity with an earlier record
        duplicates: usize,
        /// Records without a usable identity
        missing: usize,
    },
}

/// Hashable identity value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Integral identity
    Int(i64),
    /// Any other identity
    Text(String),
}

impl IdentityKey {
    /// Key for a stored identity; null and composite values have none
    pub fn from_data(data: &Data) -> Option<Self> {
        match data {
            Data::Null | Data::Object(_) | Data::List(_) | Data::Bool(_) => None,
            other => Some(match other.as_i64() {
                Some(i) => IdentityKey::Int(i),
                None => IdentityKey::Text(other.to_string()),
            }),
        }
    }
}

/// Storage strategy of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Insertion order, linear lookup
    Ordered,
    /// Identity-addressable slots with an explicit rebuild step
    Indexed,
}

/// A definition collection borrowed for one patch pass
#[derive(Debug, Clone)]
pub enum Collection {
    /// List semantics
    Ordered(OrderedCollection),
    /// Slot semantics
    Indexed(IndexedCollection),
}

/// Records in insertion order
#[derive(Debug, Clone, Default)]
pub struct OrderedCollection {
    records: Vec<Object>,
    identity: Option<String>,
}

/// Records in identity-tracking slots
///
/// Removal leaves a tombstone; [`IndexedCollection::rebuild`] compacts the
/// slots, orders them by identity and refreshes the identity index.
#[derive(Debug, Clone, Default)]
pub struct IndexedCollection {
    slots: Vec<Option<Object>>,
    index: FxHashMap<IdentityKey, usize>,
    identity: Option<String>,
}

fn identity_of<'a>(record: &'a Object, field: Option<&str>) -> Option<&'a Data> {
    field.and_then(|name| record.get_ignore_case(name))
}

impl Collection {
    /// Ordered collection over `records`
    pub fn ordered(identity: Option<&str>, records: Vec<Object>) -> Self {
        Collection::Ordered(OrderedCollection {
            records,
            identity: identity.map(str::to_string),
        })
    }

    /// Indexed collection over `records`; the index is built immediately
    pub fn indexed(identity: Option<&str>, records: Vec<Object>) -> (Self, Result<(), CollectionError>) {
        let mut collection = IndexedCollection {
            slots: records.into_iter().map(Some).collect(),
            index: FxHashMap::default(),
            identity: identity.map(str::to_string),
        };
        let result = collection.rebuild();
        (Collection::Indexed(collection), result)
    }

    /// Storage strategy
    pub fn kind(&self) -> CollectionKind {
        match self {
            Collection::Ordered(_) => CollectionKind::Ordered,
            Collection::Indexed(_) => CollectionKind::Indexed,
        }
    }

    /// Check for an indexed collection
    pub fn is_indexed(&self) -> bool {
        self.kind() == CollectionKind::Indexed
    }

    /// Identity field name
    pub fn identity_field(&self) -> Option<&str> {
        match self {
            Collection::Ordered(c) => c.identity.as_deref(),
            Collection::Indexed(c) => c.identity.as_deref(),
        }
    }

    /// Number of slots, tombstones included
    pub fn slot_count(&self) -> usize {
        match self {
            Collection::Ordered(c) => c.records.len(),
            Collection::Indexed(c) => c.slots.len(),
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        match self {
            Collection::Ordered(c) => c.records.len(),
            Collection::Indexed(c) => c.slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    /// Check for a collection without live records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live record at `slot`
    pub fn get(&self, slot: usize) -> Option<&Object> {
        match self {
            Collection::Ordered(c) => c.records.get(slot),
            Collection::Indexed(c) => c.slots.get(slot).and_then(Option::as_ref),
        }
    }

    /// Mutable live record at `slot`
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Object> {
        match self {
            Collection::Ordered(c) => c.records.get_mut(slot),
            Collection::Indexed(c) => c.slots.get_mut(slot).and_then(Option::as_mut),
        }
    }

    /// Replace the live record at `slot`, returning the previous one
    pub fn replace(&mut self, slot: usize, record: Object) -> Option<Object> {
        self.get_mut(slot)
            .map(|current| std::mem::replace(current, record))
    }

    /// Live records with their slots
    pub fn iter(&self) -> Box<dyn Iterator<Item = (usize, &Object)> + '_> {
        match self {
            Collection::Ordered(c) => Box::new(c.records.iter().enumerate()),
            Collection::Indexed(c) => Box::new(
                c.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, record)| record.as_ref().map(|r| (slot, r))),
            ),
        }
    }

    /// Identity value of a record in this collection
    pub fn identity_of<'a>(&self, record: &'a Object) -> Option<&'a Data> {
        identity_of(record, self.identity_field())
    }

    /// Slot of the live record with `identity`
    ///
    /// Indexed collections try the slot equal to the identity first and
    /// fall back to a linear scan when it holds another record.
    pub fn find(&self, identity: &Data) -> Option<usize> {
        if let Collection::Indexed(c) = self {
            let direct = identity
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .filter(|slot| {
                    c.slots
                        .get(*slot)
                        .and_then(Option::as_ref)
                        .and_then(|r| identity_of(r, c.identity.as_deref()))
                        .is_some_and(|found| found.same_identity(identity))
                });
            if direct.is_some() {
                return direct;
            }
        }
        self.iter()
            .find(|(_, record)| {
                self.identity_of(record)
                    .is_some_and(|found| found.same_identity(identity))
            })
            .map(|(slot, _)| slot)
    }

    /// Append a record, returning its slot
    ///
    /// Indexed collections reject a record whose identity is already live.
    pub fn insert(&mut self, record: Object) -> Result<usize, CollectionError> {
        let identity = self.identity_of(&record).cloned();
        if self.is_indexed() {
            if let Some(identity) = identity.as_ref().filter(|id| self.find(id).is_some()) {
                return Err(CollectionError::DuplicateIdentity {
                    identity: identity.to_string(),
                });
            }
        }
        match self {
            Collection::Ordered(c) => {
                c.records.push(record);
                Ok(c.records.len() - 1)
            }
            Collection::Indexed(c) => {
                c.slots.push(Some(record));
                let slot = c.slots.len() - 1;
                if let Some(key) = identity.as_ref().and_then(IdentityKey::from_data) {
                    c.index.insert(key, slot);
                }
                Ok(slot)
            }
        }
    }

    /// Remove the live record at `slot`
    pub fn remove(&mut self, slot: usize) -> Option<Object> {
        match self {
            Collection::Ordered(c) => (slot < c.records.len()).then(|| c.records.remove(slot)),
            Collection::Indexed(c) => {
                let record = c.slots.get_mut(slot)?.take()?;
                if let Some(key) =
                    identity_of(&record, c.identity.as_deref()).and_then(IdentityKey::from_data)
                {
                    if c.index.get(&key) == Some(&slot) {
                        c.index.remove(&key);
                    }
                }
                Some(record)
            }
        }
    }

    /// Slot recorded for `identity` by the identity index
    pub fn get_index(&self, identity: &Data) -> Option<usize> {
        match self {
            Collection::Ordered(_) => self.find(identity),
            Collection::Indexed(c) => {
                let key = IdentityKey::from_data(identity)?;
                c.index.get(&key).copied()
            }
        }
    }

    /// Next unused numeric identity: one past the largest, or zero
    pub fn next_free_id(&self) -> i64 {
        self.iter()
            .filter_map(|(_, record)| self.identity_of(record).and_then(Data::as_i64))
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Bring the identity index up to date; no-op for ordered collections
    pub fn rebuild(&mut self) -> Result<(), CollectionError> {
        match self {
            Collection::Ordered(_) => Ok(()),
            Collection::Indexed(c) => c.rebuild(),
        }
    }

    /// Copy of the live records in slot order
    pub fn records(&self) -> Vec<Object> {
        self.iter().map(|(_, record)| record.clone()).collect()
    }
}

fn compare_identities(a: Option<&Data>, b: Option<&Data>) -> Ordering {
    let numeric = |d: Option<&Data>| d.and_then(Data::as_f64);
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl IndexedCollection {
    /// Compact tombstones, order by identity and refresh the index
    ///
    /// Every record gets a slot even on error; the first record wins when
    /// identities collide.
    pub fn rebuild(&mut self) -> Result<(), CollectionError> {
        let field = self.identity.clone();
        let mut records: Vec<Object> = self.slots.drain(..).flatten().collect();
        records.sort_by(|a, b| {
            compare_identities(
                identity_of(a, field.as_deref()),
                identity_of(b, field.as_deref()),
            )
        });

        self.index.clear();
        let mut duplicates = 0;
        let mut missing = 0;
        for (slot, record) in records.iter().enumerate() {
            match identity_of(record, field.as_deref()).and_then(IdentityKey::from_data) {
                Some(key) => {
                    if self.index.contains_key(&key) {
                        duplicates += 1;
                    } else {
                        self.index.insert(key, slot);
                    }
                }
                None => missing += 1,
            }
        }
        self.slots = records.into_iter().map(Some).collect();

        log::debug!(
            "Rebuilt index over {} records ({} duplicate, {} missing)",
            self.slots.len(),
            duplicates,
            missing
        );
        if duplicates > 0 || missing > 0 {
            return Err(CollectionError::Inconsistent { duplicates, missing });
        }
        Ok(())
    }
}

/// Rebuilds an indexed collection when dropped, including during unwinding
///
/// Rebuild errors are logged and swallowed.
pub struct RebuildGuard<'a> {
    collection: &'a mut Collection,
}

impl<'a> RebuildGuard<'a> {
    /// Guard `collection` for the rest of a pass
    pub fn new(collection: &'a mut Collection) -> Self {
        Self { collection }
    }
}

impl Deref for RebuildGuard<'_> {
    type Target = Collection;

    fn deref(&self) -> &Collection {
        self.collection
    }
}

impl DerefMut for RebuildGuard<'_> {
    fn deref_mut(&mut self) -> &mut Collection {
        self.collection
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.collection.rebuild() {
            log::warn!("Index rebuild failed, index may be stale: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resource(id: i64, name: &str) -> Object {
        Object::new("Resource")
            .with("ResourceId", Data::Int(id))
            .with("Name", Data::Text(name.into()))
    }

    fn indexed(ids: &[i64]) -> Collection {
        let records = ids.iter().map(|id| resource(*id, &format!("r{id}"))).collect();
        let (collection, result) = Collection::indexed(Some("ResourceId"), records);
        assert!(result.is_ok());
        collection
    }

    #[test]
    fn test_indexed_find_uses_slot_then_scan() {
        let collection = indexed(&[0, 1, 2, 7]);
        assert_eq!(collection.find(&Data::Int(1)), Some(1));
        assert_eq!(collection.find(&Data::Int(7)), Some(3));
        assert_eq!(collection.find(&Data::Text("2".into())), Some(2));
        assert_eq!(collection.find(&Data::Int(5)), None);
    }

    #[test]
    fn test_indexed_rejects_duplicates() {
        let mut collection = indexed(&[0, 1]);
        let result = collection.insert(resource(1, "again"));
        assert_eq!(
            result,
            Err(CollectionError::DuplicateIdentity {
                identity: "1".into()
            })
        );
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_tombstones_are_compacted_by_rebuild() {
        let mut collection = indexed(&[0, 1, 2, 3]);
        assert!(collection.remove(1).is_some());
        assert_eq!(collection.slot_count(), 4);
        assert_eq!(collection.len(), 3);
        assert!(collection.remove(1).is_none());

        collection.insert(resource(1, "back")).unwrap();
        collection.rebuild().unwrap();
        assert_eq!(collection.slot_count(), 4);
        for id in 0..4 {
            let slot = collection.get_index(&Data::Int(id)).unwrap();
            assert_eq!(collection.get(slot).unwrap().get("ResourceId"), Some(&Data::Int(id)));
        }
    }

    #[test]
    fn test_rebuild_reports_collisions() {
        let records = vec![resource(3, "a"), resource(3, "b"), Object::new("Resource")];
        let (collection, result) = Collection::indexed(Some("ResourceId"), records);
        assert_eq!(
            result,
            Err(CollectionError::Inconsistent {
                duplicates: 1,
                missing: 1
            })
        );
        assert_eq!(collection.get_index(&Data::Int(3)), Some(0));
    }

    #[test]
    fn test_guard_rebuilds_on_drop() {
        let mut collection = indexed(&[0, 1, 2]);
        {
            let mut guard = RebuildGuard::new(&mut collection);
            guard.remove(0);
        }
        assert_eq!(collection.slot_count(), 2);
        assert_eq!(collection.get_index(&Data::Int(2)), Some(1));
    }

    #[test]
    fn test_ordered_collection() {
        let mut collection = Collection::ordered(
            Some("ResourceId"),
            vec![resource(5, "a"), resource(2, "b")],
        );
        assert_eq!(collection.next_free_id(), 6);
        assert_eq!(collection.insert(resource(5, "dup")), Ok(2));
        assert_eq!(collection.find(&Data::Int(2)), Some(1));
        assert_eq!(collection.remove(0).map(|r| r.get("Name").cloned()), Some(Some(Data::Text("a".into()))));
        assert_eq!(collection.len(), 2);
        assert_eq!(Collection::ordered(None, vec![]).next_free_id(), 0);
    }
}
