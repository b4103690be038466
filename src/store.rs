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

//! Shared variable store
//!
//! A concurrent string-keyed map of formula values that outlives single
//! patch passes. Factories passed to [`VariableStore::get_or_add`] and
//! [`VariableStore::add_or_update`] run while the entry is locked and must
//! not read the store themselves; evaluate formulas first and pass the
//! result in.

use crate::compiler::ScopeProvider;
use crate::model::Value;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Process-wide map of shared variables
#[derive(Debug, Default)]
pub struct VariableStore {
    values: DashMap<String, Value>,
}

static GLOBAL_STORE: Lazy<Arc<VariableStore>> = Lazy::new(|| Arc::new(VariableStore::new()));

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store
    pub fn global() -> Arc<VariableStore> {
        Arc::clone(&GLOBAL_STORE)
    }

    /// Current value of `key`
    pub fn try_get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    /// Existing value of `key`, or the factory's value stored atomically
    pub fn get_or_add(&self, key: &str, factory: impl FnOnce() -> Value) -> Value {
        self.values
            .entry(key.to_string())
            .or_insert_with(factory)
            .value()
            .clone()
    }

    /// Insert via `add` when absent, else replace via `update(prior)`
    pub fn add_or_update(
        &self,
        key: &str,
        add: impl FnOnce() -> Value,
        update: impl FnOnce(&Value) -> Value,
    ) -> Value {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = update(entry.get());
                entry.insert(next.clone());
                next
            }
            Entry::Vacant(entry) => {
                let next = add();
                entry.insert(next.clone());
                next
            }
        }
    }

    /// Replace the value of `key` unconditionally
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Remove `key`, returning its value
    pub fn try_remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    /// Whether `key` is set
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check for an empty store
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove every variable
    pub fn clear(&self) {
        self.values.clear();
    }

    /// Sorted copy of every variable
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl ScopeProvider for VariableStore {
    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.try_get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_add_keeps_first_value() {
        let store = VariableStore::new();
        assert_eq!(store.get_or_add("id", || Value::Number(7.0)), Value::Number(7.0));
        assert_eq!(store.get_or_add("id", || Value::Number(8.0)), Value::Number(7.0));
    }

    #[test]
    fn test_add_or_update() {
        let store = VariableStore::new();
        let bump = |prior: &Value| Value::Number(prior.as_number().unwrap_or(0.0) + 1.0);
        assert_eq!(
            store.add_or_update("n", || Value::Number(1.0), bump),
            Value::Number(1.0)
        );
        assert_eq!(
            store.add_or_update("n", || Value::Number(1.0), bump),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let store = VariableStore::new();
        store.insert("a", Value::from("x"));
        store.insert("b", Value::Null);
        assert_eq!(store.try_remove("a"), Some(Value::from("x")));
        assert_eq!(store.try_remove("a"), None);
        assert!(store.contains_key("b"));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_is_a_scope_provider() {
        let store = VariableStore::new();
        store.insert("Mod.Counter", Value::Number(3.0));
        assert!(ScopeProvider::contains(&store, "Mod.Counter"));
        assert_eq!(ScopeProvider::lookup(&store, "Mod.Counter"), Some(Value::Number(3.0)));
    }
}
