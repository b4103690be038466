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

//! Ordered symbol lookup for the compiler
//!
//! A [`Scope`] is an explicit list of providers consulted front to back:
//! per-instruction [`Bindings`] first, then the shared variable store.

use crate::model::{Object, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Source of named values for formulas
pub trait ScopeProvider: Send + Sync {
    /// Whether the provider currently knows `name`
    fn contains(&self, name: &str) -> bool;

    /// Current value of `name`
    fn lookup(&self, name: &str) -> Option<Value>;
}

/// Ephemeral per-instruction bindings (`item`, `value`, `def`, `collection`)
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    /// Create empty bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style record binding
    pub fn with_record(self, name: impl Into<String>, record: Object) -> Self {
        self.with(name, Value::Record(Arc::new(record)))
    }

    /// Bind or rebind a name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    fn find(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| {
            self.values
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }
}

impl ScopeProvider for Bindings {
    fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.find(name).cloned()
    }
}

/// A symbol bound to the provider that resolved it
#[derive(Clone)]
pub struct ResolvedSymbol {
    /// Provider that knows the name
    pub provider: Arc<dyn ScopeProvider>,
    /// Joined prefix looked up in the provider
    pub name: String,
    /// Number of path segments the name consumed
    pub consumed: usize,
}

/// Ordered chain of scope providers
#[derive(Clone, Default)]
pub struct Scope {
    providers: Vec<Arc<dyn ScopeProvider>>,
}

impl Scope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower priority than the existing ones
    pub fn with_provider(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Insert a provider in front of the existing ones
    pub fn with_front(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.providers.insert(0, provider);
        self
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check for an empty chain
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve the longest dotted prefix of `path` known to any provider
    pub fn resolve(&self, path: &[String]) -> Option<ResolvedSymbol> {
        (1..=path.len()).rev().find_map(|consumed| {
            let name = path[..consumed].join(".");
            self.providers
                .iter()
                .find(|provider| provider.contains(&name))
                .map(|provider| ResolvedSymbol {
                    provider: Arc::clone(provider),
                    name,
                    consumed,
                })
        })
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> Vec<String> {
        text.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_front_provider_wins() {
        let scope = Scope::new()
            .with_provider(Arc::new(Bindings::new().with("x", 2.0)))
            .with_front(Arc::new(Bindings::new().with("x", 1.0)));
        let resolved = scope.resolve(&path("x")).unwrap();
        assert_eq!(resolved.provider.lookup("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_longest_prefix() {
        let scope = Scope::new().with_provider(Arc::new(
            Bindings::new().with("Mod.Counter", 5.0).with("Mod", "m"),
        ));
        let resolved = scope.resolve(&path("Mod.Counter.length")).unwrap();
        assert_eq!(resolved.name, "Mod.Counter");
        assert_eq!(resolved.consumed, 2);
        assert!(scope.resolve(&path("Other")).is_none());
    }

    #[test]
    fn test_bindings_ignore_case() {
        let bindings = Bindings::new().with("item", true);
        assert!(bindings.contains("Item"));
    }
}
