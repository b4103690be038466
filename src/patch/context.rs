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

//! Formula evaluation context shared by one patch pass

use crate::compiler::{Bindings, CompileOptions, FormulaCompiler, Scope, ScopeProvider};
use crate::config::PatchConfig;
use crate::document::Position;
use crate::error::{PatchError, PatchResult};
use crate::model::{Object, Value};
use crate::store::VariableStore;
use std::sync::Arc;

/// Store, configuration and compiler options for one pass
pub struct PatchContext<'a> {
    config: &'a PatchConfig,
    store: Arc<VariableStore>,
    options: CompileOptions,
}

impl<'a> PatchContext<'a> {
    /// Create a context over `store`
    pub fn new(config: &'a PatchConfig, store: Arc<VariableStore>) -> Self {
        Self {
            config,
            options: config.compile_options(),
            store,
        }
    }

    /// Patch configuration
    pub fn config(&self) -> &PatchConfig {
        self.config
    }

    /// Shared variable store
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Compiler whose scope is `bindings` followed by the shared store
    pub fn compiler(&self, bindings: Bindings) -> FormulaCompiler {
        let store: Arc<dyn ScopeProvider> = self.store.clone();
        let scope = Scope::new()
            .with_provider(Arc::new(bindings))
            .with_provider(store);
        FormulaCompiler::with_options(scope, self.options.clone())
    }

    /// Compile and evaluate `formula`
    pub fn evaluate(&self, formula: &str, bindings: Bindings, position: Position) -> PatchResult<Value> {
        self.compiler(bindings)
            .compile(formula)
            .and_then(|compiled| compiled.evaluate())
            .map_err(|error| PatchError::formula(error, formula, position))
    }

    /// Compile and evaluate `formula` as a boolean
    pub fn evaluate_bool(&self, formula: &str, bindings: Bindings, position: Position) -> PatchResult<bool> {
        self.compiler(bindings)
            .compile(formula)
            .and_then(|compiled| compiled.evaluate_bool())
            .map_err(|error| PatchError::formula(error, formula, position))
    }

    /// Whether `text` is the delete sentinel
    pub fn is_delete(&self, text: &str) -> bool {
        self.config.is_delete(text)
    }
}

/// Bindings for formulas evaluated against one record
pub(crate) fn record_bindings(record: &Object, value: Value) -> Bindings {
    let snapshot = Value::Record(Arc::new(record.clone()));
    Bindings::new()
        .with("item", snapshot.clone())
        .with("def", snapshot)
        .with("value", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_bindings_shadow_store() {
        let config = PatchConfig::default();
        let store = Arc::new(VariableStore::new());
        store.insert("value", Value::Number(100.0));
        store.insert("Bonus", Value::Number(2.0));
        let context = PatchContext::new(&config, store);

        let bindings = Bindings::new().with("value", 5.0);
        let result = context
            .evaluate("value() * Bonus", bindings, Position::default())
            .unwrap();
        assert_eq!(result, Value::Number(10.0));
    }

    #[test]
    fn test_errors_carry_position() {
        let config = PatchConfig::default();
        let context = PatchContext::new(&config, Arc::new(VariableStore::new()));
        let error = context
            .evaluate("Missing + 1", Bindings::new(), Position::new(7, 9))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnresolvedSymbol);
        assert_eq!(error.position(), Some(Position::new(7, 9)));
    }
}
