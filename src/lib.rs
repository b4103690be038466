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

//! Formula compiler and patch interpreter for structured definition data
//!
//! Patch documents alter in-memory definition collections through literal
//! values and an embedded formula language:
//!
//! ```
//! use defpatch::{Bindings, evaluate_with};
//!
//! let value = evaluate_with("2 + 3 * x", Bindings::new().with("x", 4.0)).unwrap();
//! assert_eq!(value.as_number(), Some(14.0));
//! ```

pub mod ast;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod model;
pub mod parser;
pub mod patch;
pub mod registry;
pub mod store;

pub use compiler::{
    Bindings, CompileOptions, Formula, FormulaCompiler, FormulaError, FormulaResult, Scope,
    ScopeProvider,
};
pub use config::PatchConfig;
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, LogSink, Severity};
pub use document::{Node, NodeKind, Position};
pub use error::{ErrorKind, PatchError, PatchResult};
pub use model::{Data, Object, ScalarKind, TypeDescriptor, Value, Version, VersionRange};
pub use parser::{ParseError, parse};
pub use patch::{DocumentReport, Instruction, InstructionKind, PassReport, Patcher};
pub use registry::{Collection, DefinitionRegistry, InMemoryRegistry};
pub use store::VariableStore;

use std::sync::Arc;

/// Compile and evaluate `formula` against the process-wide store
pub fn evaluate(formula: &str) -> FormulaResult<Value> {
    evaluate_with(formula, Bindings::new())
}

/// Compile and evaluate `formula` with `bindings` in front of the
/// process-wide store
pub fn evaluate_with(formula: &str, bindings: Bindings) -> FormulaResult<Value> {
    let global: Arc<dyn ScopeProvider> = VariableStore::global();
    let scope = Scope::new()
        .with_provider(Arc::new(bindings))
        .with_provider(global);
    FormulaCompiler::new(scope).compile(formula)?.evaluate()
}
