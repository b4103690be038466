//! Patch interpreter
//!
//! [`Patcher`] applies patch documents to the definitions held by a
//! [`DefinitionRegistry`]. Documents are split into per-type sections and
//! each section runs as one pass: instructions apply in order, authoring
//! errors skip only the failing instruction, and indexed collections are
//! rebuilt once when the pass ends.
//!
//! The shared variable store persists across passes and documents; only
//! [`Patcher::reload`] clears it.

#![warn(missing_docs)]

pub mod collection;
pub mod context;
pub mod instruction;
mod interpreter;
pub mod object;

pub use context::PatchContext;
pub use instruction::{Instruction, InstructionKind, Section, parse_document};
pub use object::patch_object;

use crate::config::PatchConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink, Severity};
use crate::document::Node;
use crate::error::PatchError;
use crate::registry::DefinitionRegistry;
use crate::store::VariableStore;
use interpreter::PassRunner;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of one type pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Definition type name
    pub type_name: String,
    /// Instructions applied
    pub applied: usize,
    /// Instructions skipped after an authoring error
    pub skipped: usize,
    /// A `test` stopped the rest of the document
    pub aborted: bool,
    /// Contract violation that ended the pass early
    pub failure: Option<PatchError>,
}

impl PassReport {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..Self::default()
        }
    }

    /// Check for a pass that ran to completion without skips
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failure.is_none()
    }
}

/// Outcome of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentReport {
    /// One report per type section, in document order
    pub passes: Vec<PassReport>,
    /// A `test` stopped the document
    pub aborted: bool,
    /// Document-level shape error
    pub error: Option<PatchError>,
}

impl DocumentReport {
    /// Total applied instructions
    pub fn applied(&self) -> usize {
        self.passes.iter().map(|p| p.applied).sum()
    }

    /// Total skipped instructions
    pub fn skipped(&self) -> usize {
        self.passes.iter().map(|p| p.skipped).sum()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Applies patch documents to a registry
pub struct Patcher<R> {
    registry: R,
    store: Arc<VariableStore>,
    sink: Arc<dyn DiagnosticSink>,
    config: PatchConfig,
}

impl<R: DefinitionRegistry> Patcher<R> {
    /// Patcher with a private store, default configuration and a [`LogSink`]
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            store: Arc::new(VariableStore::new()),
            sink: Arc::new(LogSink),
            config: PatchConfig::default(),
        }
    }

    /// Use `store` for shared variables
    pub fn with_store(mut self, store: Arc<VariableStore>) -> Self {
        self.store = store;
        self
    }

    /// Report diagnostics to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use `config`
    pub fn with_config(mut self, config: PatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry being patched
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Mutable access to the registry
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// Give the registry back
    pub fn into_registry(self) -> R {
        self.registry
    }

    /// Shared variable store
    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Clear shared variables before content is loaded again
    pub fn reload(&self) {
        log::debug!("Clearing {} shared variables", self.store.len());
        self.store.clear();
    }

    /// Apply every section of `document` in order
    pub fn apply_document(&mut self, document: &Node) -> DocumentReport {
        let mut report = DocumentReport::default();
        let sections = match parse_document(document) {
            Ok(sections) => sections,
            Err(error) => {
                self.sink
                    .report(Diagnostic::from_error("", Severity::Error, &error));
                report.error = Some(error);
                return report;
            }
        };

        for section in sections {
            let mut instructions = Vec::with_capacity(section.instructions.len());
            let mut malformed = 0;
            for parsed in section.instructions {
                match parsed {
                    Ok(instruction) => instructions.push(instruction),
                    Err(error) => {
                        malformed += 1;
                        self.sink.report(Diagnostic::from_error(
                            section.type_name.as_str(),
                            Severity::Warning,
                            &error,
                        ));
                    }
                }
            }

            let mut pass = self.apply_pass(&section.type_name, &instructions);
            pass.skipped += malformed;
            let aborted = pass.aborted;
            report.passes.push(pass);
            if aborted {
                report.aborted = true;
                break;
            }
        }
        report
    }

    /// Apply `instructions` to the data registered as `type_name`
    pub fn apply_pass(&mut self, type_name: &str, instructions: &[Instruction]) -> PassReport {
        let mut report = PassReport::new(type_name);
        let Patcher {
            registry,
            store,
            sink,
            config,
        } = self;

        let outcome = if config.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| {
                run_pass(registry, store, &**sink, config, type_name, instructions, &mut report)
            }))
            .unwrap_or_else(|payload| {
                Err(PatchError::contract(format!(
                    "panic while patching {type_name}: {}",
                    panic_message(payload.as_ref())
                )))
            })
        } else {
            run_pass(registry, store, &**sink, config, type_name, instructions, &mut report)
        };

        if let Err(error) = outcome {
            sink.unhandled(type_name, &error);
            report.failure = Some(error);
        }
        log::debug!(
            "Pass {type_name}: {} applied, {} skipped",
            report.applied,
            report.skipped
        );
        report
    }
}

fn run_pass<R: DefinitionRegistry>(
    registry: &mut R,
    store: &Arc<VariableStore>,
    sink: &dyn DiagnosticSink,
    config: &PatchConfig,
    type_name: &str,
    instructions: &[Instruction],
    report: &mut PassReport,
) -> Result<(), PatchError> {
    let entry = registry
        .lookup(type_name)
        .ok_or_else(|| PatchError::contract(format!("no definitions registered as '{type_name}'")))?;
    let ctx = PatchContext::new(config, Arc::clone(store));
    let mut runner = PassRunner::new(&ctx, sink, &entry.descriptor);
    runner.run(entry.target, instructions, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::error::ErrorKind;
    use crate::model::{Data, Object, ScalarKind, TypeDescriptor};
    use crate::registry::InMemoryRegistry;
    use pretty_assertions::assert_eq;

    fn resource_registry() -> InMemoryRegistry {
        let descriptor = TypeDescriptor::record("Resource")
            .scalar("ResourceId", ScalarKind::INT)
            .scalar("Name", ScalarKind::Text)
            .build();
        let records = (0..3)
            .map(|id| {
                Object::new("Resource")
                    .with("ResourceId", Data::Int(id))
                    .with("Name", Data::Text(format!("r{id}")))
            })
            .collect();
        let mut registry = InMemoryRegistry::new();
        registry.register_indexed(descriptor, records).unwrap();
        registry
    }

    #[test]
    fn test_unknown_type_is_a_contract_violation() {
        let sink = Arc::new(CollectingSink::new());
        let mut patcher = Patcher::new(resource_registry()).with_sink(sink.clone());
        let report = patcher.apply_pass("Nope", &[]);
        assert_eq!(report.failure.map(|e| e.kind()), Some(ErrorKind::Contract));
        assert_eq!(sink.unhandled_errors().len(), 1);
    }

    #[test]
    fn test_malformed_instructions_are_skipped() {
        let sink = Arc::new(CollectingSink::new());
        let mut patcher = Patcher::new(resource_registry()).with_sink(sink.clone());
        let document = Node::from_json_str(
            r#"[{"Resource": [
                {"add": {"ResourceId": 3}, "update": {"ResourceId": 1}},
                {"update": {"ResourceId": 1, "Name": "one"}}
            ]}]"#,
        )
        .unwrap();
        let report = patcher.apply_document(&document);
        assert_eq!(report.applied(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(sink.problems()[0].kind, Some(ErrorKind::Structural));
    }

    #[test]
    fn test_reload_clears_store() {
        let patcher = Patcher::new(resource_registry());
        patcher.store().insert("x", 1.0.into());
        patcher.reload();
        assert!(patcher.store().is_empty());
    }
}
