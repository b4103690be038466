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

//! Instruction dispatch for one type pass

use super::PassReport;
use super::context::{PatchContext, record_bindings};
use super::instruction::{Instruction, InstructionKind};
use super::object::{patch_object, value_to_data};
use crate::compiler::Bindings;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::document::{Node, NodeKind, Position};
use crate::error::{ErrorKind, PatchError, PatchResult};
use crate::model::{Data, Object, Shape, TypeCoercion, TypeDescriptor, Value};
use crate::registry::{Collection, RebuildGuard, TargetMut};
use rustc_hash::FxHashMap;
use std::sync::Arc;

const WHERE_KEY: &str = "$where";
const TEMPLATE_KEY: &str = "$template";
const NAME_KEY: &str = "$name";

type Fields = Vec<(String, Node)>;

/// How the pass continues after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    AbortDocument,
}

/// Most recent staged write to `name`, if any
fn staged_write(staged: &[(&str, Option<Value>)], name: &str) -> Option<Option<Value>> {
    staged
        .iter()
        .rev()
        .find(|(staged_name, _)| *staged_name == name)
        .map(|(_, value)| value.clone())
}

fn position_of(node: &Node, fallback: Position) -> Position {
    if node.position().is_known() {
        node.position()
    } else {
        fallback
    }
}

fn mapping(instruction: &Instruction) -> PatchResult<&[(String, Node)]> {
    instruction.payload.as_mapping().ok_or_else(|| {
        PatchError::structural(
            format!(
                "{} expects a mapping, found a {}",
                instruction.kind,
                instruction.payload.describe()
            ),
            instruction.position,
        )
    })
}

fn scalar<'n>(node: &'n Node, what: &str, fallback: Position) -> PatchResult<&'n str> {
    node.as_scalar().ok_or_else(|| {
        PatchError::structural(
            format!("{what} must be a scalar, found a {}", node.describe()),
            position_of(node, fallback),
        )
    })
}

fn find_key<'f>(fields: &'f [(String, Node)], key: &str) -> Option<&'f Node> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, node)| node)
}

fn without_key(fields: &[(String, Node)], key: &str) -> Fields {
    fields
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case(key))
        .cloned()
        .collect()
}

/// `Some(false)` for a literal identity key, `Some(true)` for `$Identity`
fn identity_key(key: &str, identity: &str) -> Option<bool> {
    if key.eq_ignore_ascii_case(identity) {
        Some(false)
    } else if key
        .strip_prefix('$')
        .is_some_and(|rest| rest.eq_ignore_ascii_case(identity))
    {
        Some(true)
    } else {
        None
    }
}

fn without_identity(fields: &[(String, Node)], identity: &str) -> Fields {
    fields
        .iter()
        .filter(|(k, _)| identity_key(k, identity).is_none())
        .cloned()
        .collect()
}

/// Runs the instructions of one type against its target
pub(crate) struct PassRunner<'r> {
    ctx: &'r PatchContext<'r>,
    sink: &'r dyn DiagnosticSink,
    descriptor: &'r TypeDescriptor,
    templates: FxHashMap<String, Fields>,
}

impl<'r> PassRunner<'r> {
    pub(crate) fn new(
        ctx: &'r PatchContext<'r>,
        sink: &'r dyn DiagnosticSink,
        descriptor: &'r TypeDescriptor,
    ) -> Self {
        Self {
            ctx,
            sink,
            descriptor,
            templates: FxHashMap::default(),
        }
    }

    /// Apply `instructions`; only contract violations escape
    pub(crate) fn run(
        &mut self,
        target: TargetMut<'_>,
        instructions: &[Instruction],
        report: &mut PassReport,
    ) -> PatchResult<()> {
        match target {
            TargetMut::Collection(collection) => {
                if collection.identity_field().is_none() {
                    return Err(PatchError::contract(format!(
                        "cannot discover the identity field of {}",
                        self.descriptor.name()
                    )));
                }
                let mut guard = RebuildGuard::new(collection);
                self.run_all(instructions, report, |runner, instruction| {
                    runner.apply_collection(&mut guard, instruction)
                })
            }
            TargetMut::Dynamic(record) => {
                self.run_all(instructions, report, |runner, instruction| {
                    runner.apply_dynamic(record, instruction)
                })
            }
        }
    }

    fn run_all(
        &mut self,
        instructions: &[Instruction],
        report: &mut PassReport,
        mut apply: impl FnMut(&mut Self, &Instruction) -> PatchResult<Flow>,
    ) -> PatchResult<()> {
        for instruction in instructions {
            match apply(self, instruction) {
                Ok(Flow::Continue) => {
                    report.applied += 1;
                    self.sink.report(Diagnostic::info(
                        self.descriptor.name(),
                        format!("applied {}", instruction.kind),
                        instruction.position,
                    ));
                }
                Ok(Flow::AbortDocument) => {
                    report.aborted = true;
                    break;
                }
                Err(error) if error.kind() == ErrorKind::Contract => return Err(error),
                Err(error) => {
                    report.skipped += 1;
                    self.report_error(Severity::Warning, &error, instruction.position);
                }
            }
        }
        Ok(())
    }

    fn report_error(&self, severity: Severity, error: &PatchError, fallback: Position) {
        let mut diagnostic = Diagnostic::from_error(self.descriptor.name(), severity, error);
        if !diagnostic.position.is_known() {
            diagnostic.position = fallback;
        }
        self.sink.report(diagnostic);
    }

    fn apply_collection(
        &mut self,
        collection: &mut Collection,
        instruction: &Instruction,
    ) -> PatchResult<Flow> {
        match instruction.kind {
            InstructionKind::State => self.state(instruction),
            InstructionKind::Template => self.template(instruction),
            InstructionKind::Test => Ok(self.test(instruction)),
            InstructionKind::Add => self.add(collection, instruction),
            InstructionKind::Update => self.update(collection, instruction),
            InstructionKind::UpdateAll => self.update_all(collection, instruction),
            InstructionKind::Remove => self.remove(collection, instruction),
            InstructionKind::RemoveAll => self.remove_all(collection, instruction),
        }
    }

    fn apply_dynamic(&mut self, record: &mut Object, instruction: &Instruction) -> PatchResult<Flow> {
        match instruction.kind {
            InstructionKind::State => self.state(instruction),
            InstructionKind::Template => self.template(instruction),
            InstructionKind::Test => Ok(self.test(instruction)),
            InstructionKind::Update => {
                let mut patched = record.clone();
                patch_object(self.ctx, self.descriptor, &mut patched, mapping(instruction)?)?;
                *record = patched;
                Ok(Flow::Continue)
            }
            other => Err(PatchError::structural(
                format!(
                    "{other} needs a collection but {} is a single record",
                    self.descriptor.name()
                ),
                instruction.position,
            )),
        }
    }

    fn identity_field(&self, collection: &Collection) -> PatchResult<String> {
        collection
            .identity_field()
            .map(str::to_string)
            .ok_or_else(|| {
                PatchError::contract(format!(
                    "cannot discover the identity field of {}",
                    self.descriptor.name()
                ))
            })
    }

    fn literal_identity(&self, field: &str, text: &str, position: Position) -> PatchResult<Data> {
        match self.descriptor.field(field).map(|f| f.ty.shape()) {
            Some(Shape::Scalar(kind)) => TypeCoercion::parse_scalar(text.trim(), *kind)
                .map_err(|error| PatchError::type_mismatch(field, kind.name(), error.to_string(), position)),
            _ => Ok(Data::Text(text.trim().to_string())),
        }
    }

    fn identity_data(&self, field: &str, value: Value, position: Position) -> PatchResult<Data> {
        match self.descriptor.field(field) {
            Some(descriptor) => value_to_data(&descriptor.ty, field, value, position),
            None => Ok(Data::Text(TypeCoercion::to_text(&value))),
        }
    }

    /// Identity named by a literal `Id` or `$Id` formula entry
    fn target_identity(
        &self,
        field: &str,
        fields: &[(String, Node)],
        position: Position,
    ) -> PatchResult<Data> {
        let (key, node) = fields
            .iter()
            .find(|(k, _)| identity_key(k, field).is_some())
            .ok_or_else(|| {
                PatchError::structural(format!("missing identity field '{field}'"), position)
            })?;
        let position = position_of(node, position);
        let text = scalar(node, field, position)?;
        if key.starts_with('$') {
            let value = self.ctx.evaluate(text, Bindings::new(), position)?;
            self.identity_data(field, value, position)
        } else {
            self.literal_identity(field, text, position)
        }
    }

    fn locate(&self, collection: &Collection, identity: &Data, position: Position) -> PatchResult<usize> {
        collection.find(identity).ok_or_else(|| {
            PatchError::identity_conflict(
                format!("no {} with identity {identity}", self.descriptor.name()),
                position,
            )
        })
    }

    /// Slots whose records satisfy `predicate`
    fn matching(
        &self,
        collection: &Collection,
        predicate: &str,
        position: Position,
    ) -> PatchResult<Vec<usize>> {
        let all = Value::tuple(
            collection
                .iter()
                .map(|(_, record)| Value::Record(Arc::new(record.clone())))
                .collect(),
        );
        let mut slots = Vec::new();
        for (slot, record) in collection.iter() {
            let identity = collection
                .identity_of(record)
                .and_then(Data::as_f64)
                .map_or(Value::Null, Value::Number);
            let bindings = record_bindings(record, identity).with("collection", all.clone());
            if self.ctx.evaluate_bool(predicate, bindings, position)? {
                slots.push(slot);
            }
        }
        log::debug!(
            "'{predicate}' matched {} of {} {} records",
            slots.len(),
            collection.len(),
            self.descriptor.name()
        );
        Ok(slots)
    }

    /// Every key is evaluated before any shared variable changes, so a
    /// failing key leaves the store untouched.
    fn state(&mut self, instruction: &Instruction) -> PatchResult<Flow> {
        let store = self.ctx.store();
        // `None` marks a removal
        let mut staged: Vec<(&str, Option<Value>)> = Vec::new();

        for (key, node) in mapping(instruction)? {
            let position = position_of(node, instruction.position);
            let (name, formula) = match key.strip_prefix('$') {
                Some(rest) => (rest, true),
                None => (key.as_str(), false),
            };
            let text = scalar(node, name, position)?;

            if self.ctx.is_delete(text) {
                let present = match staged_write(&staged, name) {
                    Some(value) => value.is_some(),
                    None => store.contains_key(name),
                };
                if !present {
                    return Err(PatchError::identity_conflict(
                        format!("shared variable '{name}' is not set"),
                        position,
                    ));
                }
                staged.push((name, None));
                continue;
            }

            let prior = match staged_write(&staged, name) {
                Some(value) => value.unwrap_or_default(),
                None => store.try_get(name).unwrap_or_default(),
            };
            let mut bindings = Bindings::new();
            for (staged_name, value) in &staged {
                if let Some(value) = value {
                    bindings.insert(*staged_name, value.clone());
                }
            }
            bindings.insert("value", prior);
            let value = match self.ctx.evaluate(text, bindings, position) {
                Ok(value) => value,
                Err(error) if !formula => {
                    log::debug!("state '{name}' keeps literal '{text}': {error}");
                    Value::text(text)
                }
                Err(error) => return Err(error),
            };
            staged.push((name, Some(value)));
        }

        for (name, value) in staged {
            match value {
                Some(value) => {
                    store.add_or_update(name, || value.clone(), |_| value.clone());
                }
                None => {
                    store.try_remove(name);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn template(&mut self, instruction: &Instruction) -> PatchResult<Flow> {
        let fields = mapping(instruction)?;
        let name = find_key(fields, NAME_KEY)
            .ok_or_else(|| {
                PatchError::structural("template requires a $name", instruction.position)
            })
            .and_then(|node| scalar(node, NAME_KEY, instruction.position))?;
        self.templates
            .insert(name.trim().to_string(), without_key(fields, NAME_KEY));
        Ok(Flow::Continue)
    }

    /// Template fields followed by the instruction's own fields
    fn expand_template(&self, fields: &[(String, Node)], position: Position) -> PatchResult<Fields> {
        let Some(node) = find_key(fields, TEMPLATE_KEY) else {
            return Ok(fields.to_vec());
        };
        let name = scalar(node, TEMPLATE_KEY, position)?.trim();
        let template = self.templates.get(name).ok_or_else(|| {
            PatchError::structural(format!("unknown template '{name}'"), position)
        })?;
        let mut merged = template.clone();
        merged.extend(without_key(fields, TEMPLATE_KEY));
        Ok(merged)
    }

    fn test(&mut self, instruction: &Instruction) -> Flow {
        let formulas: Vec<&Node> = match instruction.payload.kind() {
            NodeKind::Sequence(items) => items.iter().collect(),
            _ => vec![&instruction.payload],
        };
        for node in formulas {
            let position = position_of(node, instruction.position);
            let outcome = scalar(node, "test formula", position)
                .and_then(|text| self.ctx.evaluate_bool(text, Bindings::new(), position));
            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    self.sink.report(Diagnostic::info(
                        self.descriptor.name(),
                        "test is false, skipping the rest of the document",
                        position,
                    ));
                    return Flow::AbortDocument;
                }
                Err(error) => {
                    self.report_error(Severity::Warning, &error, position);
                    return Flow::AbortDocument;
                }
            }
        }
        Flow::Continue
    }

    fn add(&mut self, collection: &mut Collection, instruction: &Instruction) -> PatchResult<Flow> {
        let field = self.identity_field(collection)?;
        let fields = self.expand_template(mapping(instruction)?, instruction.position)?;

        let mut identity = None;
        for (key, node) in &fields {
            let Some(indirect) = identity_key(key, &field) else {
                continue;
            };
            let position = position_of(node, instruction.position);
            let text = scalar(node, key, position)?;
            identity = Some(if indirect {
                let next = collection.next_free_id();
                let allocated = self
                    .ctx
                    .store()
                    .get_or_add(text.trim(), || Value::Number(next as f64));
                self.identity_data(&field, allocated, position)?
            } else {
                self.literal_identity(&field, text, position)?
            });
        }
        let identity = identity.ok_or_else(|| {
            PatchError::structural(
                format!("add requires '{field}' or '${field}'"),
                instruction.position,
            )
        })?;

        let mut record = self.descriptor.new_populated_instance();
        record.set(field.clone(), identity);
        patch_object(
            self.ctx,
            self.descriptor,
            &mut record,
            &without_identity(&fields, &field),
        )?;
        collection
            .insert(record)
            .map_err(|error| PatchError::identity_conflict(error.to_string(), instruction.position))?;
        Ok(Flow::Continue)
    }

    fn update(&mut self, collection: &mut Collection, instruction: &Instruction) -> PatchResult<Flow> {
        let field = self.identity_field(collection)?;
        let fields = mapping(instruction)?;
        let identity = self.target_identity(&field, fields, instruction.position)?;
        let slot = self.locate(collection, &identity, instruction.position)?;

        let mut record = collection
            .get(slot)
            .cloned()
            .ok_or_else(|| PatchError::contract(format!("slot {slot} vanished")))?;
        patch_object(
            self.ctx,
            self.descriptor,
            &mut record,
            &without_identity(fields, &field),
        )?;
        collection.replace(slot, record);
        Ok(Flow::Continue)
    }

    fn update_all(&mut self, collection: &mut Collection, instruction: &Instruction) -> PatchResult<Flow> {
        let fields = mapping(instruction)?;
        let predicate = find_key(fields, WHERE_KEY)
            .ok_or_else(|| {
                PatchError::structural("update-all requires a $where predicate", instruction.position)
            })
            .and_then(|node| scalar(node, WHERE_KEY, instruction.position))?;
        let rest = without_key(fields, WHERE_KEY);

        let mut patched = Vec::new();
        for slot in self.matching(collection, predicate, instruction.position)? {
            if let Some(record) = collection.get(slot) {
                let mut record = record.clone();
                patch_object(self.ctx, self.descriptor, &mut record, &rest)?;
                patched.push((slot, record));
            }
        }
        for (slot, record) in patched {
            collection.replace(slot, record);
        }
        Ok(Flow::Continue)
    }

    fn remove(&mut self, collection: &mut Collection, instruction: &Instruction) -> PatchResult<Flow> {
        let field = self.identity_field(collection)?;
        let identity = match instruction.payload.as_scalar() {
            Some(text) => self.literal_identity(&field, text, instruction.position)?,
            None => self.target_identity(&field, mapping(instruction)?, instruction.position)?,
        };
        let slot = self.locate(collection, &identity, instruction.position)?;
        collection.remove(slot);
        Ok(Flow::Continue)
    }

    fn remove_all(&mut self, collection: &mut Collection, instruction: &Instruction) -> PatchResult<Flow> {
        let predicate = match instruction.payload.as_scalar() {
            Some(text) => text,
            None => find_key(mapping(instruction)?, WHERE_KEY)
                .ok_or_else(|| {
                    PatchError::structural("remove-all requires a predicate", instruction.position)
                })
                .and_then(|node| scalar(node, WHERE_KEY, instruction.position))?,
        };
        let mut slots = self.matching(collection, predicate, instruction.position)?;
        slots.sort_unstable_by(|a, b| b.cmp(a));
        for slot in slots {
            collection.remove(slot);
        }
        Ok(Flow::Continue)
    }
}
