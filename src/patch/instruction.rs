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

//! Instruction model and document layout

use crate::document::{Node, NodeKind, Position};
use crate::error::{PatchError, PatchResult};
use std::fmt;

/// Instruction verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// Write shared variables
    State,
    /// Append a record
    Add,
    /// Register a named field map for later adds
    Template,
    /// Patch one record by identity
    Update,
    /// Patch every record matching `$where`
    UpdateAll,
    /// Remove one record by identity
    Remove,
    /// Remove every record matching a predicate
    RemoveAll,
    /// Guard the rest of the document with boolean formulas
    Test,
}

impl InstructionKind {
    /// Parse a verb; case and `-`/`_` separators are ignored
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "state" => Some(InstructionKind::State),
            "add" => Some(InstructionKind::Add),
            "template" => Some(InstructionKind::Template),
            "update" => Some(InstructionKind::Update),
            "updateall" => Some(InstructionKind::UpdateAll),
            "remove" => Some(InstructionKind::Remove),
            "removeall" => Some(InstructionKind::RemoveAll),
            "test" => Some(InstructionKind::Test),
            _ => None,
        }
    }

    /// Canonical document spelling
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionKind::State => "state",
            InstructionKind::Add => "add",
            InstructionKind::Template => "template",
            InstructionKind::Update => "update",
            InstructionKind::UpdateAll => "update-all",
            InstructionKind::Remove => "remove",
            InstructionKind::RemoveAll => "remove-all",
            InstructionKind::Test => "test",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction with its payload
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Verb
    pub kind: InstructionKind,
    /// Payload node
    pub payload: Node,
    /// Position of the instruction in its document
    pub position: Position,
}

impl Instruction {
    /// Instruction positioned at its payload
    pub fn new(kind: InstructionKind, payload: Node) -> Self {
        let position = payload.position();
        Self {
            kind,
            payload,
            position,
        }
    }

    /// Parse a single-key instruction mapping such as `{update: {...}}`
    pub fn from_node(node: &Node) -> PatchResult<Self> {
        let position = node.position();
        let entries = node.as_mapping().ok_or_else(|| {
            PatchError::structural(
                format!("expected an instruction mapping, found a {}", node.describe()),
                position,
            )
        })?;
        let [(verb, payload)] = entries else {
            return Err(PatchError::structural(
                format!(
                    "instruction mapping must have exactly one key, found {}",
                    entries.len()
                ),
                position,
            ));
        };
        let kind = InstructionKind::parse(verb).ok_or_else(|| {
            PatchError::structural(format!("unknown instruction '{verb}'"), position)
        })?;
        Ok(Self {
            kind,
            payload: payload.clone(),
            position: if position.is_known() {
                position
            } else {
                payload.position()
            },
        })
    }
}

/// Instructions of one definition type within a document
#[derive(Debug, Clone)]
pub struct Section {
    /// Definition type name
    pub type_name: String,
    /// Position of the type key
    pub position: Position,
    /// Instructions in document order; malformed ones keep their error
    pub instructions: Vec<PatchResult<Instruction>>,
}

fn section(type_name: &str, body: &Node) -> Section {
    let instructions = match body.kind() {
        NodeKind::Sequence(items) => items.iter().map(Instruction::from_node).collect(),
        NodeKind::Mapping(_) => vec![Instruction::from_node(body)],
        NodeKind::Scalar(_) => vec![Err(PatchError::structural(
            format!("instructions for '{type_name}' must be a sequence"),
            body.position(),
        ))],
    };
    Section {
        type_name: type_name.to_string(),
        position: body.position(),
        instructions,
    }
}

/// Split a document into per-type sections
///
/// Accepts a sequence of type-keyed mappings or a single type-keyed mapping.
pub fn parse_document(document: &Node) -> PatchResult<Vec<Section>> {
    let mappings: Vec<&Node> = match document.kind() {
        NodeKind::Sequence(items) => items.iter().collect(),
        NodeKind::Mapping(_) => vec![document],
        NodeKind::Scalar(_) => {
            return Err(PatchError::structural(
                "patch document must be a sequence or mapping",
                document.position(),
            ));
        }
    };

    let mut sections = Vec::new();
    for mapping in mappings {
        let entries = mapping.as_mapping().ok_or_else(|| {
            PatchError::structural(
                format!("expected a type-keyed mapping, found a {}", mapping.describe()),
                mapping.position(),
            )
        })?;
        sections.extend(entries.iter().map(|(name, body)| section(name, body)));
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case("state", InstructionKind::State)]
    #[case("Update-All", InstructionKind::UpdateAll)]
    #[case("remove_all", InstructionKind::RemoveAll)]
    #[case("TEST", InstructionKind::Test)]
    fn test_parse_verbs(#[case] text: &str, #[case] expected: InstructionKind) {
        assert_eq!(InstructionKind::parse(text), Some(expected));
    }

    #[test]
    fn test_multi_key_instruction_is_structural() {
        let node = Node::mapping([("add", Node::scalar("")), ("update", Node::scalar(""))]).at(4, 3);
        let error = Instruction::from_node(&node).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Structural);
        assert_eq!(error.position(), Some(Position::new(4, 3)));
    }

    #[test]
    fn test_parse_document_sections() {
        let document = Node::from_json_str(
            r#"[
                {"Resource": [{"add": {"ResourceId": 1}}, {"bogus": {}}]},
                {"ShipHull": {"update": {"ShipHullId": 2}}}
            ]"#,
        )
        .unwrap();
        let sections = parse_document(&document).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].type_name, "Resource");
        assert!(sections[0].instructions[0].is_ok());
        assert!(sections[0].instructions[1].is_err());
        assert_eq!(
            sections[1].instructions[0].as_ref().unwrap().kind,
            InstructionKind::Update
        );
    }

    #[test]
    fn test_scalar_document_is_rejected() {
        assert!(parse_document(&Node::scalar("nope")).is_err());
    }
}
