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

//! Generic patch document tree
//!
//! Documents are trees of scalar, sequence and mapping nodes tagged with
//! their source position. Any front-end parser can build them; a JSON
//! adapter is provided.

use serde_json::Value as JsonValue;
use std::fmt;

/// Line and column in the source document, 1-based; zero means unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Position {
    /// Line number
    pub line: usize,
    /// Column number
    pub column: usize,
}

impl Position {
    /// Create a position
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Whether the position came from a source document
    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            f.write_str("<unknown>")
        }
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Scalar text
    Scalar(String),
    /// Ordered items
    Sequence(Vec<Node>),
    /// Keyed entries in document order
    Mapping(Vec<(String, Node)>),
}

/// Document node with source position
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    position: Position,
}

impl Node {
    /// Scalar node
    pub fn scalar(text: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Scalar(text.into()),
            position: Position::default(),
        }
    }

    /// Sequence node
    pub fn sequence(items: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Sequence(items),
            position: Position::default(),
        }
    }

    /// Mapping node
    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, Node)>) -> Self {
        Self {
            kind: NodeKind::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            position: Position::default(),
        }
    }

    /// Attach a source position
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.position = Position::new(line, column);
        self
    }

    /// Node payload
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Source position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Scalar text, if a scalar
    pub fn as_scalar(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Scalar(text) => Some(text),
            _ => None,
        }
    }

    /// Items, if a sequence
    pub fn as_sequence(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Entries, if a mapping
    pub fn as_mapping(&self) -> Option<&[(String, Node)]> {
        match &self.kind {
            NodeKind::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Mapping entry by key, ignoring case
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Short description used in error messages
    pub fn describe(&self) -> &'static str {
        match self.kind {
            NodeKind::Scalar(_) => "scalar",
            NodeKind::Sequence(_) => "sequence",
            NodeKind::Mapping(_) => "mapping",
        }
    }

    /// Build a tree from JSON. Positions are unknown; `null` becomes an
    /// empty scalar and numbers keep their JSON spelling.
    pub fn from_json(value: &JsonValue) -> Node {
        match value {
            JsonValue::Null => Node::scalar(""),
            JsonValue::Bool(b) => Node::scalar(b.to_string()),
            JsonValue::Number(n) => Node::scalar(n.to_string()),
            JsonValue::String(s) => Node::scalar(s.clone()),
            JsonValue::Array(items) => Node::sequence(items.iter().map(Node::from_json).collect()),
            JsonValue::Object(entries) => Node::mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Node::from_json(v))),
            ),
        }
    }

    /// Parse JSON text into a tree
    pub fn from_json_str(text: &str) -> Result<Node, serde_json::Error> {
        let value: JsonValue = serde_json::from_str(text)?;
        Ok(Node::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_json_keeps_key_order() {
        let node = Node::from_json_str(r#"{"b": 1, "a": [true, null, "x"]}"#).unwrap();
        let keys: Vec<&str> = node
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(
            node.get("A").and_then(Node::as_sequence).unwrap(),
            &[Node::scalar("true"), Node::scalar(""), Node::scalar("x")]
        );
    }

    #[test]
    fn test_positions() {
        let node = Node::scalar("1").at(3, 7);
        assert_eq!(node.position().to_string(), "3:7");
        assert_eq!(Node::scalar("1").position().to_string(), "<unknown>");
    }
}
