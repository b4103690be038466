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

//! List and array field patching

use super::context::PatchContext;
use super::object::{cleared, patch_value};
use crate::compiler::Bindings;
use crate::document::{Node, NodeKind, Position};
use crate::error::{PatchError, PatchResult};
use crate::model::{Data, Shape, TypeDescriptor, Value};

const ADD_KEY: &str = "$add";

struct ListPatcher<'p, 'c> {
    ctx: &'p PatchContext<'c>,
    element: &'p TypeDescriptor,
    fixed: bool,
    name: &'p str,
    items: Vec<Data>,
}

/// Patch a list-typed value
///
/// A sequence patches elements by position. A mapping accepts `$add`,
/// integer indexes (optionally `$`-prefixed) and parenthesized predicates.
pub(crate) fn patch_list(
    ctx: &PatchContext<'_>,
    list_ty: &TypeDescriptor,
    name: &str,
    current: Data,
    node: &Node,
) -> PatchResult<Data> {
    let Shape::List { element, fixed } = list_ty.shape() else {
        return Err(PatchError::type_mismatch(
            name,
            "list",
            list_ty.name(),
            node.position(),
        ));
    };
    let items = match current {
        Data::List(items) => items,
        _ => Vec::new(),
    };
    let mut patcher = ListPatcher {
        ctx,
        element,
        fixed: *fixed,
        name,
        items,
    };

    match node.kind() {
        NodeKind::Sequence(nodes) => {
            for (index, item) in nodes.iter().enumerate() {
                patcher.patch_index(index, item)?;
            }
        }
        NodeKind::Mapping(entries) => {
            for (key, value) in entries {
                patcher.patch_key(key, value)?;
            }
        }
        NodeKind::Scalar(text) => {
            return Err(PatchError::type_mismatch(
                name,
                list_ty.name(),
                format!("'{text}'"),
                node.position(),
            ));
        }
    }
    Ok(Data::List(patcher.items))
}

fn parse_index(key: &str) -> Option<usize> {
    key.strip_prefix('$').unwrap_or(key).trim().parse().ok()
}

fn is_predicate(key: &str) -> bool {
    let key = key.trim();
    key.starts_with('(') && key.ends_with(')')
}

impl ListPatcher<'_, '_> {
    fn patch_key(&mut self, key: &str, value: &Node) -> PatchResult<()> {
        if key.eq_ignore_ascii_case(ADD_KEY) {
            return self.append_all(value);
        }
        if is_predicate(key) {
            return self.patch_matching(key.trim(), value);
        }
        match parse_index(key) {
            Some(index) => self.patch_index(index, value),
            None => Err(PatchError::structural(
                format!("'{key}' is not an index, predicate or {ADD_KEY} in list '{}'", self.name),
                value.position(),
            )),
        }
    }

    fn fresh_element(&self) -> Data {
        match self.element.shape() {
            Shape::Nested { .. } => Data::Object(self.element.new_populated_instance()),
            _ => self.element.empty_data(),
        }
    }

    fn patch_index(&mut self, index: usize, node: &Node) -> PatchResult<()> {
        let len = self.items.len();
        if index > len {
            if !self.fixed {
                return Err(PatchError::structural(
                    format!(
                        "index {index} is past the end of '{}' (length {len})",
                        self.name
                    ),
                    node.position(),
                ));
            }
            let limit = self.ctx.config().max_array_length;
            if index >= limit {
                return Err(PatchError::structural(
                    format!(
                        "index {index} would grow '{}' past {limit} elements",
                        self.name
                    ),
                    node.position(),
                ));
            }
            let fill = self.fresh_element();
            self.items.resize(index, fill);
        }
        if index == self.items.len() {
            let fresh = self.fresh_element();
            self.items.push(fresh);
        }
        let current = self.items[index].clone();
        self.items[index] = self.patch_element(current, node)?;
        Ok(())
    }

    fn append_all(&mut self, node: &Node) -> PatchResult<()> {
        let nodes = match node.as_sequence() {
            Some(nodes) => nodes,
            None => std::slice::from_ref(node),
        };
        for item in nodes {
            let fresh = self.fresh_element();
            let patched = self.patch_element(fresh, item)?;
            self.items.push(patched);
        }
        Ok(())
    }

    fn patch_matching(&mut self, predicate: &str, node: &Node) -> PatchResult<()> {
        let position: Position = node.position();
        let collection = Value::tuple(self.items.iter().map(Value::from_data).collect());
        let mut matches = Vec::new();
        for (index, item) in self.items.iter().enumerate() {
            let bindings = Bindings::new()
                .with("item", Value::from_data(item))
                .with("value", index as f64)
                .with("collection", collection.clone());
            if self.ctx.evaluate_bool(predicate, bindings, position)? {
                matches.push(index);
            }
        }
        log::debug!(
            "{} of {} elements of '{}' match {predicate}",
            matches.len(),
            self.items.len(),
            self.name
        );
        for index in matches {
            let current = self.items[index].clone();
            self.items[index] = self.patch_element(current, node)?;
        }
        Ok(())
    }

    fn patch_element(&self, current: Data, node: &Node) -> PatchResult<Data> {
        if node.as_scalar().is_some_and(|text| self.ctx.is_delete(text)) {
            return Ok(cleared(self.element));
        }
        let node = self.unwrap_type_key(node);
        patch_value(self.ctx, self.element, self.name, current, node, None)
    }

    /// `{ElementType: {...}}` patches the element itself
    fn unwrap_type_key<'n>(&self, node: &'n Node) -> &'n Node {
        if !matches!(self.element.shape(), Shape::Nested { .. }) {
            return node;
        }
        match node.as_mapping() {
            Some([(key, inner)])
                if key.eq_ignore_ascii_case(self.element.name()) && inner.as_mapping().is_some() =>
            {
                inner
            }
            _ => node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatchConfig;
    use crate::error::ErrorKind;
    use crate::model::{Object, ScalarKind};
    use crate::store::VariableStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn ints(values: &[i64]) -> Data {
        Data::List(values.iter().map(|v| Data::Int(*v)).collect())
    }

    fn apply(ty: &TypeDescriptor, current: Data, json: &str) -> PatchResult<Data> {
        let config = PatchConfig::default();
        let context = PatchContext::new(&config, Arc::new(VariableStore::new()));
        let node = Node::from_json_str(json).unwrap();
        patch_list(&context, ty, "Values", current, &node)
    }

    #[test]
    fn test_sequence_patches_by_position() {
        let ty = TypeDescriptor::list(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(apply(&ty, ints(&[1, 2, 3]), "[9, 9]").unwrap(), ints(&[9, 9, 3]));
        assert_eq!(apply(&ty, ints(&[1]), "[5, 6]").unwrap(), ints(&[5, 6]));
    }

    #[test]
    fn test_add_appends() {
        let ty = TypeDescriptor::list(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(
            apply(&ty, ints(&[1, 2, 3]), r#"{"$add": [4, 5]}"#).unwrap(),
            ints(&[1, 2, 3, 4, 5])
        );
        assert_eq!(apply(&ty, Data::Null, r#"{"$add": 7}"#).unwrap(), ints(&[7]));
    }

    #[test]
    fn test_index_growth() {
        let list = TypeDescriptor::list(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(apply(&list, ints(&[1]), r#"{"$1": 2, "0": 0}"#).unwrap(), ints(&[0, 2]));
        let error = apply(&list, ints(&[1]), r#"{"3": 2}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Structural);

        let array = TypeDescriptor::array(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(apply(&array, ints(&[1]), r#"{"3": 2}"#).unwrap(), ints(&[1, 0, 0, 2]));
    }

    #[test]
    fn test_array_growth_is_bounded() {
        let array = TypeDescriptor::array(TypeDescriptor::scalar(ScalarKind::INT));
        let error = apply(&array, ints(&[1]), r#"{"1099511627776": 2}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Structural);

        let config = PatchConfig {
            max_array_length: 4,
            ..PatchConfig::default()
        };
        let context = PatchContext::new(&config, Arc::new(VariableStore::new()));
        let grow = |json: &str| {
            let node = Node::from_json_str(json).unwrap();
            patch_list(&context, &array, "Values", ints(&[1]), &node)
        };
        assert_eq!(grow(r#"{"3": 2}"#).unwrap(), ints(&[1, 0, 0, 2]));
        assert_eq!(grow(r#"{"4": 2}"#).unwrap_err().kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_predicate_keys() {
        let ty = TypeDescriptor::list(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(
            apply(&ty, ints(&[1, 5, 10]), r#"{"(item > 3)": "item() * 2"}"#).unwrap(),
            ints(&[1, 10, 20])
        );
        assert_eq!(
            apply(&ty, ints(&[1, 5, 10]), r#"{"(value == 0)": 7}"#).unwrap_err().kind(),
            ErrorKind::Syntax
        );
        assert_eq!(
            apply(&ty, ints(&[4, 4]), r#"{"(value is collection.count - 1)": 0}"#).unwrap(),
            ints(&[4, 0])
        );
    }

    #[test]
    fn test_delete_and_type_key_unwrap() {
        let slot = TypeDescriptor::record("Slot")
            .scalar("Size", ScalarKind::INT)
            .build();
        let ty = TypeDescriptor::list(slot.clone());
        let existing = Data::List(vec![
            Data::Object(Object::new("Slot").with("Size", Data::Int(1))),
            Data::Object(Object::new("Slot").with("Size", Data::Int(2))),
        ]);
        let patched = apply(&ty, existing, r#"["delete()", {"Slot": {"Size": 8}}]"#).unwrap();
        let items = patched.as_list().unwrap();
        assert_eq!(items[0], Data::Null);
        assert_eq!(items[1].as_object().unwrap().get("Size"), Some(&Data::Int(8)));

        let ints_ty = TypeDescriptor::list(TypeDescriptor::scalar(ScalarKind::INT));
        assert_eq!(apply(&ints_ty, ints(&[3, 4]), r#"["delete()"]"#).unwrap(), ints(&[0, 4]));
    }
}
