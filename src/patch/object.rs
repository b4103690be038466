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

//! Type-directed record patching
//!
//! Field rules, first match wins:
//!
//! 1. `$Field` evaluates a formula with the current value bound as `value`
//! 2. list fields are handed to the collection patcher
//! 3. bool, integer and float fields take a literal, else a formula
//! 4. text fields take the literal verbatim
//! 5. enums parse case-insensitively, else from a formula's text
//! 6. nested records recurse, constructing an instance when unset

use super::collection::patch_list;
use super::context::{PatchContext, record_bindings};
use crate::compiler::Bindings;
use crate::document::{Node, Position};
use crate::error::{PatchError, PatchResult};
use crate::model::{Data, Object, ScalarKind, Shape, TypeCoercion, TypeDescriptor, Value};

/// Apply a field map to `object`
pub fn patch_object(
    ctx: &PatchContext<'_>,
    descriptor: &TypeDescriptor,
    object: &mut Object,
    fields: &[(String, Node)],
) -> PatchResult<()> {
    for (key, node) in fields {
        patch_field(ctx, descriptor, object, key, node)?;
    }
    Ok(())
}

fn patch_field(
    ctx: &PatchContext<'_>,
    descriptor: &TypeDescriptor,
    object: &mut Object,
    key: &str,
    node: &Node,
) -> PatchResult<()> {
    let (name, formula) = match key.strip_prefix('$') {
        Some(rest) => (rest, true),
        None => (key, false),
    };
    let position = node.position();
    let field = descriptor.field(name).ok_or_else(|| {
        PatchError::type_mismatch(
            name,
            format!("a field of {}", descriptor.name()),
            "unknown field",
            position,
        )
    })?;
    let ty = field.ty.clone();
    let field_name = field.name.clone();
    let current = object.get(&field_name).cloned().unwrap_or_default();

    let next = if formula {
        let text = scalar_text(node, &field_name)?;
        let bindings = record_bindings(object, Value::from_data(&current));
        let value = ctx.evaluate(text, bindings, position)?;
        value_to_data(&ty, &field_name, value, position)?
    } else {
        patch_value(ctx, &ty, &field_name, current, node, Some(&*object))?
    };
    log::trace!("{}.{} = {}", descriptor.name(), field_name, next);
    object.set(field_name, next);
    Ok(())
}

fn scalar_text<'n>(node: &'n Node, field: &str) -> PatchResult<&'n str> {
    node.as_scalar().ok_or_else(|| {
        PatchError::type_mismatch(field, "formula text", node.describe(), node.position())
    })
}

fn soft_bindings(owner: Option<&Object>, current: &Data) -> Bindings {
    let value = Value::from_data(current);
    match owner {
        Some(record) => record_bindings(record, value),
        None => Bindings::new().with("item", value.clone()).with("value", value),
    }
}

/// Patch one stored value of type `ty` with a document node
///
/// `owner` is the record the value belongs to, bound as `item` when a
/// literal falls back to formula evaluation. List elements have no owner
/// and bind themselves.
pub(crate) fn patch_value(
    ctx: &PatchContext<'_>,
    ty: &TypeDescriptor,
    name: &str,
    current: Data,
    node: &Node,
    owner: Option<&Object>,
) -> PatchResult<Data> {
    match ty.shape() {
        Shape::List { .. } => patch_list(ctx, ty, name, current, node),
        Shape::Scalar(kind) => patch_scalar(ctx, *kind, name, &current, node, owner),
        Shape::Enum(variants) => patch_enum(ctx, variants, ty.name(), name, &current, node, owner),
        Shape::Nested { .. } => patch_nested(ctx, ty, name, current, node),
    }
}

fn patch_scalar(
    ctx: &PatchContext<'_>,
    kind: ScalarKind,
    name: &str,
    current: &Data,
    node: &Node,
    owner: Option<&Object>,
) -> PatchResult<Data> {
    let position = node.position();
    let text = node.as_scalar().ok_or_else(|| {
        PatchError::type_mismatch(name, kind.name(), node.describe(), position)
    })?;
    match kind {
        ScalarKind::Text => return Ok(Data::Text(text.to_string())),
        ScalarKind::Char | ScalarKind::Decimal | ScalarKind::DateTime => {
            return Err(PatchError::type_mismatch(
                name,
                "a patchable field",
                kind.name(),
                position,
            ));
        }
        _ => {}
    }

    if let Ok(data) = TypeCoercion::parse_scalar(text, kind) {
        return Ok(data);
    }
    let value = ctx
        .evaluate(text, soft_bindings(owner, current), position)
        .map_err(|error| {
            log::debug!("'{text}' is neither a {} literal nor a formula: {error}", kind.name());
            PatchError::type_mismatch(name, kind.name(), format!("'{text}'"), position)
        })?;
    TypeCoercion::to_scalar(&value, kind)
        .map_err(|error| PatchError::type_mismatch(name, kind.name(), error.to_string(), position))
}

fn find_variant(variants: &[String], text: &str) -> Option<Data> {
    let text = text.trim();
    variants
        .iter()
        .find(|variant| variant.eq_ignore_ascii_case(text))
        .map(|variant| Data::Enum(variant.clone()))
}

fn patch_enum(
    ctx: &PatchContext<'_>,
    variants: &[String],
    type_name: &str,
    name: &str,
    current: &Data,
    node: &Node,
    owner: Option<&Object>,
) -> PatchResult<Data> {
    let position = node.position();
    let text = node.as_scalar().ok_or_else(|| {
        PatchError::type_mismatch(name, type_name, node.describe(), position)
    })?;
    if let Some(data) = find_variant(variants, text) {
        return Ok(data);
    }
    ctx.evaluate(text, soft_bindings(owner, current), position)
        .ok()
        .and_then(|value| find_variant(variants, &TypeCoercion::to_text(&value)))
        .ok_or_else(|| PatchError::type_mismatch(name, type_name, format!("'{text}'"), position))
}

fn patch_nested(
    ctx: &PatchContext<'_>,
    ty: &TypeDescriptor,
    name: &str,
    current: Data,
    node: &Node,
) -> PatchResult<Data> {
    let position = node.position();
    if let Some(text) = node.as_scalar() {
        if ctx.is_delete(text) {
            return Ok(cleared(ty));
        }
        return Err(PatchError::type_mismatch(
            name,
            ty.name(),
            format!("'{text}'"),
            position,
        ));
    }
    let entries = node.as_mapping().ok_or_else(|| {
        PatchError::type_mismatch(name, ty.name(), node.describe(), position)
    })?;
    let mut object = match current {
        Data::Object(object) => object,
        _ => ty.new_populated_instance(),
    };
    patch_object(ctx, ty, &mut object, entries)?;
    Ok(Data::Object(object))
}

/// Value a deleted field or element takes: null for references, zero for
/// value types
pub(crate) fn cleared(ty: &TypeDescriptor) -> Data {
    match ty.shape() {
        Shape::Nested { by_value: true, .. } => Data::Object(ty.new_instance()),
        _ => ty.default_data(),
    }
}

/// Convert a formula result to storage for a field of type `ty`
pub(crate) fn value_to_data(
    ty: &TypeDescriptor,
    name: &str,
    value: Value,
    position: Position,
) -> PatchResult<Data> {
    let mismatch = |found: String| PatchError::type_mismatch(name, ty.name(), found, position);
    match ty.shape() {
        Shape::Scalar(kind) => TypeCoercion::to_scalar(&value, *kind)
            .map_err(|error| mismatch(error.to_string())),
        Shape::Enum(variants) => {
            let text = TypeCoercion::to_text(&value);
            find_variant(variants, &text).ok_or_else(|| mismatch(format!("'{text}'")))
        }
        Shape::Nested { by_value, .. } => match value {
            Value::Null if !by_value => Ok(Data::Null),
            Value::Record(record) if record.type_name() == ty.name() => {
                Ok(Data::Object(record.as_ref().clone()))
            }
            other => Err(mismatch(other.type_name())),
        },
        Shape::List { element, .. } => match value {
            Value::Null => Ok(Data::Null),
            Value::Tuple(items) => items
                .iter()
                .map(|item| value_to_data(element, name, item.clone(), position))
                .collect::<PatchResult<Vec<_>>>()
                .map(Data::List),
            other => Err(mismatch(other.type_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatchConfig;
    use crate::error::ErrorKind;
    use crate::store::VariableStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn hull() -> Arc<TypeDescriptor> {
        let size = TypeDescriptor::enumeration("HullSize", ["Small", "Medium", "Large"]);
        let engine = TypeDescriptor::record("Engine")
            .scalar("Thrust", ScalarKind::DOUBLE)
            .build();
        let point = TypeDescriptor::record("Point")
            .scalar("X", ScalarKind::INT)
            .by_value()
            .build();
        TypeDescriptor::record("ShipHull")
            .scalar("ShipHullId", ScalarKind::INT)
            .scalar("Name", ScalarKind::Text)
            .scalar("Cost", ScalarKind::DOUBLE)
            .scalar("Armed", ScalarKind::Bool)
            .scalar("Born", ScalarKind::DateTime)
            .field("Size", size)
            .field("Engine", engine)
            .field("Anchor", point)
            .build()
    }

    fn apply(record: &mut Object, json: &str) -> PatchResult<()> {
        let config = PatchConfig::default();
        let context = PatchContext::new(&config, Arc::new(VariableStore::new()));
        let node = Node::from_json_str(json).unwrap();
        patch_object(&context, &hull(), record, node.as_mapping().unwrap())
    }

    #[test]
    fn test_literals_and_formulas() {
        let mut record = hull().new_instance();
        record.set("Cost", Data::Float(10.0));
        apply(
            &mut record,
            r#"{"Name": "Scout", "$Cost": "value() * 1.5", "Armed": "yes", "Size": "large", "ShipHullId": "2 + 3"}"#,
        )
        .unwrap();
        assert_eq!(record.get("Name"), Some(&Data::Text("Scout".into())));
        assert_eq!(record.get("Cost"), Some(&Data::Float(15.0)));
        assert_eq!(record.get("Armed"), Some(&Data::Bool(true)));
        assert_eq!(record.get("Size"), Some(&Data::Enum("Large".into())));
        assert_eq!(record.get("ShipHullId"), Some(&Data::Int(5)));
    }

    #[test]
    fn test_formula_can_read_item() {
        let mut record = hull().new_instance();
        record.set("Cost", Data::Float(4.0));
        apply(&mut record, r#"{"$Name": "\"Hull \" .. txt(item.Cost)"}"#).unwrap();
        assert_eq!(record.get("Name"), Some(&Data::Text("Hull 4".into())));
    }

    #[test]
    fn test_nested_records_are_constructed() {
        let mut record = hull().new_instance();
        assert_eq!(record.get("Engine"), Some(&Data::Null));
        apply(&mut record, r#"{"Engine": {"Thrust": 12}}"#).unwrap();
        let engine = record.get("Engine").and_then(Data::as_object).unwrap();
        assert_eq!(engine.get("Thrust"), Some(&Data::Float(12.0)));

        apply(&mut record, r#"{"Engine": "delete()", "Anchor": "DELETE()"}"#).unwrap();
        assert_eq!(record.get("Engine"), Some(&Data::Null));
        let anchor = record.get("Anchor").and_then(Data::as_object).unwrap();
        assert_eq!(anchor.get("X"), Some(&Data::Int(0)));
    }

    #[test]
    fn test_type_mismatches() {
        let mut record = hull().new_instance();
        let error = apply(&mut record, r#"{"Cost": "cheap"}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);

        let error = apply(&mut record, r#"{"Wings": 2}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);

        let error = apply(&mut record, r#"{"Born": "2024-01-01"}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);

        let error = apply(&mut record, r#"{"Size": "Huge"}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_formula_field_failure_is_hard() {
        let mut record = hull().new_instance();
        let error = apply(&mut record, r#"{"$Name": "Unknown .. 1"}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnresolvedSymbol);
    }
}
