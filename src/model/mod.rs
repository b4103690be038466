//! Data model and value types
//!
//! Formula runtime values, semantic versions, definition record storage
//! and the type descriptors that drive the object patcher.

#![warn(missing_docs)]

pub mod data;
pub mod type_coercion;
pub mod types;
pub mod value;
pub mod version;

pub use data::{Data, Object};
pub use type_coercion::{CoercionError, CoercionResult, TypeCoercion};
pub use types::{
    FieldDescriptor, IDENTITY_SUFFIX, RecordBuilder, ScalarKind, Shape, TypeDescriptor,
};
pub use value::{Value, ValueKind};
pub use version::{Version, VersionError, VersionRange};
