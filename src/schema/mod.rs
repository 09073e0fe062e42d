//! Typed attribute trees and their schemas.
//!
//! This module provides:
//! - The [`Value`] attribute tree and [`AttrPath`] addressing
//! - Schema types: objects, lists, sets, discriminated unions
//! - Validation that collects every violation in one pass
//! - The JSON codec for remote records, workspace files and state
//! - Canonical content hashing for set identity and fingerprints

mod codec;
mod hash;
mod path;
mod types;
mod validate;
mod value;

pub use codec::{
    Naming, apply_defaults, camel_case, decode, encode, encode_field, field_key, from_config, merge_applied, raw,
    to_config,
};
pub use hash::{ContentHasher, strip_computed};
pub use path::{AttrPath, PathStep};
pub use types::{AttrType, Attribute, Constraint, Mutability, ObjectRule, ObjectSchema, Presence, UnionSchema};
pub use validate::{SchemaViolation, ViolationKind, validate};
pub use value::{NUMBER_TOLERANCE, Value, numbers_equal};
