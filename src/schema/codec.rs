//! Conversion between JSON documents and attribute trees.
//!
//! Remote records use camelCase wire names; workspace and state files use
//! the attribute (snake_case) names. Both directions are driven by the
//! schema so that lists and sets, unions and scalars land in the right
//! [`Value`] variant.

use serde_json::{Map, Number};

use super::hash::ContentHasher;
use super::path::AttrPath;
use super::types::{AttrType, Attribute, Mutability, ObjectSchema};
use super::value::Value;
use crate::error::CodecError;

/// Which field names a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// Attribute names, as written in configuration and state.
    Attribute,
    /// Remote wire names.
    Wire,
}

/// Converts `snake_case` to `camelCase`.
#[must_use]
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Document key for a field under the given naming.
#[must_use]
pub fn field_key(name: &str, attr: &Attribute, naming: Naming) -> String {
    match naming {
        Naming::Attribute => name.to_string(),
        Naming::Wire => attr.wire_name.clone().unwrap_or_else(|| camel_case(name)),
    }
}

/// Decodes a remote record. Fields the schema does not declare are ignored.
///
/// # Errors
///
/// Returns an error if the record's shape disagrees with the schema.
pub fn decode(schema: &ObjectSchema, json: &serde_json::Value) -> Result<Value, CodecError> {
    Decoder {
        naming: Naming::Wire,
        strict: true,
    }
    .object(schema, json, &AttrPath::root())
}

/// Decodes a configuration document.
///
/// This direction is lenient: shape mismatches and undeclared fields are
/// carried through as plain values so that [`validate`](super::validate)
/// can report all of them at once.
///
/// # Errors
///
/// Returns an error only if the document root is not an object.
pub fn from_config(schema: &ObjectSchema, json: &serde_json::Value) -> Result<Value, CodecError> {
    Decoder {
        naming: Naming::Attribute,
        strict: false,
    }
    .object(schema, json, &AttrPath::root())
}

/// Encodes a tree as a remote payload. `Null` and computed fields are omitted.
///
/// # Errors
///
/// Returns an error if the tree contains `Unknown` or disagrees with the schema.
pub fn encode(schema: &ObjectSchema, value: &Value) -> Result<serde_json::Value, CodecError> {
    Encoder { naming: Naming::Wire }
        .object(schema, value, &AttrPath::root())
        .map(serde_json::Value::Object)
}

/// Encodes a tree with attribute names, computed fields included.
///
/// # Errors
///
/// Returns an error if the tree contains `Unknown` or disagrees with the schema.
pub fn to_config(schema: &ObjectSchema, value: &Value) -> Result<serde_json::Value, CodecError> {
    Encoder {
        naming: Naming::Attribute,
    }
    .object(schema, value, &AttrPath::root())
    .map(serde_json::Value::Object)
}

/// Encodes a single field value with the given naming.
///
/// # Errors
///
/// Returns an error if the value contains `Unknown` or disagrees with `ty`.
pub fn encode_field(ty: &AttrType, value: &Value, naming: Naming) -> Result<serde_json::Value, CodecError> {
    Encoder { naming }.node(ty, value, &AttrPath::root())
}

/// Converts arbitrary JSON to a tree without a schema.
#[must_use]
pub fn raw(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(raw).collect()),
        serde_json::Value::Object(fields) => {
            Value::Object(fields.iter().map(|(k, v)| (k.clone(), raw(v))).collect())
        }
    }
}

struct Decoder {
    naming: Naming,
    strict: bool,
}

impl Decoder {
    fn mismatch(&self, path: &AttrPath, ty: &AttrType, json: &serde_json::Value) -> Result<Value, CodecError> {
        if self.strict {
            Err(CodecError::new(
                path,
                format!("expected {}, got {}", ty.name(), json_type(json)),
            ))
        } else {
            Ok(raw(json))
        }
    }

    fn object(&self, schema: &ObjectSchema, json: &serde_json::Value, path: &AttrPath) -> Result<Value, CodecError> {
        let serde_json::Value::Object(map) = json else {
            return Err(CodecError::new(path, format!("expected object, got {}", json_type(json))));
        };

        let mut out = std::collections::BTreeMap::new();
        for (name, attr) in &schema.fields {
            let key = field_key(name, attr, self.naming);
            let child = match map.get(&key) {
                None | Some(serde_json::Value::Null) => Value::Null,
                Some(v) => self.node(&attr.ty, v, &path.field(name))?,
            };
            out.insert(name.clone(), child);
        }

        if !self.strict {
            for (key, v) in map {
                let declared = schema
                    .fields
                    .iter()
                    .any(|(name, attr)| field_key(name, attr, self.naming) == *key);
                if !declared {
                    out.insert(key.clone(), raw(v));
                }
            }
        }
        Ok(Value::Object(out))
    }

    fn node(&self, ty: &AttrType, json: &serde_json::Value, path: &AttrPath) -> Result<Value, CodecError> {
        match (ty, json) {
            (_, serde_json::Value::Null) => Ok(Value::Null),
            (AttrType::String, serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
            (AttrType::Number, serde_json::Value::Number(n)) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| CodecError::new(path, "number out of range")),
            (AttrType::Bool, serde_json::Value::Bool(b)) => Ok(Value::Bool(*b)),
            (AttrType::List(element), serde_json::Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.node(element, item, &path.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (AttrType::Set { element, .. }, serde_json::Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.node(element, item, &path.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Set),
            (AttrType::Object(schema), serde_json::Value::Object(_)) => self.object(schema, json, path),
            (AttrType::Union(union), serde_json::Value::Object(map)) => {
                let disc_key = field_key(
                    &union.discriminator,
                    &Attribute::required(AttrType::String),
                    self.naming,
                );
                let Some(variant) = map.get(&disc_key).and_then(serde_json::Value::as_str) else {
                    return if self.strict { Ok(Value::Null) } else { Ok(raw(json)) };
                };
                match union.resolve(variant) {
                    Some(schema) => self.object(&schema, json, path),
                    None if self.strict => Err(CodecError::new(
                        &path.field(&union.discriminator),
                        format!("unknown variant \"{variant}\""),
                    )),
                    None => Ok(raw(json)),
                }
            }
            _ => self.mismatch(path, ty, json),
        }
    }
}

struct Encoder {
    naming: Naming,
}

impl Encoder {
    fn object(&self, schema: &ObjectSchema, value: &Value, path: &AttrPath) -> Result<Map<String, serde_json::Value>, CodecError> {
        if value.is_unknown() {
            return Err(CodecError::new(path, "value is not known until apply"));
        }
        if value.as_object().is_none() {
            return Err(CodecError::new(path, format!("expected object, got {}", value.type_name())));
        }

        let mut map = Map::new();
        for (name, attr) in &schema.fields {
            if self.naming == Naming::Wire && attr.mutability == Mutability::ComputedOnly {
                continue;
            }
            let child = value.get(name);
            if child.is_null() {
                continue;
            }
            let encoded = self.node(&attr.ty, child, &path.field(name))?;
            map.insert(field_key(name, attr, self.naming), encoded);
        }
        Ok(map)
    }

    fn node(&self, ty: &AttrType, value: &Value, path: &AttrPath) -> Result<serde_json::Value, CodecError> {
        match (ty, value) {
            (_, Value::Unknown) => Err(CodecError::new(path, "value is not known until apply")),
            (_, Value::Null) => Ok(serde_json::Value::Null),
            (AttrType::String, Value::String(s)) => Ok(serde_json::Value::String(s.clone())),
            (AttrType::Number, Value::Number(n)) => encode_number(*n, path),
            (AttrType::Bool, Value::Bool(b)) => Ok(serde_json::Value::Bool(*b)),
            (AttrType::List(element) | AttrType::Set { element, .. }, Value::List(items) | Value::Set(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.node(element, item, &path.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            (AttrType::Object(schema), Value::Object(_)) => {
                self.object(schema, value, path).map(serde_json::Value::Object)
            }
            (AttrType::Union(union), Value::Object(_)) => {
                let variant = value.get(&union.discriminator);
                let Some(name) = variant.as_str() else {
                    return Err(CodecError::new(
                        &path.field(&union.discriminator),
                        format!("expected variant name, got {}", variant.type_name()),
                    ));
                };
                let schema = union.resolve(name).ok_or_else(|| {
                    CodecError::new(&path.field(&union.discriminator), format!("unknown variant \"{name}\""))
                })?;
                self.object(&schema, value, path).map(serde_json::Value::Object)
            }
            _ => Err(CodecError::new(
                path,
                format!("expected {}, got {}", ty.name(), value.type_name()),
            )),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn encode_number(n: f64, path: &AttrPath) -> Result<serde_json::Value, CodecError> {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(serde_json::Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .ok_or_else(|| CodecError::new(path, format!("cannot encode non-finite number {n}")))
}

const fn json_type(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Fills declared defaults for absent optional fields, recursively.
#[must_use]
pub fn apply_defaults(schema: &ObjectSchema, value: &Value) -> Value {
    let Value::Object(fields) = value else {
        return value.clone();
    };
    let mut out = fields.clone();
    for (name, attr) in &schema.fields {
        let current = value.get(name);
        let filled = match (&attr.default, current) {
            (Some(default), Value::Null) => default.clone(),
            _ => defaults_in(&attr.ty, current),
        };
        if !filled.is_null() {
            out.insert(name.clone(), filled);
        }
    }
    Value::Object(out)
}

fn defaults_in(ty: &AttrType, value: &Value) -> Value {
    match (ty, value) {
        (AttrType::Object(schema), Value::Object(_)) => apply_defaults(schema, value),
        (AttrType::Union(union), Value::Object(_)) => {
            match value.get(&union.discriminator).as_str().and_then(|v| union.resolve(v)) {
                Some(schema) => apply_defaults(&schema, value),
                None => value.clone(),
            }
        }
        (AttrType::List(element), Value::List(items)) => {
            Value::List(items.iter().map(|item| defaults_in(element, item)).collect())
        }
        (AttrType::Set { element, .. }, Value::Set(items)) => {
            Value::Set(items.iter().map(|item| defaults_in(element, item)).collect())
        }
        _ => value.clone(),
    }
}

/// Builds the tree recorded after a successful apply.
///
/// Configured fields come from `desired`; computed fields, unresolved
/// values and fields the remote system filled in come from `remote`.
#[must_use]
pub fn merge_applied(schema: &ObjectSchema, desired: &Value, remote: &Value) -> Value {
    let mut out = std::collections::BTreeMap::new();
    for (name, attr) in &schema.fields {
        let d = desired.get(name);
        let r = remote.get(name);
        let merged = if attr.mutability == Mutability::ComputedOnly
            || d.is_unknown()
            || (d.is_null() && attr.fills_when_absent)
        {
            r.clone()
        } else {
            merge_node(&attr.ty, d, r)
        };
        if !merged.is_null() {
            out.insert(name.clone(), merged);
        }
    }
    Value::Object(out)
}

fn merge_node(ty: &AttrType, desired: &Value, remote: &Value) -> Value {
    if desired.is_unknown() {
        return remote.clone();
    }
    match (ty, desired, remote) {
        (AttrType::Object(schema), Value::Object(_), Value::Object(_)) => merge_applied(schema, desired, remote),
        (AttrType::Union(union), Value::Object(_), Value::Object(_)) => {
            let d_variant = desired.get(&union.discriminator);
            if d_variant == remote.get(&union.discriminator) {
                if let Some(schema) = d_variant.as_str().and_then(|v| union.resolve(v)) {
                    return merge_applied(&schema, desired, remote);
                }
            }
            desired.clone()
        }
        (AttrType::List(element), Value::List(d), Value::List(r)) if d.len() == r.len() => {
            Value::List(d.iter().zip(r).map(|(a, b)| merge_node(element, a, b)).collect())
        }
        (AttrType::Set { element, key_fields }, Value::Set(d), Value::Set(r) | Value::List(r)) => {
            let hasher = ContentHasher::new();
            let mut used = vec![false; r.len()];
            let merged = d
                .iter()
                .map(|item| {
                    let key = hasher.element_key(element, key_fields, item);
                    let found = r
                        .iter()
                        .enumerate()
                        .find(|(i, cand)| !used[*i] && hasher.element_key(element, key_fields, cand) == key);
                    match found {
                        Some((i, cand)) => {
                            used[i] = true;
                            merge_node(element, item, cand)
                        }
                        None => item.clone(),
                    }
                })
                .collect();
            Value::Set(merged)
        }
        _ if desired.contains_unknown() => remote.clone(),
        _ => desired.clone(),
    }
}
