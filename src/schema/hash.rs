//! Canonical hashing of attribute trees.
//!
//! Content keys identify unordered-set elements across desired and prior
//! trees; fingerprints detect changes to a whole workspace. Both are
//! order-insensitive for sets and ignore `Null` object fields, matching
//! [`Value`] equality.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::types::{AttrType, Mutability, ObjectSchema};
use super::value::{NUMBER_TOLERANCE, Value};

/// Hasher for attribute trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHasher {
    /// Creates a new content hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the identity of a set element of type `ty`.
    ///
    /// Computed fields are stripped first so that a configured element and
    /// its server-echoed counterpart share a key.
    #[must_use]
    pub fn content_key(&self, ty: &AttrType, value: &Value) -> String {
        self.fingerprint(&strip_computed(ty, value))
    }

    /// Identity of a set element: the declared key fields when present,
    /// otherwise the content key.
    #[must_use]
    pub fn element_key(&self, element: &AttrType, key_fields: &[String], value: &Value) -> String {
        if key_fields.is_empty() {
            return self.content_key(element, value);
        }
        let mut hasher = Sha256::new();
        for field in key_fields {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            feed(&mut hasher, value.get(field));
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an entire tree.
    #[must_use]
    pub fn fingerprint(&self, value: &Value) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, value);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// A deterministic fraction in `[0, 1)` derived from `seed` and `attempt`.
    ///
    /// Used as retry jitter so that concurrent instances spread their retries
    /// without a random source.
    #[must_use]
    pub fn jitter(&self, seed: &str, attempt: u32) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(attempt.to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        #[allow(clippy::cast_precision_loss)]
        let fraction = (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64;
        fraction
    }
}

/// Removes `ComputedOnly` fields, recursively, from a tree of type `ty`.
#[must_use]
pub fn strip_computed(ty: &AttrType, value: &Value) -> Value {
    match (ty, value) {
        (AttrType::Object(schema), Value::Object(_)) => strip_object(schema, value),
        (AttrType::Union(union), Value::Object(_)) => {
            match value.get(&union.discriminator).as_str().and_then(|v| union.resolve(v)) {
                Some(schema) => strip_object(&schema, value),
                None => value.clone(),
            }
        }
        (AttrType::List(element), Value::List(items)) => {
            Value::List(items.iter().map(|item| strip_computed(element, item)).collect())
        }
        (AttrType::Set { element, .. }, Value::Set(items) | Value::List(items)) => {
            Value::Set(items.iter().map(|item| strip_computed(element, item)).collect())
        }
        _ => value.clone(),
    }
}

fn strip_object(schema: &ObjectSchema, value: &Value) -> Value {
    let Some(fields) = value.as_object() else {
        return value.clone();
    };
    let kept: BTreeMap<String, Value> = fields
        .iter()
        .filter_map(|(name, child)| match schema.get(name) {
            Some(attr) if attr.mutability == Mutability::ComputedOnly => None,
            Some(attr) => Some((name.clone(), strip_computed(&attr.ty, child))),
            None => Some((name.clone(), child.clone())),
        })
        .collect();
    Value::Object(kept)
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n;"),
        Value::Unknown => hasher.update(b"u;"),
        Value::Bool(b) => hasher.update(if *b { b"b1;" } else { b"b0;" }),
        Value::Number(n) => {
            hasher.update(b"d");
            hasher.update(canonical_number(*n).as_bytes());
            hasher.update(b";");
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::List(items) => {
            hasher.update(b"l");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed(hasher, item);
            }
        }
        Value::Set(items) => {
            // Sorted element digests make the hash order-insensitive.
            let mut digests: Vec<String> = items
                .iter()
                .map(|item| {
                    let mut inner = Sha256::new();
                    feed(&mut inner, item);
                    hex::encode(inner.finalize())
                })
                .collect();
            digests.sort_unstable();
            hasher.update(b"t");
            hasher.update((digests.len() as u64).to_be_bytes());
            for digest in digests {
                hasher.update(digest.as_bytes());
            }
        }
        Value::Object(fields) => {
            hasher.update(b"o");
            for (name, child) in fields.iter().filter(|(_, v)| !v.is_null()) {
                hasher.update((name.len() as u64).to_be_bytes());
                hasher.update(name.as_bytes());
                feed(hasher, child);
            }
            hasher.update(b";");
        }
    }
}

/// Snaps `n` to a grid of [`NUMBER_TOLERANCE`] relative to its decade, so
/// float noise does not split keys. Two numbers within tolerance that fall
/// on opposite sides of a grid line still hash apart.
#[allow(clippy::cast_possible_truncation)]
fn canonical_number(n: f64) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    let exponent = if n.abs() < 1.0 { 0 } else { n.abs().log10().floor() as i32 };
    let quantum = NUMBER_TOLERANCE * 10_f64.powi(exponent);
    // Adding zero folds -0 into 0.
    let steps = (n / quantum).round() + 0.0;
    format!("{steps:.0}e{exponent}")
}
