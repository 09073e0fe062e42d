//! Cross-instance references.
//!
//! A string value of exactly `${kind.name.attribute}` refers to an attribute
//! of another configured instance, e.g. `${label.prod.id}`. The attribute
//! may be a dotted path into nested objects.

use std::fmt;

use crate::kinds::ResourceKind;
use crate::schema::Value;

use super::plan::Address;

/// A parsed `${kind.name.attribute}` reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    /// Referenced instance.
    pub target: Address,
    /// Attribute path inside the target, split on dots.
    pub attribute: Vec<String>,
}

impl Reference {
    /// Parses a whole-string reference. Anything else is a plain string.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix("${")?.strip_suffix('}')?;
        let mut parts = inner.split('.');
        let kind = parts.next()?.parse::<ResourceKind>().ok()?;
        let name = parts.next().filter(|n| !n.is_empty())?;
        let attribute: Vec<String> = parts.map(ToString::to_string).collect();
        if attribute.is_empty() || attribute.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            target: Address::new(kind, name),
            attribute,
        })
    }

    /// The top-level attribute name.
    #[must_use]
    pub fn top_level(&self) -> &str {
        self.attribute.first().map_or("", String::as_str)
    }

    /// Looks the attribute up in the target's tree.
    #[must_use]
    pub fn lookup(&self, tree: &Value) -> Value {
        let mut node = tree;
        for step in &self.attribute {
            node = node.get(step);
        }
        node.clone()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute.join("."))
    }
}

/// Collects every reference in `value`, sorted and deduplicated.
#[must_use]
pub fn collect(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk(value, &mut found);
    found.sort();
    found.dedup();
    found
}

fn walk(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => found.extend(Reference::parse(s)),
        Value::List(items) | Value::Set(items) => items.iter().for_each(|item| walk(item, found)),
        Value::Object(fields) => fields.values().for_each(|v| walk(v, found)),
        _ => {}
    }
}

/// Replaces every reference in `value` with what `resolve` returns for it.
pub fn substitute<F>(value: &Value, resolve: &F) -> Value
where
    F: Fn(&Reference) -> Value,
{
    match value {
        Value::String(s) => Reference::parse(s).map_or_else(|| value.clone(), |r| resolve(&r)),
        Value::List(items) => Value::List(items.iter().map(|item| substitute(item, resolve)).collect()),
        Value::Set(items) => Value::Set(items.iter().map(|item| substitute(item, resolve)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, resolve)))
                .collect(),
        ),
        _ => value.clone(),
    }
}
