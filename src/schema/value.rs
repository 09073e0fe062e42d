//! The attribute tree.
//!
//! A [`Value`] is one node of an instance's configuration or state. Shapes
//! are fixed by the schema; the value itself only records what was supplied.

use std::collections::BTreeMap;
use std::fmt;

/// Relative tolerance used when comparing numbers.
///
/// Two numbers are equal when `|a - b| <= NUMBER_TOLERANCE * max(1, |a|, |b|)`.
pub const NUMBER_TOLERANCE: f64 = 1e-9;

static NULL: Value = Value::Null;

/// A node of an attribute tree.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or explicitly cleared.
    #[default]
    Null,
    /// Not known until another instance has been applied.
    Unknown,
    /// A boolean scalar.
    Bool(bool),
    /// A numeric scalar.
    Number(f64),
    /// A string scalar.
    String(String),
    /// An order-sensitive collection.
    List(Vec<Value>),
    /// An order-insensitive collection.
    Set(Vec<Value>),
    /// Named fields. Missing keys are equivalent to `Null`.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Builds an object from `(name, value)` pairs.
    #[must_use]
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds a list of strings.
    #[must_use]
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Builds a set of strings.
    #[must_use]
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for `Unknown`.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns true if this node or any descendant is `Unknown`.
    #[must_use]
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::List(items) | Self::Set(items) => items.iter().any(Self::contains_unknown),
            Self::Object(fields) => fields.values().any(Self::contains_unknown),
            _ => false,
        }
    }

    /// Returns true for `Null` and for empty strings and collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::List(items) | Self::Set(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Returns the string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the elements of a list or set.
    #[must_use]
    pub fn as_items(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the fields of an object.
    #[must_use]
    pub const fn as_object(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a field of an object. Missing fields and non-objects yield `Null`.
    #[must_use]
    pub fn get(&self, field: &str) -> &Self {
        match self {
            Self::Object(fields) => fields.get(field).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Sets a field on an object. No-op on other variants.
    pub fn set(&mut self, field: impl Into<String>, value: Self) {
        if let Self::Object(fields) = self {
            fields.insert(field.into(), value);
        }
    }

    /// Name of the variant, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unknown => "unknown",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Object(_) => "object",
        }
    }
}

/// Compares two numbers within [`NUMBER_TOLERANCE`].
#[must_use]
pub fn numbers_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= NUMBER_TOLERANCE * scale
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unknown, Self::Unknown) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => multiset_eq(a, b),
            (Self::Object(a), Self::Object(b)) => {
                let null = Self::Null;
                a.iter().all(|(k, v)| b.get(k).unwrap_or(&null) == v)
                    && b.iter().all(|(k, v)| a.get(k).unwrap_or(&null) == v)
            }
            _ => false,
        }
    }
}

/// Order-insensitive comparison of two element slices.
fn multiset_eq(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for item in a {
        for (i, candidate) in b.iter().enumerate() {
            if !used[i] && item == candidate {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) | Self::Set(items) => {
                let open = if matches!(self, Self::Set(_)) { '{' } else { '[' };
                let close = if open == '{' { '}' } else { ']' };
                write!(f, "{open}")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "{close}")
            }
            Self::Object(fields) => {
                write!(f, "{{")?;
                let mut first = true;
                for (k, v) in fields.iter().filter(|(_, v)| !v.is_null()) {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
