//! Configuration validation against a schema.
//!
//! Validation walks the whole tree and collects every violation; it never
//! stops at the first one. Unknown values are skipped, since they are
//! checked again once resolved.

use std::collections::HashSet;
use std::fmt;

use super::path::AttrPath;
use super::types::{AttrType, Attribute, Constraint, Mutability, ObjectRule, ObjectSchema, Presence, UnionSchema};
use super::value::Value;

/// Category of a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A value has the wrong shape.
    TypeMismatch,
    /// A required field is absent.
    MissingRequiredField,
    /// A union discriminator names no known variant.
    UnknownVariant,
    /// Fields of more than one union variant are populated.
    ConflictingVariant,
    /// A field the schema does not declare.
    UnknownField,
    /// A computed field was set in configuration.
    ComputedOnly,
    /// A constraint or cross-field rule failed.
    ConstraintFailed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TypeMismatch => "type mismatch",
            Self::MissingRequiredField => "missing required field",
            Self::UnknownVariant => "unknown variant",
            Self::ConflictingVariant => "conflicting variant",
            Self::UnknownField => "unknown field",
            Self::ComputedOnly => "computed-only field",
            Self::ConstraintFailed => "constraint failed",
        };
        write!(f, "{s}")
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Location of the offending node.
    pub path: AttrPath,
    /// Category.
    pub kind: ViolationKind,
    /// What the schema expects.
    pub expected: String,
    /// What was found.
    pub actual: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (expected {}, got {})",
            self.path, self.kind, self.expected, self.actual
        )
    }
}

struct Collector {
    violations: Vec<SchemaViolation>,
}

impl Collector {
    fn push(&mut self, path: AttrPath, kind: ViolationKind, expected: impl Into<String>, actual: impl Into<String>) {
        self.violations.push(SchemaViolation {
            path,
            kind,
            expected: expected.into(),
            actual: actual.into(),
        });
    }
}

/// Validates a configuration tree against an object schema.
#[must_use]
pub fn validate(schema: &ObjectSchema, value: &Value) -> Vec<SchemaViolation> {
    let mut out = Collector { violations: Vec::new() };
    let root = AttrPath::root();
    match value {
        Value::Object(_) => validate_object(schema, value, &root, &mut out),
        Value::Unknown => {}
        other => out.push(root, ViolationKind::TypeMismatch, "object", other.type_name()),
    }
    out.violations
}

fn validate_object(schema: &ObjectSchema, value: &Value, path: &AttrPath, out: &mut Collector) {
    if let Some(fields) = value.as_object() {
        for (name, child) in fields {
            if !schema.fields.contains_key(name) && !child.is_null() {
                out.push(path.field(name), ViolationKind::UnknownField, "no such field", child.type_name());
            }
        }
    }

    for (name, attr) in &schema.fields {
        let child = value.get(name);
        let child_path = path.field(name);
        if child.is_unknown() {
            continue;
        }
        if attr.mutability == Mutability::ComputedOnly {
            if !child.is_null() {
                out.push(child_path, ViolationKind::ComputedOnly, "unset", child.type_name());
            }
            continue;
        }
        if child.is_null() {
            if attr.presence == Presence::Required && attr.default.is_none() {
                out.push(child_path, ViolationKind::MissingRequiredField, attr.ty.name(), "null");
            }
            continue;
        }
        if validate_value(&attr.ty, child, &child_path, out) {
            check_constraints(attr, child, &child_path, out);
        }
    }

    for rule in &schema.rules {
        check_rule(rule, value, path, out);
    }
}

/// Returns true when the value has the expected shape.
fn validate_value(ty: &AttrType, value: &Value, path: &AttrPath, out: &mut Collector) -> bool {
    match (ty, value) {
        (_, Value::Unknown)
        | (AttrType::String, Value::String(_))
        | (AttrType::Number, Value::Number(_))
        | (AttrType::Bool, Value::Bool(_)) => true,
        (AttrType::List(element), Value::List(items))
        | (AttrType::Set { element, .. }, Value::List(items) | Value::Set(items)) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = path.index(i);
                if item.is_null() {
                    out.push(item_path, ViolationKind::TypeMismatch, element.name(), "null");
                } else {
                    validate_value(element, item, &item_path, out);
                }
            }
            true
        }
        (AttrType::Object(schema), Value::Object(_)) => {
            validate_object(schema, value, path, out);
            true
        }
        (AttrType::Union(union), Value::Object(_)) => {
            validate_union(union, value, path, out);
            true
        }
        _ => {
            out.push(path.clone(), ViolationKind::TypeMismatch, ty.name(), value.type_name());
            false
        }
    }
}

fn validate_union(union: &UnionSchema, value: &Value, path: &AttrPath, out: &mut Collector) {
    let disc_path = path.field(&union.discriminator);
    let variant = match value.get(&union.discriminator) {
        Value::Unknown => return,
        Value::Null => {
            out.push(
                disc_path,
                ViolationKind::MissingRequiredField,
                format!("one of [{}]", union.variant_names().join(", ")),
                "null",
            );
            return;
        }
        Value::String(s) => s.clone(),
        other => {
            out.push(disc_path, ViolationKind::TypeMismatch, "string", other.type_name());
            return;
        }
    };

    let Some(schema) = union.resolve(&variant) else {
        out.push(
            disc_path,
            ViolationKind::UnknownVariant,
            format!("one of [{}]", union.variant_names().join(", ")),
            variant,
        );
        return;
    };

    // Fields owned by other variants are reported once per variant and
    // removed before the selected variant is checked.
    let mut conflicting: Vec<&str> = Vec::new();
    let mut foreign: HashSet<&str> = HashSet::new();
    if let Some(fields) = value.as_object() {
        for (name, child) in fields {
            if child.is_null() {
                continue;
            }
            let owners = union.owners_of(name, &variant);
            if !owners.is_empty() {
                foreign.insert(name.as_str());
            }
            for owner in owners {
                if !conflicting.contains(&owner) {
                    conflicting.push(owner);
                }
            }
        }
    }
    conflicting.sort_unstable();
    for other in &conflicting {
        out.push(path.clone(), ViolationKind::ConflictingVariant, variant.clone(), (*other).to_string());
    }

    let trimmed = match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(name, _)| !foreign.contains(name.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    validate_object(&schema, &trimmed, path, out);
}

fn check_constraints(attr: &Attribute, value: &Value, path: &AttrPath, out: &mut Collector) {
    for constraint in &attr.constraints {
        match constraint {
            Constraint::OneOf(options) => {
                if let Some(s) = value.as_str() {
                    if !options.iter().any(|o| o == s) {
                        out.push(
                            path.clone(),
                            ViolationKind::ConstraintFailed,
                            format!("one of [{}]", options.join(", ")),
                            s,
                        );
                    }
                }
            }
            Constraint::Range { min, max } => {
                if let Some(n) = value.as_f64() {
                    let below = min.is_some_and(|m| n < m);
                    let above = max.is_some_and(|m| n > m);
                    if below || above {
                        out.push(
                            path.clone(),
                            ViolationKind::ConstraintFailed,
                            describe_range(*min, *max),
                            n.to_string(),
                        );
                    }
                }
            }
            Constraint::NonEmpty => {
                if value.is_empty() {
                    out.push(path.clone(), ViolationKind::ConstraintFailed, "non-empty", "empty");
                }
            }
            Constraint::UniqueBy(field) => {
                if let Some(items) = value.as_items() {
                    check_unique(items, field.as_deref(), path, out);
                }
            }
        }
    }
}

fn describe_range(min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!("between {lo} and {hi}"),
        (Some(lo), None) => format!(">= {lo}"),
        (None, Some(hi)) => format!("<= {hi}"),
        (None, None) => String::from("any number"),
    }
}

fn check_unique(items: &[Value], field: Option<&str>, path: &AttrPath, out: &mut Collector) {
    let mut seen: Vec<&Value> = Vec::new();
    for item in items {
        let key = field.map_or(item, |f| item.get(f));
        if key.is_unknown() || key.is_null() {
            continue;
        }
        if seen.iter().any(|s| *s == key) {
            let expected = field.map_or_else(|| String::from("unique elements"), |f| format!("unique {f}"));
            out.push(path.clone(), ViolationKind::ConstraintFailed, expected, format!("duplicate {key}"));
        } else {
            seen.push(key);
        }
    }
}

fn check_rule(rule: &ObjectRule, value: &Value, path: &AttrPath, out: &mut Collector) {
    match rule {
        ObjectRule::RequiredWhen {
            field,
            when_field,
            equals,
        } => {
            let field_value = value.get(field);
            if value.get(when_field).as_str() == Some(equals.as_str())
                && !field_value.is_unknown()
                && field_value.is_empty()
            {
                out.push(
                    path.field(field),
                    ViolationKind::MissingRequiredField,
                    format!("non-empty when {when_field} is \"{equals}\""),
                    if field_value.is_null() { "null" } else { "empty" },
                );
            }
        }
        ObjectRule::AllowedValuesWhen {
            field,
            when_field,
            when_values,
            allowed,
        } => {
            let Some(trigger) = value.get(when_field).as_str() else {
                return;
            };
            let Some(actual) = value.get(field).as_str() else {
                return;
            };
            if when_values.iter().any(|w| w == trigger) && !allowed.iter().any(|a| a == actual) {
                out.push(
                    path.field(field),
                    ViolationKind::ConstraintFailed,
                    format!("one of [{}] when {when_field} is \"{trigger}\"", allowed.join(", ")),
                    actual,
                );
            }
        }
        ObjectRule::ExactlyOneOf(fields) => {
            let set: Vec<&str> = fields
                .iter()
                .filter(|f| !value.get(f).is_null())
                .map(String::as_str)
                .collect();
            if set.len() != 1 {
                out.push(
                    path.clone(),
                    ViolationKind::ConstraintFailed,
                    format!("exactly one of [{}]", fields.join(", ")),
                    if set.is_empty() {
                        String::from("none set")
                    } else {
                        format!("[{}] set", set.join(", "))
                    },
                );
            }
        }
        ObjectRule::RequiredWith { field, with } => {
            if !value.get(with).is_null() && value.get(field).is_null() {
                out.push(
                    path.field(field),
                    ViolationKind::MissingRequiredField,
                    format!("set when {with} is set"),
                    "null",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric() -> AttrType {
        AttrType::Union(
            UnionSchema::new("type")
                .variant(
                    "basic",
                    ObjectSchema::new()
                        .field("value", Attribute::required(AttrType::String).one_of(&["cost", "usage"])),
                )
                .variant(
                    "custom",
                    ObjectSchema::new().field("custom_metric_id", Attribute::required(AttrType::String)),
                )
                .variant(
                    "extended",
                    ObjectSchema::new().field("extended_metric", Attribute::required(AttrType::String)),
                ),
        )
    }

    fn schema() -> ObjectSchema {
        ObjectSchema::new()
            .field("id", Attribute::computed(AttrType::String))
            .field("name", Attribute::required(AttrType::String))
            .field("amount", Attribute::optional(AttrType::Number).range(Some(0.0), None))
            .field("metric", Attribute::optional(metric()))
            .field(
                "thresholds",
                Attribute::optional(AttrType::set(AttrType::Number))
                    .unique_by(None),
            )
            .field("type", Attribute::optional(AttrType::String))
            .field("values", Attribute::optional(AttrType::list(AttrType::String)))
            .rule(ObjectRule::required_when("values", "type", "fixed"))
    }

    fn kinds(violations: &[SchemaViolation]) -> Vec<ViolationKind> {
        violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_valid_config() {
        let v = Value::object([
            ("name", Value::from("main")),
            ("amount", Value::from(100.0)),
            (
                "metric",
                Value::object([("type", Value::from("basic")), ("value", Value::from("cost"))]),
            ),
        ]);
        assert!(validate(&schema(), &v).is_empty());
    }

    #[test]
    fn test_collects_all_violations() {
        let v = Value::object([
            ("id", Value::from("abc")),
            ("amount", Value::from(-1.0)),
            ("bogus", Value::from(true)),
        ]);
        let found = kinds(&validate(&schema(), &v));
        assert!(found.contains(&ViolationKind::ComputedOnly));
        assert!(found.contains(&ViolationKind::MissingRequiredField));
        assert!(found.contains(&ViolationKind::ConstraintFailed));
        assert!(found.contains(&ViolationKind::UnknownField));
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn test_union_exclusivity() {
        let v = Value::object([
            ("name", Value::from("main")),
            (
                "metric",
                Value::object([
                    ("type", Value::from("basic")),
                    ("value", Value::from("cost")),
                    ("custom_metric_id", Value::from("m-1")),
                ]),
            ),
        ]);
        let violations = validate(&schema(), &v);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ConflictingVariant);
        assert_eq!(violations[0].actual, "custom");
        assert_eq!(violations[0].path.to_string(), "metric");
    }

    #[test]
    fn test_union_unknown_and_missing_discriminator() {
        let v = Value::object([
            ("name", Value::from("main")),
            ("metric", Value::object([("type", Value::from("weird"))])),
        ]);
        assert_eq!(kinds(&validate(&schema(), &v)), vec![ViolationKind::UnknownVariant]);

        let v = Value::object([
            ("name", Value::from("main")),
            ("metric", Value::object([("value", Value::from("cost"))])),
        ]);
        let violations = validate(&schema(), &v);
        assert_eq!(kinds(&violations), vec![ViolationKind::MissingRequiredField]);
        assert_eq!(violations[0].path.to_string(), "metric.type");
    }

    #[test]
    fn test_type_mismatch() {
        let v = Value::object([("name", Value::from(5.0))]);
        let violations = validate(&schema(), &v);
        assert_eq!(kinds(&violations), vec![ViolationKind::TypeMismatch]);
        assert_eq!(violations[0].expected, "string");
        assert_eq!(violations[0].actual, "number");
    }

    #[test]
    fn test_duplicate_set_elements_rejected() {
        let v = Value::object([
            ("name", Value::from("main")),
            (
                "thresholds",
                Value::Set(vec![Value::from(50.0), Value::from(90.0), Value::from(50.0)]),
            ),
        ]);
        assert_eq!(kinds(&validate(&schema(), &v)), vec![ViolationKind::ConstraintFailed]);
    }

    #[test]
    fn test_fixed_requires_values() {
        let v = Value::object([("name", Value::from("main")), ("type", Value::from("fixed"))]);
        let violations = validate(&schema(), &v);
        assert_eq!(kinds(&violations), vec![ViolationKind::MissingRequiredField]);
        assert_eq!(violations[0].path.to_string(), "values");

        let v = Value::object([
            ("name", Value::from("main")),
            ("type", Value::from("fixed")),
            ("values", Value::List(vec![])),
        ]);
        assert_eq!(validate(&schema(), &v).len(), 1);
    }

    #[test]
    fn test_unknown_values_skipped() {
        let v = Value::object([("name", Value::Unknown), ("amount", Value::Unknown)]);
        assert!(validate(&schema(), &v).is_empty());
    }
}
