//! Diff engine for comparing desired vs prior attribute trees.
//!
//! This module walks two trees of the same schema field by field and
//! reports every differing attribute path. Lists align by position, sets
//! by element identity, unions by discriminator.

use std::fmt;

use tracing::trace;

use crate::error::PlanError;
use crate::schema::{AttrPath, AttrType, ContentHasher, Mutability, ObjectSchema, UnionSchema, Value};

/// Engine for computing attribute-level diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Hasher used to identify set elements.
    hasher: ContentHasher,
}

/// Kind of change at one attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    /// Present only in desired.
    Added,
    /// Present only in prior.
    Removed,
    /// Present in both with different values.
    Modified,
    /// Desired value is not known until apply.
    Unknown,
}

/// A difference at one attribute path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttributeChange {
    /// Path of the changed attribute.
    pub path: AttrPath,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Whether the change touches an immutable attribute.
    pub requires_replace: bool,
}

struct Walk<'a> {
    hasher: &'a ContentHasher,
    changes: Vec<AttributeChange>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ContentHasher::new(),
        }
    }

    /// Computes the changes needed to turn `prior` into `desired`.
    ///
    /// Computed fields never produce changes. Fields the remote system fills
    /// in are ignored while desired leaves them unset. The result is sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Malformed`] if either tree disagrees with the schema.
    pub fn diff(&self, schema: &ObjectSchema, desired: &Value, prior: &Value) -> Result<Vec<AttributeChange>, PlanError> {
        let mut walk = Walk {
            hasher: &self.hasher,
            changes: Vec::new(),
        };
        walk.object(schema, desired, prior, &AttrPath::root(), false)?;
        walk.changes.sort();
        trace!("diff produced {} changes", walk.changes.len());
        Ok(walk.changes)
    }
}

impl Walk<'_> {
    fn push(&mut self, path: AttrPath, kind: ChangeKind, immutable: bool) {
        self.changes.push(AttributeChange {
            path,
            kind,
            requires_replace: immutable,
        });
    }

    fn object(
        &mut self,
        schema: &ObjectSchema,
        desired: &Value,
        prior: &Value,
        path: &AttrPath,
        immutable: bool,
    ) -> Result<(), PlanError> {
        for (side, value) in [("desired", desired), ("prior", prior)] {
            if !matches!(value, Value::Object(_) | Value::Null) {
                return Err(PlanError::malformed(
                    path,
                    format!("{side} is {}, expected object", value.type_name()),
                ));
            }
        }

        for (name, attr) in &schema.fields {
            if attr.mutability == Mutability::ComputedOnly {
                continue;
            }
            let d = desired.get(name);
            if d.is_null() && attr.fills_when_absent {
                continue;
            }
            let field_immutable = immutable || attr.mutability == Mutability::Immutable;
            self.node(&attr.ty, d, prior.get(name), &path.field(name), field_immutable)?;
        }
        Ok(())
    }

    fn node(&mut self, ty: &AttrType, desired: &Value, prior: &Value, path: &AttrPath, immutable: bool) -> Result<(), PlanError> {
        if desired.is_unknown() {
            self.push(path.clone(), ChangeKind::Unknown, immutable);
            return Ok(());
        }
        match (desired.is_null(), prior.is_null()) {
            (true, true) => return Ok(()),
            (false, true) => {
                self.push(path.clone(), ChangeKind::Added, immutable);
                return Ok(());
            }
            (true, false) => {
                self.push(path.clone(), ChangeKind::Removed, immutable);
                return Ok(());
            }
            (false, false) => {}
        }

        match ty {
            AttrType::String | AttrType::Number | AttrType::Bool => {
                check_scalar(ty, desired, path)?;
                check_scalar(ty, prior, path)?;
                if desired != prior {
                    self.push(path.clone(), ChangeKind::Modified, immutable);
                }
                Ok(())
            }
            AttrType::List(element) => {
                let (d, p) = items_of(desired, prior, path)?;
                for i in 0..d.len().max(p.len()) {
                    let item_path = path.index(i);
                    match (d.get(i), p.get(i)) {
                        (Some(a), Some(b)) => self.node(element, a, b, &item_path, immutable)?,
                        (Some(_), None) => self.push(item_path, ChangeKind::Added, immutable),
                        (None, Some(_)) => self.push(item_path, ChangeKind::Removed, immutable),
                        (None, None) => {}
                    }
                }
                Ok(())
            }
            AttrType::Set { element, key_fields } => {
                let (d, p) = items_of(desired, prior, path)?;
                self.set(element, key_fields, d, p, path, immutable)
            }
            AttrType::Object(schema) => self.object(schema, desired, prior, path, immutable),
            AttrType::Union(union) => self.union(union, desired, prior, path, immutable),
        }
    }

    fn set(
        &mut self,
        element: &AttrType,
        key_fields: &[String],
        desired: &[Value],
        prior: &[Value],
        path: &AttrPath,
        immutable: bool,
    ) -> Result<(), PlanError> {
        let prior_keys: Vec<String> = prior
            .iter()
            .map(|item| self.hasher.element_key(element, key_fields, item))
            .collect();
        let mut matched = vec![false; prior.len()];

        for item in desired {
            let key = self.hasher.element_key(element, key_fields, item);
            let short = self.hasher.short_hash(&key);
            let partner = prior_keys
                .iter()
                .enumerate()
                .position(|(i, k)| !matched[i] && *k == key);
            match partner {
                Some(i) => {
                    matched[i] = true;
                    self.node(element, item, &prior[i], &path.key(&short), immutable)?;
                }
                None => self.push(path.key(&short), ChangeKind::Added, immutable),
            }
        }

        for (i, key) in prior_keys.iter().enumerate() {
            if !matched[i] {
                self.push(path.key(&self.hasher.short_hash(key)), ChangeKind::Removed, immutable);
            }
        }
        Ok(())
    }

    fn union(
        &mut self,
        union: &UnionSchema,
        desired: &Value,
        prior: &Value,
        path: &AttrPath,
        immutable: bool,
    ) -> Result<(), PlanError> {
        let d_variant = desired.get(&union.discriminator);
        let p_variant = prior.get(&union.discriminator);
        if d_variant.is_unknown() {
            self.push(path.clone(), ChangeKind::Unknown, immutable);
            return Ok(());
        }
        if d_variant != p_variant {
            self.push(path.clone(), ChangeKind::Modified, immutable);
            return Ok(());
        }
        let Some(name) = d_variant.as_str() else {
            return Err(PlanError::malformed(path, "union without a variant name"));
        };
        let schema = union
            .resolve(name)
            .ok_or_else(|| PlanError::malformed(path, format!("unknown variant \"{name}\"")))?;
        self.object(&schema, desired, prior, path, immutable)
    }
}

fn check_scalar(ty: &AttrType, value: &Value, path: &AttrPath) -> Result<(), PlanError> {
    let ok = matches!(
        (ty, value),
        (AttrType::String, Value::String(_)) | (AttrType::Number, Value::Number(_)) | (AttrType::Bool, Value::Bool(_))
    );
    if ok {
        Ok(())
    } else {
        Err(PlanError::malformed(
            path,
            format!("expected {}, found {}", ty.name(), value.type_name()),
        ))
    }
}

fn items_of<'v>(desired: &'v Value, prior: &'v Value, path: &AttrPath) -> Result<(&'v [Value], &'v [Value]), PlanError> {
    let d = desired
        .as_items()
        .ok_or_else(|| PlanError::malformed(path, format!("desired is {}, expected collection", desired.type_name())))?;
    let p = prior
        .as_items()
        .ok_or_else(|| PlanError::malformed(path, format!("prior is {}, expected collection", prior.type_name())))?;
    Ok((d, p))
}

/// Returns true if any change forces replacement.
#[must_use]
pub fn requires_replace(changes: &[AttributeChange]) -> bool {
    changes.iter().any(|c| c.requires_replace)
}

/// Top-level attribute names touched by the changes, sorted and deduplicated.
#[must_use]
pub fn changed_fields(changes: &[AttributeChange]) -> Vec<String> {
    let mut fields: Vec<String> = changes
        .iter()
        .filter_map(|c| c.path.top_level().map(ToString::to_string))
        .collect();
    fields.dedup();
    fields
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "+",
            Self::Removed => "-",
            Self::Modified => "~",
            Self::Unknown => "?",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path)?;
        if self.requires_replace {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::ResourceKind;

    fn budget() -> Value {
        Value::object([
            ("name", Value::from("main")),
            ("description", Value::from("team budget")),
            ("type", Value::from("recurring")),
            ("start_period", Value::from(1_735_689_600_000_i64)),
            ("time_interval", Value::from("month")),
            ("amount", Value::from(1000.0)),
            ("currency", Value::from("USD")),
            (
                "alerts",
                Value::Set(vec![
                    Value::object([("percentage", Value::from(50.0))]),
                    Value::object([("percentage", Value::from(90.0))]),
                ]),
            ),
        ])
    }

    fn component(key: &str, values: &[&str]) -> Value {
        Value::object([
            ("key", Value::from(key)),
            ("type", Value::from("fixed")),
            ("mode", Value::from("is")),
            ("values", Value::string_list(values.iter().copied())),
        ])
    }

    fn allocation(components: Vec<Value>) -> Value {
        Value::object([
            ("name", Value::from("eng")),
            ("rule", Value::object([("components", Value::Set(components))])),
        ])
    }

    #[test]
    fn test_identical_trees_have_no_changes() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        assert!(engine.diff(&schema, &budget(), &budget()).expect("diffs").is_empty());
    }

    #[test]
    fn test_mutable_change() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut desired = budget();
        desired.set("description", Value::from("renamed"));
        let changes = engine.diff(&schema, &desired, &budget()).expect("diffs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.to_string(), "description");
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert!(!requires_replace(&changes));
    }

    #[test]
    fn test_immutable_change_requires_replace() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut desired = budget();
        desired.set("type", Value::from("fixed"));
        let changes = engine.diff(&schema, &desired, &budget()).expect("diffs");
        assert!(requires_replace(&changes));
        assert_eq!(changed_fields(&changes), vec![String::from("type")]);
    }

    #[test]
    fn test_computed_fields_ignored() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut prior = budget();
        prior.set("id", Value::from("b-1"));
        prior.set("current_utilization", Value::from(0.42));
        prior.set("recipients", Value::string_set(["owner@example.com"]));
        assert!(engine.diff(&schema, &budget(), &prior).expect("diffs").is_empty());
    }

    #[test]
    fn test_set_reorder_is_no_change() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Allocation.schema();
        let a = allocation(vec![component("project_id", &["p-1"]), component("service", &["gce"])]);
        let b = allocation(vec![component("service", &["gce"]), component("project_id", &["p-1"])]);
        assert!(engine.diff(&schema, &a, &b).expect("diffs").is_empty());
    }

    #[test]
    fn test_set_element_change() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Allocation.schema();
        let prior = allocation(vec![component("project_id", &["p-1"]), component("service", &["gce"])]);
        let desired = allocation(vec![component("service", &["gce"]), component("project_id", &["p-2"])]);
        let changes = engine.diff(&schema, &desired, &prior).expect("diffs");
        let mut kinds: Vec<_> = changes.iter().map(|c| c.kind).collect();
        kinds.sort();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Removed]);
        assert_eq!(changed_fields(&changes), vec![String::from("rule")]);
    }

    #[test]
    fn test_keyed_set_recurses_into_matched_elements() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut prior = budget();
        prior.set(
            "alerts",
            Value::Set(vec![
                Value::object([("percentage", Value::from(90.0)), ("triggered", Value::from(true))]),
                Value::object([("percentage", Value::from(50.0)), ("triggered", Value::from(false))]),
            ]),
        );
        assert!(engine.diff(&schema, &budget(), &prior).expect("diffs").is_empty());
    }

    #[test]
    fn test_list_order_matters() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Report.schema();
        let dim = |id: &str| Value::object([("id", Value::from(id)), ("type", Value::from("fixed"))]);
        let a = Value::object([
            ("name", Value::from("r")),
            ("config", Value::object([("dimensions", Value::List(vec![dim("a"), dim("b")]))])),
        ]);
        let b = Value::object([
            ("name", Value::from("r")),
            ("config", Value::object([("dimensions", Value::List(vec![dim("b"), dim("a")]))])),
        ]);
        let changes = engine.diff(&schema, &a, &b).expect("diffs");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path.to_string(), "config.dimensions[0].id");
    }

    #[test]
    fn test_unknown_is_a_change() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut desired = budget();
        desired.set("description", Value::Unknown);
        let changes = engine.diff(&schema, &desired, &budget()).expect("diffs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Unknown);
    }

    #[test]
    fn test_variant_switch_is_whole_node() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut prior = budget();
        prior.set(
            "metric",
            Value::object([("type", Value::from("basic")), ("value", Value::from("cost"))]),
        );
        let mut desired = budget();
        desired.set(
            "metric",
            Value::object([("type", Value::from("custom")), ("custom_metric_id", Value::from("m-1"))]),
        );
        let changes = engine.diff(&schema, &desired, &prior).expect("diffs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.to_string(), "metric");
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_malformed_tree() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut desired = budget();
        desired.set("amount", Value::from("a lot"));
        let err = engine.diff(&schema, &desired, &budget()).expect_err("malformed");
        assert!(matches!(err, PlanError::Malformed { .. }));
    }

    #[test]
    fn test_deterministic() {
        let engine = DiffEngine::new();
        let schema = ResourceKind::Budget.schema();
        let mut desired = budget();
        desired.set("description", Value::from("x"));
        desired.set("amount", Value::from(5.0));
        let first = engine.diff(&schema, &desired, &budget()).expect("diffs");
        let second = engine.diff(&schema, &desired, &budget()).expect("diffs");
        assert_eq!(first, second);
    }
}
