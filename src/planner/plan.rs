//! Plan types and construction.
//!
//! This module classifies each instance into an [`Action`] and assembles a
//! workspace [`Plan`]: configured instances in dependency order, then
//! deletions of removed instances in reverse dependency order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, PlanError};
use crate::kinds::ResourceKind;
use crate::schema::{ObjectSchema, Value, apply_defaults};

use super::diff::{AttributeChange, DiffEngine, changed_fields, requires_replace};
use super::references::{self, Reference};

/// The configuration-side key of an instance: `kind.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Instance name, unique per kind.
    pub name: String,
}

impl Address {
    /// Creates an address.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for Address {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| ConfigError::validation(format!("'{s}' is not a kind.name address"), "address"))?;
        Ok(Self::new(kind.parse()?, name))
    }
}

/// What apply will do to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing to do.
    NoOp,
    /// Create a new remote resource.
    Create,
    /// Update the remote resource in place.
    Update,
    /// Delete the remote resource.
    Delete,
    /// Delete the remote resource, then create a new one.
    Replace,
}

impl Action {
    /// Returns true for actions that call the remote API.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Plan symbol for rendering.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Replace => "-/+",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
        };
        write!(f, "{s}")
    }
}

/// One instance joined from configuration and state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstance {
    /// Instance address.
    pub address: Address,
    /// Remote identity, absent before creation.
    pub id: Option<String>,
    /// Desired tree, absent when removed from configuration.
    pub desired: Option<Value>,
    /// Last applied tree, absent for new instances.
    pub prior: Option<Value>,
    /// Dependencies recorded in state, used to order deletions.
    pub recorded_dependencies: Vec<Address>,
}

impl ResourceInstance {
    /// An instance that is only configured.
    #[must_use]
    pub const fn configured(address: Address, desired: Value) -> Self {
        Self {
            address,
            id: None,
            desired: Some(desired),
            prior: None,
            recorded_dependencies: Vec::new(),
        }
    }

    /// Attaches the last applied state.
    #[must_use]
    pub fn with_prior(mut self, id: impl Into<String>, prior: Value) -> Self {
        self.id = Some(id.into());
        self.prior = Some(prior);
        self
    }
}

/// The planned change for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlan {
    /// Instance address.
    pub address: Address,
    /// Remote identity, if known.
    pub id: Option<String>,
    /// Planned action.
    pub action: Action,
    /// Attribute-level changes, sorted by path.
    pub changes: Vec<AttributeChange>,
    /// Whether any change touches an immutable attribute.
    pub requires_replace: bool,
    /// Desired tree with references resolved as far as possible.
    pub desired: Option<Value>,
    /// Desired tree with defaults applied and references unresolved.
    pub raw_desired: Option<Value>,
    /// Last applied tree.
    pub prior: Option<Value>,
    /// Instances this one references.
    pub depends_on: Vec<Address>,
}

impl InstancePlan {
    /// Top-level fields that differ.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        changed_fields(&self.changes)
    }
}

/// Classifies one instance.
///
/// Desired only is Create, prior only is Delete, no changes is `NoOp`,
/// any change to an immutable attribute is Replace, anything else is Update.
///
/// # Errors
///
/// Returns [`PlanError::Malformed`] if a tree disagrees with `schema`.
pub fn plan_instance(schema: &ObjectSchema, instance: ResourceInstance) -> Result<InstancePlan, PlanError> {
    let ResourceInstance {
        address,
        id,
        desired,
        prior,
        recorded_dependencies,
    } = instance;

    let (action, changes) = match (&desired, &prior) {
        (Some(_), None) => (Action::Create, Vec::new()),
        (None, Some(_)) => (Action::Delete, Vec::new()),
        (None, None) => (Action::NoOp, Vec::new()),
        (Some(_), Some(_)) if id.is_none() => (Action::Create, Vec::new()),
        (Some(d), Some(p)) => {
            let changes = DiffEngine::new().diff(schema, d, p)?;
            let action = if changes.is_empty() {
                Action::NoOp
            } else if requires_replace(&changes) {
                Action::Replace
            } else {
                Action::Update
            };
            (action, changes)
        }
    };

    let requires_replace = action == Action::Replace;
    Ok(InstancePlan {
        address,
        id,
        action,
        changes,
        requires_replace,
        raw_desired: desired.clone(),
        desired,
        prior,
        depends_on: recorded_dependencies,
    })
}

/// A complete workspace plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Instance plans in execution order.
    pub instances: Vec<InstancePlan>,
}

impl Plan {
    /// Builds a plan from joined instances.
    ///
    /// `schema_of` supplies each kind's resource schema. Defaults are applied
    /// to desired trees, references are resolved against prior state of the
    /// referenced instance, and instances are ordered so that every instance
    /// follows the instances it references. Removed instances follow, in
    /// reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnresolvedReference`] for references to instances
    /// that are not configured, [`PlanError::DependencyCycle`] for cyclic
    /// references and [`PlanError::Malformed`] for trees that disagree with
    /// their schema.
    pub fn build<F>(instances: Vec<ResourceInstance>, schema_of: F) -> Result<Self, PlanError>
    where
        F: Fn(ResourceKind) -> ObjectSchema,
    {
        let mut configured: BTreeMap<Address, (ResourceInstance, Vec<Reference>)> = BTreeMap::new();
        let mut removed: BTreeMap<Address, ResourceInstance> = BTreeMap::new();

        for mut instance in instances {
            match instance.desired.take() {
                Some(desired) => {
                    let desired = apply_defaults(&schema_of(instance.address.kind), &desired);
                    let refs = references::collect(&desired);
                    instance.desired = Some(desired);
                    configured.insert(instance.address.clone(), (instance, refs));
                }
                None => {
                    removed.insert(instance.address.clone(), instance);
                }
            }
        }

        for (address, (_, refs)) in &configured {
            if let Some(missing) = refs.iter().find(|r| !configured.contains_key(&r.target)) {
                return Err(PlanError::UnresolvedReference {
                    address: address.to_string(),
                    reference: missing.to_string(),
                });
            }
        }

        let edges: BTreeMap<Address, BTreeSet<Address>> = configured
            .iter()
            .map(|(address, (_, refs))| (address.clone(), refs.iter().map(|r| r.target.clone()).collect()))
            .collect();
        let order = topological_order(&edges)?;

        let mut planned: BTreeMap<Address, InstancePlan> = BTreeMap::new();
        let mut ordered = Vec::with_capacity(configured.len() + removed.len());
        for address in order {
            let Some((instance, refs)) = configured.remove(&address) else {
                continue;
            };
            let raw_desired = instance.desired.clone();
            let resolved = instance
                .desired
                .as_ref()
                .map(|d| references::substitute(d, &|r: &Reference| resolve_planned(r, &planned)));
            let depends_on: Vec<Address> = refs
                .iter()
                .map(|r| r.target.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let schema = schema_of(address.kind);
            let mut plan = plan_instance(
                &schema,
                ResourceInstance {
                    desired: resolved,
                    recorded_dependencies: Vec::new(),
                    ..instance
                },
            )?;
            plan.raw_desired = raw_desired;
            plan.depends_on = depends_on;
            debug!("{address}: {}", plan.action);
            planned.insert(address.clone(), plan.clone());
            ordered.push(plan);
        }

        let delete_edges: BTreeMap<Address, BTreeSet<Address>> = removed
            .iter()
            .map(|(address, _)| {
                let dependents = removed
                    .iter()
                    .filter(|(_, other)| other.recorded_dependencies.contains(address))
                    .map(|(other, _)| other.clone())
                    .collect();
                (address.clone(), dependents)
            })
            .collect();
        for address in topological_order(&delete_edges)? {
            if let Some(instance) = removed.remove(&address) {
                let schema = schema_of(address.kind);
                ordered.push(plan_instance(&schema, instance)?);
            }
        }

        Ok(Self {
            created_at: Utc::now(),
            instances: ordered,
        })
    }

    /// Returns true if no instance needs a remote call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.iter().all(|p| !p.action.is_mutation())
    }

    /// Number of instances with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.instances.iter().filter(|p| p.action == action).count()
    }

    /// The plan for one instance.
    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&InstancePlan> {
        self.instances.iter().find(|p| &p.address == address)
    }

    /// Instances that call the remote API.
    pub fn changes(&self) -> impl Iterator<Item = &InstancePlan> {
        self.instances.iter().filter(|p| p.action.is_mutation())
    }
}

/// Plan-time value of a reference.
///
/// The target's prior value is used when the target keeps its identity and
/// the referenced attribute does not change; otherwise the value is only
/// known after apply.
fn resolve_planned(reference: &Reference, planned: &BTreeMap<Address, InstancePlan>) -> Value {
    let Some(target) = planned.get(&reference.target) else {
        return Value::Unknown;
    };
    let Some(prior) = &target.prior else {
        return Value::Unknown;
    };
    let stable = match target.action {
        Action::NoOp => true,
        Action::Update => !target.changed_fields().iter().any(|f| f == reference.top_level()),
        Action::Create | Action::Delete | Action::Replace => false,
    };
    if !stable {
        return Value::Unknown;
    }
    reference.lookup(prior)
}

/// Kahn's algorithm over `node -> prerequisites`, ties broken by address.
fn topological_order(edges: &BTreeMap<Address, BTreeSet<Address>>) -> Result<Vec<Address>, PlanError> {
    let mut remaining: BTreeMap<&Address, usize> = edges
        .iter()
        .map(|(node, deps)| (node, deps.iter().filter(|d| edges.contains_key(*d)).count()))
        .collect();
    let mut ready: BTreeSet<&Address> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(node) = ready.pop_first() {
        remaining.remove(node);
        order.push(node.clone());
        for (other, deps) in edges {
            if deps.contains(node)
                && let Some(count) = remaining.get_mut(other)
            {
                *count -= 1;
                if *count == 0 {
                    ready.insert(other);
                }
            }
        }
    }

    if remaining.is_empty() {
        Ok(order)
    } else {
        let cycle: Vec<String> = remaining.keys().map(ToString::to_string).collect();
        Err(PlanError::DependencyCycle {
            cycle: cycle.join(" -> "),
        })
    }
}

impl fmt::Display for InstancePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action.symbol(), self.address)?;
        if let Some(id) = &self.id {
            write!(f, " ({id})")?;
        }
        if self.action == Action::Replace {
            write!(f, " must be replaced")?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes. Remote resources match the configuration.");
        }

        writeln!(f, "Plan ({} changes):", self.changes().count())?;
        for plan in self.changes() {
            writeln!(f, "  {plan}")?;
            for change in &plan.changes {
                writeln!(f, "      {change}")?;
            }
        }
        write!(
            f,
            "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
            self.count(Action::Create),
            self.count(Action::Update),
            self.count(Action::Replace),
            self.count(Action::Delete)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::merge_applied;

    fn schema_of(kind: ResourceKind) -> ObjectSchema {
        kind.schema()
    }

    fn report_config() -> Value {
        Value::object([
            ("name", Value::from("test-ds-report-1")),
            (
                "config",
                Value::object([
                    ("aggregation", Value::from("total")),
                    ("currency", Value::from("USD")),
                    ("time_interval", Value::from("month")),
                    ("layout", Value::from("table")),
                ]),
            ),
        ])
    }

    fn label(name: &str) -> Value {
        Value::object([("name", Value::from(name)), ("color", Value::from("blue"))])
    }

    fn applied(kind: ResourceKind, desired: &Value, id: &str) -> Value {
        let schema = kind.schema();
        let mut remote = apply_defaults(&schema, desired);
        remote.set("id", Value::from(id));
        merge_applied(&schema, &apply_defaults(&schema, desired), &remote)
    }

    #[test]
    fn test_address_parse() {
        let address: Address = "budget.monthly".parse().expect("parses");
        assert_eq!(address, Address::new(ResourceKind::Budget, "monthly"));
        assert_eq!(address.to_string(), "budget.monthly");
        assert!("budget".parse::<Address>().is_err());
        assert!("widget.x".parse::<Address>().is_err());
    }

    #[test]
    fn test_create_then_noop() {
        let address = Address::new(ResourceKind::Report, "test-ds-report-1");
        let plan = Plan::build(vec![ResourceInstance::configured(address.clone(), report_config())], schema_of)
            .expect("plans");
        assert_eq!(plan.get(&address).map(|p| p.action), Some(Action::Create));

        let prior = applied(ResourceKind::Report, &report_config(), "r-1");
        let again = Plan::build(
            vec![ResourceInstance::configured(address.clone(), report_config()).with_prior("r-1", prior)],
            schema_of,
        )
        .expect("plans");
        assert_eq!(again.get(&address).map(|p| p.action), Some(Action::NoOp));
        assert!(again.is_empty());
    }

    #[test]
    fn test_delete_when_unconfigured() {
        let address = Address::new(ResourceKind::Label, "old");
        let instance = ResourceInstance {
            address: address.clone(),
            id: Some(String::from("l-9")),
            desired: None,
            prior: Some(label("old")),
            recorded_dependencies: Vec::new(),
        };
        let plan = Plan::build(vec![instance], schema_of).expect("plans");
        assert_eq!(plan.count(Action::Delete), 1);
        assert_eq!(plan.get(&address).and_then(|p| p.id.clone()).as_deref(), Some("l-9"));
    }

    #[test]
    fn test_references_order_and_resolve() {
        let annotation = Value::object([
            ("content", Value::from("release")),
            ("timestamp", Value::from("2024-01-01T00:00:00Z")),
            ("labels", Value::string_set(["${label.prod.id}"])),
        ]);
        let plan = Plan::build(
            vec![
                ResourceInstance::configured(Address::new(ResourceKind::Annotation, "release"), annotation.clone()),
                ResourceInstance::configured(Address::new(ResourceKind::Label, "prod"), label("prod")),
            ],
            schema_of,
        )
        .expect("plans");

        let order: Vec<String> = plan.instances.iter().map(|p| p.address.to_string()).collect();
        assert_eq!(order, vec!["label.prod", "annotation.release"]);
        let release = &plan.instances[1];
        assert_eq!(release.depends_on, vec![Address::new(ResourceKind::Label, "prod")]);
        assert_eq!(release.desired.as_ref().map(|d| d.get("labels").clone()), Some(Value::Set(vec![Value::Unknown])));
        assert_eq!(
            release.raw_desired.as_ref().map(|d| d.get("labels").clone()),
            Some(Value::string_set(["${label.prod.id}"]))
        );

        let plan = Plan::build(
            vec![
                ResourceInstance::configured(Address::new(ResourceKind::Annotation, "release"), annotation),
                ResourceInstance::configured(Address::new(ResourceKind::Label, "prod"), label("prod"))
                    .with_prior("l-1", applied(ResourceKind::Label, &label("prod"), "l-1")),
            ],
            schema_of,
        )
        .expect("plans");
        let release = &plan.instances[1];
        assert_eq!(release.desired.as_ref().map(|d| d.get("labels").clone()), Some(Value::string_set(["l-1"])));
    }

    #[test]
    fn test_unresolved_reference() {
        let annotation = Value::object([
            ("content", Value::from("x")),
            ("timestamp", Value::from("2024-01-01T00:00:00Z")),
            ("labels", Value::string_set(["${label.missing.id}"])),
        ]);
        let err = Plan::build(
            vec![ResourceInstance::configured(Address::new(ResourceKind::Annotation, "a"), annotation)],
            schema_of,
        )
        .expect_err("unresolved");
        assert!(matches!(err, PlanError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_cycle_detected() {
        let a = Value::object([("name", Value::from("${label.b.name}"))]);
        let b = Value::object([("name", Value::from("${label.a.name}"))]);
        let err = Plan::build(
            vec![
                ResourceInstance::configured(Address::new(ResourceKind::Label, "a"), a),
                ResourceInstance::configured(Address::new(ResourceKind::Label, "b"), b),
            ],
            schema_of,
        )
        .expect_err("cycle");
        match err {
            PlanError::DependencyCycle { cycle } => assert!(cycle.contains("label.a") && cycle.contains("label.b")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_deletes_in_reverse_dependency_order() {
        let removed = |kind, name: &str, deps: Vec<Address>| ResourceInstance {
            address: Address::new(kind, name),
            id: Some(format!("{name}-id")),
            desired: None,
            prior: Some(Value::object([("name", Value::from(name))])),
            recorded_dependencies: deps,
        };
        let plan = Plan::build(
            vec![
                removed(ResourceKind::Label, "prod", vec![]),
                removed(
                    ResourceKind::Annotation,
                    "release",
                    vec![Address::new(ResourceKind::Label, "prod")],
                ),
                ResourceInstance::configured(Address::new(ResourceKind::Label, "kept"), label("kept")),
            ],
            schema_of,
        )
        .expect("plans");
        let order: Vec<String> = plan.instances.iter().map(|p| format!("{} {}", p.action, p.address)).collect();
        assert_eq!(
            order,
            vec!["create label.kept", "delete annotation.release", "delete label.prod"]
        );
    }

    #[test]
    fn test_display_summary() {
        let plan = Plan::build(
            vec![ResourceInstance::configured(Address::new(ResourceKind::Label, "prod"), label("prod"))],
            schema_of,
        )
        .expect("plans");
        let text = plan.to_string();
        assert!(text.contains("+ label.prod"));
        assert!(text.contains("1 to add, 0 to change, 0 to replace, 0 to destroy"));
    }
}
