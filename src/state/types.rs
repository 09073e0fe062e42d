//! State types for tracking applied resources.
//!
//! These types record what the last apply produced, used as prior state
//! for the next plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CodecError;
use crate::kinds::ResourceKind;
use crate::planner::Address;
use crate::schema::{ObjectSchema, Value, from_config};

/// Current version of the state format.
pub const STATE_VERSION: u32 = 1;

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete workspace state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    /// State format version.
    pub version: u32,
    /// Workspace name.
    pub workspace: String,
    /// Incremented on every write.
    pub serial: u64,
    /// Fingerprint of the last applied configuration.
    #[serde(default)]
    pub fingerprint: String,
    /// Applied resources keyed by address.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// State of one applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Instance name.
    pub name: String,
    /// Remote identity.
    pub id: String,
    /// Attribute tree in workspace (snake_case) naming.
    pub attributes: serde_json::Value,
    /// Addresses this resource referenced when applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the resource was last applied.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation ran.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Configuration fingerprint at the time.
    pub fingerprint: String,
    /// Addresses affected.
    pub resources: Vec<String>,
    /// Whether every instance applied cleanly.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Apply of a plan.
    Apply,
    /// Destruction of every managed resource.
    Destroy,
    /// Refresh of prior state from the remote API.
    Refresh,
}

impl WorkspaceState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(workspace: &str) -> Self {
        Self {
            version: STATE_VERSION,
            workspace: workspace.to_string(),
            serial: 0,
            fingerprint: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by address.
    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&ResourceState> {
        self.resources.get(&address.to_string())
    }

    /// Adds or updates a resource.
    pub fn upsert(&mut self, resource: ResourceState) {
        self.resources.insert(resource.address().to_string(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource by address.
    pub fn remove(&mut self, address: &Address) -> Option<ResourceState> {
        let result = self.resources.remove(&address.to_string());
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all managed addresses.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.resources.values().map(ResourceState::address).collect()
    }

    /// Returns true if nothing is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceState {
    /// Creates a resource state.
    #[must_use]
    pub fn new(address: &Address, id: &str, attributes: serde_json::Value, dependencies: &[Address]) -> Self {
        Self {
            kind: address.kind,
            name: address.name.clone(),
            id: id.to_string(),
            attributes,
            dependencies: dependencies.iter().map(ToString::to_string).collect(),
            updated_at: Utc::now(),
        }
    }

    /// The instance address.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::new(self.kind, self.name.clone())
    }

    /// Recorded dependencies that parse as addresses.
    #[must_use]
    pub fn dependency_addresses(&self) -> Vec<Address> {
        self.dependencies.iter().filter_map(|d| d.parse().ok()).collect()
    }

    /// Decodes the recorded attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded tree does not fit `schema`.
    pub fn prior(&self, schema: &ObjectSchema) -> Result<Value, CodecError> {
        from_config(schema, &self.attributes)
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: Operation, fingerprint: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            fingerprint: fingerprint.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: Operation, fingerprint: &str, resources: Vec<String>, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, fingerprint, resources)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_and_remove() {
        let mut state = WorkspaceState::new("finops");
        let address = Address::new(ResourceKind::Label, "prod");
        state.upsert(ResourceState::new(&address, "l-1", json!({"name": "prod"}), &[]));
        assert_eq!(state.get(&address).map(|r| r.id.as_str()), Some("l-1"));
        assert_eq!(state.addresses(), vec![address.clone()]);
        assert!(state.remove(&address).is_some());
        assert!(state.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = WorkspaceState::new("finops");
        for _ in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(Operation::Apply, "abc", vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_prior_decodes_sets() {
        let address = Address::new(ResourceKind::Annotation, "release");
        let resource = ResourceState::new(
            &address,
            "an-1",
            json!({"content": "x", "timestamp": "t", "labels": ["b", "a"], "id": "an-1"}),
            &[Address::new(ResourceKind::Label, "prod")],
        );
        let prior = resource.prior(&ResourceKind::Annotation.schema()).expect("decodes");
        assert_eq!(prior.get("labels"), &Value::string_set(["a", "b"]));
        assert_eq!(resource.dependency_addresses(), vec![Address::new(ResourceKind::Label, "prod")]);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut state = WorkspaceState::new("finops");
        state.upsert(ResourceState::new(
            &Address::new(ResourceKind::Report, "monthly"),
            "r-1",
            json!({"name": "monthly"}),
            &[],
        ));
        let text = serde_json::to_string(&state).expect("serializes");
        let back: WorkspaceState = serde_json::from_str(&text).expect("deserializes");
        assert_eq!(back, state);
    }
}
