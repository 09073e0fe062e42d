//! Workspace file types.
//!
//! These structs map to `costform.yaml`. Resource attributes stay as plain
//! JSON here; they are decoded against the kind's schema during validation.

use serde::{Deserialize, Serialize};

use crate::client::{DEFAULT_HOST, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};
use crate::error::ConfigError;
use crate::kinds::{DataSourceKind, ResourceKind};
use crate::planner::{Address, DEFAULT_CONCURRENCY};
use crate::schema::{ContentHasher, raw};
use crate::state::DEFAULT_STATE_PATH;

/// The root of a workspace file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Workspace name, recorded in state.
    pub workspace: String,
    /// Remote API settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// State file settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Managed resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Data source reads.
    #[serde(default)]
    pub data: Vec<DataSourceConfig>,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// API base URL.
    #[serde(default = "default_host")]
    pub host: String,
    /// Customer context appended to every call.
    #[serde(default)]
    pub customer_context: Option<String>,
    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Instances applied concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// State file settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State file path, relative to the workspace file.
    #[serde(default)]
    pub path: Option<String>,
}

/// One managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Name, unique per kind.
    pub name: String,
    /// Attribute tree in workspace naming.
    #[serde(default = "empty_object")]
    pub attributes: serde_json::Value,
}

/// One data source read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSourceConfig {
    /// `report` for a single item, `reports` for the collection.
    pub kind: String,
    /// Name, unique per data source kind.
    pub name: String,
    /// Query inputs.
    #[serde(default = "empty_object")]
    pub inputs: serde_json::Value,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            customer_context: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
        }
    }
}

impl WorkspaceConfig {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            provider: ProviderConfig::default(),
            state: StateConfig::default(),
            resources: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Looks up a resource by address.
    #[must_use]
    pub fn resource(&self, address: &Address) -> Option<&ResourceConfig> {
        self.resources
            .iter()
            .find(|r| r.kind == address.kind && r.name == address.name)
    }

    /// Looks up a data source by name.
    #[must_use]
    pub fn data_source(&self, name: &str) -> Option<&DataSourceConfig> {
        self.data.iter().find(|d| d.name == name)
    }

    /// The configured state path, or the default.
    #[must_use]
    pub fn state_path(&self) -> &str {
        self.state.path.as_deref().unwrap_or(DEFAULT_STATE_PATH)
    }

    /// Fingerprint of the managed resources.
    ///
    /// Changes when any resource is added, removed or edited; provider and
    /// data source settings do not contribute.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let resources: Vec<serde_json::Value> = self
            .resources
            .iter()
            .map(|r| serde_json::json!({"address": r.address().to_string(), "attributes": r.attributes}))
            .collect();
        ContentHasher::new().fingerprint(&raw(&serde_json::Value::Array(resources)))
    }
}

impl ResourceConfig {
    /// Creates a resource entry.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>, attributes: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes,
        }
    }

    /// The instance address.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::new(self.kind, self.name.clone())
    }
}

impl DataSourceConfig {
    /// Resolves the data source kind.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` names neither a resource nor a collection.
    pub fn source(&self) -> Result<DataSourceKind, ConfigError> {
        self.kind.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_defaults() {
        let provider = ProviderConfig::default();
        assert_eq!(provider.host, DEFAULT_HOST);
        assert_eq!(provider.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(provider.concurrency, DEFAULT_CONCURRENCY);
        assert!(provider.customer_context.is_none());
    }

    #[test]
    fn test_fingerprint_tracks_resources() {
        let mut config = WorkspaceConfig::new("finops");
        let empty = config.fingerprint();
        config
            .resources
            .push(ResourceConfig::new(ResourceKind::Label, "prod", json!({"name": "prod", "color": "blue"})));
        let one = config.fingerprint();
        assert_ne!(empty, one);

        config.provider.concurrency = 1;
        assert_eq!(config.fingerprint(), one);

        config.resources[0].attributes = json!({"name": "prod", "color": "red"});
        assert_ne!(config.fingerprint(), one);
    }

    #[test]
    fn test_data_source_kind() {
        let single = DataSourceConfig {
            kind: String::from("alert"),
            name: String::from("one"),
            inputs: json!({"id": "a-1"}),
        };
        assert_eq!(single.source().ok(), Some(DataSourceKind::Single(ResourceKind::Alert)));

        let unknown = DataSourceConfig {
            kind: String::from("widgets"),
            ..single
        };
        assert!(unknown.source().is_err());
    }

    #[test]
    fn test_lookup_by_address() {
        let mut config = WorkspaceConfig::new("finops");
        config.resources.push(ResourceConfig::new(ResourceKind::Report, "monthly", json!({})));
        assert!(config.resource(&Address::new(ResourceKind::Report, "monthly")).is_some());
        assert!(config.resource(&Address::new(ResourceKind::Budget, "monthly")).is_none());
        assert_eq!(config.state_path(), DEFAULT_STATE_PATH);
    }
}
