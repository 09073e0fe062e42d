//! Workspace configuration.
//!
//! This module handles:
//! - Parsing `costform.yaml` and applying `COSTFORM_*` overrides
//! - Validating every resource and data source against its schema

mod parser;
mod spec;
mod validator;

pub use parser::{API_TOKEN_VAR, ConfigParser, DEFAULT_CONFIG_FILES, apply_overrides, find_config_file};
pub use spec::{DataSourceConfig, ProviderConfig, ResourceConfig, StateConfig, WorkspaceConfig};
pub use validator::ConfigValidator;
