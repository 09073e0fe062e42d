//! Workspace file loading.
//!
//! This module loads `costform.yaml`, applies `COSTFORM_*` environment
//! overrides and reads credentials from the environment or a `.env` file.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::spec::WorkspaceConfig;

/// Environment variable holding the API token.
pub const API_TOKEN_VAR: &str = "COSTFORM_API_TOKEN";

/// Loader for workspace files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory searched for `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory searched for `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a workspace file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let path = path.as_ref();
        info!("Loading workspace from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a workspace document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<WorkspaceConfig> {
        debug!("Parsing YAML workspace");

        let config: WorkspaceConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!(
            "Parsed workspace '{}': {} resources, {} data sources",
            config.workspace,
            config.resources.len(),
            config.data.len()
        );
        Ok(config)
    }

    /// Loads a workspace file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
        let mut config = self.load_file(path)?;
        apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }
        Ok(())
    }

    /// Reads the API token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is unset or empty.
    pub fn api_token() -> Result<String> {
        std::env::var(API_TOKEN_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::MissingEnvVar {
                    name: API_TOKEN_VAR.to_string(),
                }
                .into()
            })
    }
}

/// Applies `COSTFORM_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns an error if a numeric override does not parse.
pub fn apply_overrides(config: &mut WorkspaceConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(workspace) = lookup("COSTFORM_WORKSPACE") {
        debug!("Overriding workspace from environment");
        config.workspace = workspace;
    }
    if let Some(host) = lookup("COSTFORM_HOST") {
        debug!("Overriding provider.host from environment");
        config.provider.host = host;
    }
    if let Some(context) = lookup("COSTFORM_CUSTOMER_CONTEXT") {
        debug!("Overriding provider.customer_context from environment");
        config.provider.customer_context = Some(context).filter(|c| !c.is_empty());
    }
    if let Some(path) = lookup("COSTFORM_STATE_PATH") {
        debug!("Overriding state.path from environment");
        config.state.path = Some(path);
    }
    if let Some(value) = lookup("COSTFORM_CONCURRENCY") {
        config.provider.concurrency = parse_number("COSTFORM_CONCURRENCY", &value)?;
    }
    if let Some(value) = lookup("COSTFORM_MAX_ATTEMPTS") {
        config.provider.max_attempts = parse_number("COSTFORM_MAX_ATTEMPTS", &value)?;
    }
    if let Some(value) = lookup("COSTFORM_TIMEOUT_SECS") {
        config.provider.timeout_secs = parse_number("COSTFORM_TIMEOUT_SECS", &value)?;
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::validation(format!("'{value}' is not a valid number"), name).into())
}

/// Workspace file names searched for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["costform.yaml", "costform.yml"];

/// Finds the workspace file in `start_dir` or its parents.
///
/// # Errors
///
/// Returns an error if no workspace file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found workspace file: {}", config_path.display());
                return Ok(config_path);
            }
        }
        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
