//! Workspace validation.
//!
//! Validation collects every problem in one pass and reports it as a
//! diagnostic, so a single `validate` run shows all of them. One resource's
//! violations never hide another's.

use std::collections::HashSet;

use tracing::debug;

use crate::diagnostics::Diagnostic;
use crate::planner::{Address, Reference, collect_references, substitute_references};
use crate::registry::Registry;
use crate::schema::{Value, from_config, validate};

use super::spec::{DataSourceConfig, ResourceConfig, WorkspaceConfig};

/// Validator for workspace files.
#[derive(Debug)]
pub struct ConfigValidator<'a> {
    registry: &'a Registry,
}

impl<'a> ConfigValidator<'a> {
    /// Creates a validator over the registry's schemas.
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Validates a workspace and returns every problem found.
    #[must_use]
    pub fn validate(&self, config: &WorkspaceConfig) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if config.workspace.trim().is_empty() {
            diagnostics.push(field_error("workspace", "Workspace name cannot be empty"));
        }
        if config.provider.concurrency == 0 {
            diagnostics.push(field_error("provider.concurrency", "Concurrency must be at least 1"));
        }
        if config.provider.max_attempts == 0 {
            diagnostics.push(field_error("provider.max_attempts", "Max attempts must be at least 1"));
        }
        if config.provider.host.trim().is_empty() {
            diagnostics.push(field_error("provider.host", "Host cannot be empty"));
        }

        let configured: HashSet<Address> = config.resources.iter().map(ResourceConfig::address).collect();
        let mut seen = HashSet::new();
        for resource in &config.resources {
            let address = resource.address();
            if let Some(d) = check_name(&resource.name, &address.to_string()) {
                diagnostics.push(d);
            }
            if !seen.insert(address.clone()) {
                diagnostics.push(
                    Diagnostic::error(
                        "Duplicate resource",
                        format!("{} '{}' is defined more than once", resource.kind, resource.name),
                    )
                    .at(address.to_string()),
                );
                continue;
            }
            diagnostics.extend(self.validate_resource(resource, &configured));
        }

        let mut data_names = HashSet::new();
        for source in &config.data {
            let at = format!("data.{}", source.name);
            if let Some(d) = check_name(&source.name, &at) {
                diagnostics.push(d);
            }
            if !data_names.insert(source.name.as_str()) {
                diagnostics.push(
                    Diagnostic::error("Duplicate data source", format!("'{}' is defined more than once", source.name))
                        .at(at),
                );
                continue;
            }
            diagnostics.extend(validate_data_source(source));
        }

        debug!("Validation found {} problems", diagnostics.len());
        diagnostics
    }

    /// Decodes one resource's attributes against its schema.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic if the kind is unregistered or the attributes
    /// are not an object.
    pub fn decode(&self, resource: &ResourceConfig) -> Result<Value, Diagnostic> {
        let address = resource.address().to_string();
        let schema = self
            .registry
            .schema(resource.kind)
            .map_err(|e| Diagnostic::error("Invalid configuration", e.to_string()).at(address.clone()))?;
        from_config(schema, &resource.attributes)
            .map_err(|e| Diagnostic::error("Invalid configuration", e.to_string()).at(address))
    }

    fn validate_resource(&self, resource: &ResourceConfig, configured: &HashSet<Address>) -> Vec<Diagnostic> {
        let address = resource.address().to_string();
        let value = match self.decode(resource) {
            Ok(value) => value,
            Err(d) => return vec![d],
        };
        let Ok(schema) = self.registry.schema(resource.kind) else {
            return Vec::new();
        };

        let unresolved = substitute_references(&value, &|_: &Reference| Value::Unknown);
        let mut diagnostics: Vec<Diagnostic> = validate(schema, &unresolved)
            .iter()
            .map(|v| Diagnostic::from_violation(v).at(address.clone()))
            .collect();

        for reference in collect_references(&value) {
            if !configured.contains(&reference.target) {
                diagnostics.push(
                    Diagnostic::error(
                        "Unresolved reference",
                        format!("{reference} names {}, which is not configured", reference.target),
                    )
                    .at(address.clone()),
                );
            } else if self
                .registry
                .schema(reference.target.kind)
                .is_ok_and(|s| s.get(reference.top_level()).is_none())
            {
                diagnostics.push(
                    Diagnostic::error(
                        "Unresolved reference",
                        format!(
                            "{reference}: {} has no attribute '{}'",
                            reference.target.kind,
                            reference.top_level()
                        ),
                    )
                    .at(address.clone()),
                );
            }
        }
        diagnostics
    }
}

fn validate_data_source(source: &DataSourceConfig) -> Vec<Diagnostic> {
    let at = format!("data.{}", source.name);
    let kind = match source.source() {
        Ok(kind) => kind,
        Err(e) => return vec![Diagnostic::error("Invalid configuration", e.to_string()).at(at)],
    };
    let schema = kind.schema();
    match from_config(&schema, &source.inputs) {
        Ok(inputs) => validate(&schema, &inputs)
            .iter()
            .map(|v| Diagnostic::from_violation(v).at(at.clone()))
            .collect(),
        Err(e) => vec![Diagnostic::error("Invalid configuration", e.to_string()).at(at)],
    }
}

/// Names must be usable inside `kind.name` addresses and references.
fn check_name(name: &str, at: &str) -> Option<Diagnostic> {
    if name.is_empty() {
        return Some(Diagnostic::error("Invalid name", "Name cannot be empty").at(at));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Some(
            Diagnostic::error(
                "Invalid name",
                format!("'{name}' may only contain letters, digits, hyphens and underscores"),
            )
            .at(at),
        );
    }
    None
}

fn field_error(path: &str, message: &str) -> Diagnostic {
    Diagnostic::error("Invalid configuration", message).with_path(path)
}
