//! Data source reads.
//!
//! Data sources are queried but never diffed or mutated. A single-item read
//! looks a resource up by id; a collection read follows continuation tokens
//! until the server stops returning them and reports the complete result.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{Page, Remote};
use crate::diagnostics::Diagnostic;
use crate::error::{ApiError, EngineError};
use crate::kinds::{DataSourceKind, ResourceKind};
use crate::registry::Registry;
use crate::schema::{Naming, Value, decode, field_key, validate};

/// Reader for data sources.
#[derive(Debug, Clone)]
pub struct DataSourceReader {
    registry: Arc<Registry>,
    remote: Remote,
}

impl DataSourceReader {
    /// Creates a reader.
    #[must_use]
    pub const fn new(registry: Arc<Registry>, remote: Remote) -> Self {
        Self { registry, remote }
    }

    /// Validates `inputs` against the data source schema and reads it.
    ///
    /// # Errors
    ///
    /// Returns every input violation, or the diagnostic of a failed read.
    pub async fn read(&self, source: DataSourceKind, inputs: &Value) -> Result<Value, Vec<Diagnostic>> {
        let violations = validate(&source.schema(), inputs);
        if !violations.is_empty() {
            return Err(violations.iter().map(Diagnostic::from_violation).collect());
        }

        match source {
            DataSourceKind::Single(kind) => {
                let id = inputs.get("id").as_str().unwrap_or_default();
                self.find(kind, id).await.map_err(|d| vec![d])
            }
            DataSourceKind::Collection(kind) => self.list(kind, inputs).await.map_err(|d| vec![d]),
        }
    }

    /// Reads one resource by id.
    ///
    /// # Errors
    ///
    /// A missing resource yields a "Resource not found" diagnostic; any
    /// other failure its own diagnostic.
    pub async fn find(&self, kind: ResourceKind, id: &str) -> Result<Value, Diagnostic> {
        let handler = self
            .registry
            .handler(kind)
            .map_err(|e| Diagnostic::from_error(&EngineError::from(e)))?;
        match handler.read(&self.remote, id).await {
            Ok(record) => Ok(record.attributes),
            Err(e) if e.is_not_found() => {
                let mut diag = Diagnostic::from_error(&e).with_path("id").at(format!("data.{kind}"));
                diag.detail = format!("no such {kind} '{id}': {}", diag.detail);
                Err(diag)
            }
            Err(e) => Err(Diagnostic::from_error(&e).at(format!("data.{kind}"))),
        }
    }

    /// Reads a whole collection.
    ///
    /// The result echoes `inputs` and adds `items` and `row_count`, where
    /// `row_count` is the number of items actually returned.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic if a page fails, cannot be decoded, or the server
    /// repeats a continuation token.
    pub async fn list(&self, kind: ResourceKind, inputs: &Value) -> Result<Value, Diagnostic> {
        let at = format!("data.{}", kind.plural());
        let items = self
            .fetch_all(kind, inputs)
            .await
            .map_err(|e| Diagnostic::from_error(&e).at(at.clone()))?;
        info!("Read {} {} items", items.len(), kind.plural());

        let mut result = match inputs {
            Value::Object(_) => inputs.clone(),
            _ => Value::Object(std::collections::BTreeMap::new()),
        };
        #[allow(clippy::cast_precision_loss)]
        result.set("row_count", Value::Number(items.len() as f64));
        result.set("items", Value::List(items));
        Ok(result)
    }

    async fn fetch_all(&self, kind: ResourceKind, inputs: &Value) -> Result<Vec<Value>, EngineError> {
        let schema = kind.schema();
        let base_query = query_for(kind, inputs);
        let mut seen: HashSet<String> = HashSet::new();
        let mut token: Option<String> = None;
        let mut items = Vec::new();

        loop {
            let mut query = base_query.clone();
            if let Some(t) = &token {
                query.push((String::from("pageToken"), t.clone()));
            }
            let json = self.remote.get(&kind.collection_path(), &query).await?;
            let page = Page::from_json(&json, kind.items_key())?;
            debug!(
                "{} page: {} items, server row count {:?}",
                kind.plural(),
                page.items.len(),
                page.row_count
            );

            for item in &page.items {
                items.push(decode(&schema, item)?);
            }

            match page.next_page_token {
                None => return Ok(items),
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(ApiError::PaginationLoop { token: next }.into());
                    }
                    token = Some(next);
                }
            }
        }
    }
}

/// Query parameters for the collection inputs that are set.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn query_for(kind: ResourceKind, inputs: &Value) -> Vec<(String, String)> {
    let schema = DataSourceKind::Collection(kind).schema();
    schema
        .fields
        .iter()
        .filter(|(_, attr)| attr.is_configurable())
        .filter_map(|(name, attr)| {
            let value = match inputs.get(name) {
                Value::String(s) => s.clone(),
                Value::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((field_key(name, attr, Naming::Wire), value))
        })
        .collect()
}
