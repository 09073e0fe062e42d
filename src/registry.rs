//! Per-kind CRUD dispatch.
//!
//! The [`Registry`] maps each [`ResourceKind`] to a [`ResourceHandler`]
//! that knows the kind's schema, API paths and update style. It is built
//! once at startup and shared.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::client::Remote;
use crate::error::{ApiError, ConfigError, Result};
use crate::kinds::ResourceKind;
use crate::schema::{Naming, ObjectSchema, Value, decode, encode, encode_field, field_key};

/// A remote record after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Remote identity.
    pub id: String,
    /// Decoded attribute tree, computed fields included.
    pub attributes: Value,
}

/// CRUD operations for one resource kind.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// The kind handled.
    fn kind(&self) -> ResourceKind;

    /// The kind's resource schema.
    fn schema(&self) -> &ObjectSchema;

    /// Creates a resource. Conflicts are surfaced, never retried. A created
    /// resource whose response cannot be decoded is reported as
    /// [`ApiError::UnreadableRecord`] with its id.
    async fn create(&self, remote: &Remote, desired: &Value) -> Result<RemoteRecord>;

    /// Reads a resource. A missing resource is [`ApiError::NotFound`].
    async fn read(&self, remote: &Remote, id: &str) -> Result<RemoteRecord>;

    /// Updates a resource in place. `changed` lists the top-level fields
    /// that differ between `prior` and `desired`.
    async fn update(
        &self,
        remote: &Remote,
        id: &str,
        changed: &[String],
        desired: &Value,
        prior: &Value,
    ) -> Result<RemoteRecord>;

    /// Deletes a resource. Deleting a missing resource succeeds.
    async fn delete(&self, remote: &Remote, id: &str) -> Result<()>;
}

/// How a kind's API applies updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStyle {
    /// PATCH with only the changed top-level fields; `null` clears a field.
    Patch,
    /// PUT with the whole object, untouched fields taken from prior state
    /// and cleared fields omitted.
    Replace,
}

/// A REST resource at `/analytics/v1/{plural}/{id}`.
#[derive(Debug, Clone)]
pub struct RestResource {
    kind: ResourceKind,
    schema: ObjectSchema,
    update_style: UpdateStyle,
}

impl RestResource {
    /// Creates a handler for `kind`.
    #[must_use]
    pub fn new(kind: ResourceKind, update_style: UpdateStyle) -> Self {
        Self {
            kind,
            schema: kind.schema(),
            update_style,
        }
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}/{id}", self.kind.collection_path())
    }

    fn read_path(&self, id: &str) -> String {
        match self.kind.read_suffix() {
            Some(suffix) => format!("{}/{suffix}", self.item_path(id)),
            None => self.item_path(id),
        }
    }

    /// Decodes a response body into a record, keeping `id` when the body
    /// does not repeat it.
    fn record(&self, json: &serde_json::Value, id: Option<&str>) -> Result<RemoteRecord> {
        let mut attributes = decode(&self.schema, json)
            .map_err(|e| ApiError::invalid_response(format!("{} record: {e}", self.kind)))?;
        let id = match (attributes.get("id").as_str(), id) {
            (Some(found), _) => found.to_string(),
            (None, Some(known)) => known.to_string(),
            (None, None) => {
                return Err(ApiError::invalid_response(format!("{} record has no id", self.kind)).into());
            }
        };
        attributes.set("id", Value::from(id.as_str()));
        Ok(RemoteRecord { id, attributes })
    }

    fn patch_body(&self, changed: &[String], desired: &Value) -> Result<serde_json::Value> {
        let mut body = Map::new();
        for name in changed {
            let Some(attr) = self.schema.get(name) else {
                continue;
            };
            if !attr.is_configurable() {
                continue;
            }
            let value = desired.get(name);
            let encoded = if value.is_null() {
                serde_json::Value::Null
            } else {
                encode_field(&attr.ty, value, Naming::Wire)?
            };
            body.insert(field_key(name, attr, Naming::Wire), encoded);
        }
        Ok(serde_json::Value::Object(body))
    }

    /// The whole object for a PUT. Unset fields keep their prior value
    /// unless they are among `changed`, in which case they are left out so
    /// the server clears them.
    fn replacement_body(&self, changed: &[String], desired: &Value, prior: &Value) -> Result<serde_json::Value> {
        let mut full = desired.clone();
        for (name, attr) in &self.schema.fields {
            if attr.is_configurable()
                && desired.get(name).is_null()
                && !prior.get(name).is_null()
                && !changed.contains(name)
            {
                full.set(name.clone(), prior.get(name).clone());
            }
        }
        Ok(encode(&self.schema, &full)?)
    }
}

#[async_trait]
impl ResourceHandler for RestResource {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    async fn create(&self, remote: &Remote, desired: &Value) -> Result<RemoteRecord> {
        let body = encode(&self.schema, desired)?;
        let response = remote.post(&self.kind.collection_path(), &body).await?;
        let record = match self.record(&response, None) {
            Ok(record) => record,
            Err(e) => {
                let Some(id) = response.get("id").and_then(serde_json::Value::as_str) else {
                    return Err(e);
                };
                warn!("Created {} {id} with an unreadable response: {e}", self.kind);
                return Err(ApiError::UnreadableRecord {
                    id: id.to_string(),
                    message: e.to_string(),
                }
                .into());
            }
        };
        info!("Created {} {}", self.kind, record.id);
        Ok(record)
    }

    async fn read(&self, remote: &Remote, id: &str) -> Result<RemoteRecord> {
        let response = remote.get(&self.read_path(id), &[]).await?;
        self.record(&response, Some(id))
    }

    async fn update(
        &self,
        remote: &Remote,
        id: &str,
        changed: &[String],
        desired: &Value,
        prior: &Value,
    ) -> Result<RemoteRecord> {
        let path = self.item_path(id);
        let response = match self.update_style {
            UpdateStyle::Patch => {
                let body = self.patch_body(changed, desired)?;
                debug!("Patching {} {id}: {:?}", self.kind, changed);
                remote.patch(&path, &body).await?
            }
            UpdateStyle::Replace => {
                let body = self.replacement_body(changed, desired, prior)?;
                debug!("Replacing {} {id}", self.kind);
                remote.put(&path, &body).await?
            }
        };

        if response.is_object() {
            self.record(&response, Some(id))
        } else {
            self.read(remote, id).await
        }
    }

    async fn delete(&self, remote: &Remote, id: &str) -> Result<()> {
        match remote.delete(&self.item_path(id)).await {
            Ok(()) => {
                info!("Deleted {} {id}", self.kind);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {id} already gone", self.kind);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Handlers for every resource kind.
pub struct Registry {
    handlers: HashMap<ResourceKind, Box<dyn ResourceHandler>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

impl Registry {
    /// The standard handler set.
    #[must_use]
    pub fn standard() -> Self {
        let mut handlers: HashMap<ResourceKind, Box<dyn ResourceHandler>> = HashMap::new();
        for kind in ResourceKind::all() {
            let style = match kind {
                ResourceKind::Budget => UpdateStyle::Replace,
                _ => UpdateStyle::Patch,
            };
            handlers.insert(kind, Box::new(RestResource::new(kind, style)));
        }
        Self { handlers }
    }

    /// Looks up the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if no handler is registered.
    pub fn handler(&self, kind: ResourceKind) -> std::result::Result<&dyn ResourceHandler, ConfigError> {
        self.handlers
            .get(&kind)
            .map(|handler| &**handler)
            .ok_or_else(|| ConfigError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Looks up the schema for `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if no handler is registered.
    pub fn schema(&self, kind: ResourceKind) -> std::result::Result<&ObjectSchema, ConfigError> {
        self.handler(kind).map(|handler| handler.schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockApiClient, RetryPolicy};
    use crate::error::EngineError;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn remote(mock: MockApiClient) -> Remote {
        Remote::new(Arc::new(mock), RetryPolicy::immediate(3), CancellationToken::new())
    }

    fn budget(description: &str) -> Value {
        Value::object([
            ("name", Value::from("main")),
            ("description", Value::from(description)),
            ("type", Value::from("recurring")),
            ("start_period", Value::from(1_735_689_600_000_i64)),
            ("time_interval", Value::from("month")),
            ("currency", Value::from("USD")),
        ])
    }

    #[tokio::test]
    async fn test_patch_sends_changed_fields_only() {
        let mut mock = MockApiClient::new();
        mock.expect_patch()
            .withf(|path, body| {
                path == "/analytics/v1/reports/r-1" && *body == json!({"description": null, "name": "renamed"})
            })
            .times(1)
            .returning(|_, _| Ok(json!({"id": "r-1", "name": "renamed"})));

        let handler = RestResource::new(ResourceKind::Report, UpdateStyle::Patch);
        let desired = Value::object([("name", Value::from("renamed"))]);
        let prior = Value::object([("name", Value::from("old")), ("description", Value::from("d"))]);
        let changed = vec![String::from("name"), String::from("description")];
        let record = handler
            .update(&remote(mock), "r-1", &changed, &desired, &prior)
            .await
            .expect("update succeeds");
        assert_eq!(record.id, "r-1");
    }

    #[tokio::test]
    async fn test_replace_sends_whole_object() {
        let mut mock = MockApiClient::new();
        mock.expect_put()
            .withf(|path, body| {
                path == "/analytics/v1/budgets/b-1"
                    && body["description"] == json!("new")
                    && body["amount"] == json!(500)
                    && body["timeInterval"] == json!("month")
            })
            .times(1)
            .returning(|_, body| {
                let mut echoed = body.clone();
                echoed["id"] = json!("b-1");
                Ok(echoed)
            });

        let handler = RestResource::new(ResourceKind::Budget, UpdateStyle::Replace);
        let desired = budget("new");
        let mut prior = budget("old");
        prior.set("amount", Value::from(500.0));
        let changed = vec![String::from("description")];
        handler
            .update(&remote(mock), "b-1", &changed, &desired, &prior)
            .await
            .expect("update succeeds");
    }

    #[tokio::test]
    async fn test_replace_omits_cleared_field() {
        let mut mock = MockApiClient::new();
        mock.expect_put()
            .withf(|_, body| body.get("description").is_none() && body["amount"] == json!(500))
            .times(1)
            .returning(|_, body| {
                let mut echoed = body.clone();
                echoed["id"] = json!("b-1");
                Ok(echoed)
            });

        let handler = RestResource::new(ResourceKind::Budget, UpdateStyle::Replace);
        let mut desired = budget("unused");
        desired.set("description", Value::Null);
        let mut prior = budget("old");
        prior.set("amount", Value::from(500.0));
        let record = handler
            .update(&remote(mock), "b-1", &[String::from("description")], &desired, &prior)
            .await
            .expect("update succeeds");
        assert!(record.attributes.get("description").is_null());
    }

    #[tokio::test]
    async fn test_empty_update_response_rereads() {
        let mut mock = MockApiClient::new();
        mock.expect_patch().times(1).returning(|_, _| Ok(serde_json::Value::Null));
        mock.expect_get()
            .withf(|path, _| path == "/analytics/v1/labels/l-1")
            .times(1)
            .returning(|_, _| Ok(json!({"id": "l-1", "name": "prod", "color": "blue"})));

        let handler = RestResource::new(ResourceKind::Label, UpdateStyle::Patch);
        let desired = Value::object([("name", Value::from("prod")), ("color", Value::from("blue"))]);
        let record = handler
            .update(&remote(mock), "l-1", &[String::from("color")], &desired, &desired)
            .await
            .expect("update succeeds");
        assert_eq!(record.attributes.get("color"), &Value::from("blue"));
    }

    #[tokio::test]
    async fn test_report_reads_config_subresource() {
        let mut mock = MockApiClient::new();
        mock.expect_get()
            .withf(|path, _| path == "/analytics/v1/reports/r-1/config")
            .times(1)
            .returning(|_, _| Ok(json!({"name": "test-ds-report-1", "config": {"currency": "USD"}})));

        let handler = RestResource::new(ResourceKind::Report, UpdateStyle::Patch);
        let record = handler.read(&remote(mock), "r-1").await.expect("read succeeds");
        assert_eq!(record.id, "r-1");
        assert_eq!(record.attributes.get("id"), &Value::from("r-1"));
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let mut mock = MockApiClient::new();
        mock.expect_delete()
            .times(1)
            .returning(|path| Err(ApiError::NotFound { path: path.to_string() }));

        let handler = RestResource::new(ResourceKind::Alert, UpdateStyle::Patch);
        handler.delete(&remote(mock), "gone").await.expect("delete of missing resource succeeds");
    }

    #[tokio::test]
    async fn test_create_conflict_surfaced() {
        let mut mock = MockApiClient::new();
        mock.expect_post()
            .times(1)
            .returning(|_, _| Err(ApiError::from_status(409, "/analytics/v1/labels", "exists", None)));

        let handler = RestResource::new(ResourceKind::Label, UpdateStyle::Patch);
        let desired = Value::object([("name", Value::from("prod")), ("color", Value::from("blue"))]);
        let err = handler.create(&remote(mock), &desired).await.expect_err("conflict");
        assert!(matches!(err, EngineError::Api(ApiError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_unreadable_create_response_keeps_id() {
        let mut mock = MockApiClient::new();
        mock.expect_post()
            .times(1)
            .returning(|_, _| Ok(json!({"id": "l-9", "name": "prod", "color": 42})));

        let handler = RestResource::new(ResourceKind::Label, UpdateStyle::Patch);
        let desired = Value::object([("name", Value::from("prod")), ("color", Value::from("blue"))]);
        let err = handler.create(&remote(mock), &desired).await.expect_err("unreadable");
        assert!(
            matches!(&err, EngineError::Api(ApiError::UnreadableRecord { id, .. }) if id == "l-9"),
            "{err}"
        );
    }

    #[test]
    fn test_standard_registry() {
        let registry = Registry::standard();
        for kind in ResourceKind::all() {
            assert_eq!(registry.handler(kind).map(|h| h.kind()).ok(), Some(kind));
        }
    }
}
