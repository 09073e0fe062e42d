//! In-memory stand-in for the management API, for engine tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};

use crate::client::{ApiClient, Remote, RetryPolicy};
use crate::error::ApiError;
use crate::kinds::ResourceKind;

const PREFIX: &str = "/analytics/v1/";

#[derive(Debug, Default)]
struct FakeState {
    items: BTreeMap<ResourceKind, BTreeMap<String, Json>>,
    next_id: u64,
    clock: u64,
    calls: Vec<String>,
    failures: VecDeque<(String, ApiError)>,
    replies: VecDeque<(String, Json)>,
    page_size: Option<usize>,
    looping_pages: bool,
    fills: BTreeMap<ResourceKind, Map<String, Json>>,
}

/// A fake API that stores records per kind and echoes them back.
///
/// Records get sequential ids, `createTime`/`updateTime` stamps and any
/// server-filled fields registered for their kind. Every call is recorded.
#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

enum Target {
    Collection(ResourceKind),
    Item(ResourceKind, String),
}

impl FakeApi {
    /// A fake that fills server-side defaults the way the real API does.
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.fill(ResourceKind::Report, "type", json!("custom"));
        fake.fill(ResourceKind::Label, "type", json!("custom"));
        fake.fill(ResourceKind::Budget, "recipients", json!(["owner@example.com"]));
        fake.fill(
            ResourceKind::Budget,
            "collaborators",
            json!([{"email": "owner@example.com", "role": "owner"}]),
        );
        Arc::new(fake)
    }

    /// A `Remote` over this fake without retry delays.
    pub fn remote(self: &Arc<Self>) -> Remote {
        Remote::new(
            Arc::clone(self) as Arc<dyn ApiClient>,
            RetryPolicy::immediate(3),
            tokio_util::sync::CancellationToken::new(),
        )
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake state lock");
        f(&mut state)
    }

    /// Registers a field the server fills on create when absent.
    pub fn fill(&self, kind: ResourceKind, key: &str, value: Json) {
        self.with(|s| s.fills.entry(kind).or_default().insert(key.to_string(), value));
    }

    /// Splits collection reads into pages of `size`.
    pub fn set_page_size(&self, size: usize) {
        self.with(|s| s.page_size = Some(size));
    }

    /// Makes every page point back at the second page.
    pub fn set_looping_pages(&self) {
        self.with(|s| s.looping_pages = true);
    }

    /// Fails the next call starting with `call` (e.g. `"POST /analytics/v1/labels"`) once.
    pub fn fail_next(&self, call: &str, error: ApiError) {
        self.with(|s| s.failures.push_back((call.to_string(), error)));
    }

    /// Makes the next call starting with `call` answer `body` after it
    /// takes effect.
    pub fn reply_next(&self, call: &str, body: Json) {
        self.with(|s| s.replies.push_back((call.to_string(), body)));
    }

    /// Stores a record out of band and returns its id.
    pub fn seed(&self, kind: ResourceKind, body: Json) -> String {
        self.with(|s| insert(s, kind, body))
    }

    /// Deletes a record out of band.
    pub fn remove(&self, kind: ResourceKind, id: &str) {
        self.with(|s| s.items.entry(kind).or_default().remove(id));
    }

    /// The stored record, if any.
    pub fn record(&self, kind: ResourceKind, id: &str) -> Option<Json> {
        self.with(|s| s.items.get(&kind).and_then(|m| m.get(id)).cloned())
    }

    /// Number of stored records of `kind`.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.with(|s| s.items.get(&kind).map_or(0, BTreeMap::len))
    }

    /// Every call as `METHOD path`.
    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Number of POST, PATCH, PUT and DELETE calls.
    pub fn mutations(&self) -> usize {
        self.calls().iter().filter(|c| !c.starts_with("GET ")).count()
    }

    fn begin(&self, method: &str, path: &str) -> Result<Target, ApiError> {
        self.with(|s| {
            let call = format!("{method} {path}");
            let fails = s.failures.front().is_some_and(|(prefix, _)| call.starts_with(prefix.as_str()));
            s.calls.push(call);
            if fails
                && let Some((_, err)) = s.failures.pop_front()
            {
                return Err(err);
            }
            parse(path)
        })
    }
}

fn parse(path: &str) -> Result<Target, ApiError> {
    let rest = path
        .strip_prefix(PREFIX)
        .ok_or_else(|| ApiError::NotFound { path: path.to_string() })?;
    let mut parts = rest.split('/');
    let plural = parts.next().unwrap_or_default();
    let kind = ResourceKind::all()
        .into_iter()
        .find(|k| k.plural() == plural)
        .ok_or_else(|| ApiError::NotFound { path: path.to_string() })?;
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => Ok(Target::Collection(kind)),
        (Some(id), None | Some("config"), None) => Ok(Target::Item(kind, id.to_string())),
        _ => Err(ApiError::NotFound { path: path.to_string() }),
    }
}

impl FakeState {
    fn reply(&mut self, call: &str, stored: Json) -> Json {
        if self.replies.front().is_some_and(|(prefix, _)| call.starts_with(prefix.as_str()))
            && let Some((_, body)) = self.replies.pop_front()
        {
            return body;
        }
        stored
    }
}

fn insert(state: &mut FakeState, kind: ResourceKind, body: Json) -> String {
    state.next_id += 1;
    state.clock += 1;
    let id = format!("{}-{:04}", kind.as_str(), state.next_id);
    let mut record = body.as_object().cloned().unwrap_or_default();
    if let Some(fills) = state.fills.get(&kind) {
        for (key, value) in fills {
            if record.get(key).is_none_or(Json::is_null) {
                record.insert(key.clone(), value.clone());
            }
        }
    }
    record.insert(String::from("id"), json!(id));
    record.insert(String::from("createTime"), json!(state.clock));
    record.insert(String::from("updateTime"), json!(state.clock));
    state.items.entry(kind).or_default().insert(id.clone(), Json::Object(record));
    id
}

fn not_found(path: &str) -> ApiError {
    ApiError::from_status(404, path, "not found", None)
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Json, ApiError> {
        match self.begin("GET", path)? {
            Target::Item(kind, id) => self.record(kind, &id).ok_or_else(|| not_found(path)),
            Target::Collection(kind) => self.with(|s| {
                let all: Vec<Json> = s.items.get(&kind).map(|m| m.values().cloned().collect()).unwrap_or_default();
                let start = query
                    .iter()
                    .find(|(k, _)| k == "pageToken")
                    .and_then(|(_, v)| v.strip_prefix("page-"))
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(0);
                let size = s.page_size.unwrap_or(usize::MAX);
                let page: Vec<Json> = all.iter().skip(start).take(size).cloned().collect();
                let next = if s.looping_pages {
                    Some(format!("page-{size}"))
                } else if start.saturating_add(size) < all.len() {
                    Some(format!("page-{}", start + size))
                } else {
                    None
                };
                let mut body = Map::new();
                body.insert(kind.items_key().to_string(), Json::Array(page));
                body.insert(String::from("rowCount"), json!(all.len()));
                if let Some(token) = next {
                    body.insert(String::from("pageToken"), json!(token));
                }
                Ok(Json::Object(body))
            }),
        }
    }

    async fn post(&self, path: &str, body: &Json) -> Result<Json, ApiError> {
        match self.begin("POST", path)? {
            Target::Collection(kind) => self.with(|s| {
                let id = insert(s, kind, body.clone());
                let stored = s.items[&kind][&id].clone();
                Ok(s.reply(&format!("POST {path}"), stored))
            }),
            Target::Item(..) => Err(ApiError::from_status(405, path, "method not allowed", None)),
        }
    }

    async fn patch(&self, path: &str, body: &Json) -> Result<Json, ApiError> {
        let Target::Item(kind, id) = self.begin("PATCH", path)? else {
            return Err(ApiError::from_status(405, path, "method not allowed", None));
        };
        self.with(|s| {
            s.clock += 1;
            let clock = s.clock;
            let record = s
                .items
                .get_mut(&kind)
                .and_then(|m| m.get_mut(&id))
                .and_then(Json::as_object_mut)
                .ok_or_else(|| not_found(path))?;
            for (key, value) in body.as_object().cloned().unwrap_or_default() {
                if value.is_null() {
                    record.remove(&key);
                } else {
                    record.insert(key, value);
                }
            }
            record.insert(String::from("updateTime"), json!(clock));
            Ok(Json::Object(record.clone()))
        })
    }

    async fn put(&self, path: &str, body: &Json) -> Result<Json, ApiError> {
        let Target::Item(kind, id) = self.begin("PUT", path)? else {
            return Err(ApiError::from_status(405, path, "method not allowed", None));
        };
        self.with(|s| {
            s.clock += 1;
            let clock = s.clock;
            let fills = s.fills.get(&kind).cloned().unwrap_or_default();
            let stored = s
                .items
                .get_mut(&kind)
                .and_then(|m| m.get_mut(&id))
                .ok_or_else(|| not_found(path))?;
            let create_time = stored.get("createTime").cloned();
            let mut record = body.as_object().cloned().unwrap_or_default();
            for (key, value) in fills {
                record.entry(key).or_insert(value);
            }
            record.insert(String::from("id"), json!(id));
            record.insert(String::from("createTime"), create_time.unwrap_or(Json::Null));
            record.insert(String::from("updateTime"), json!(clock));
            *stored = Json::Object(record);
            Ok(stored.clone())
        })
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let Target::Item(kind, id) = self.begin("DELETE", path)? else {
            return Err(ApiError::from_status(405, path, "method not allowed", None));
        };
        self.with(|s| {
            s.items
                .get_mut(&kind)
                .and_then(|m| m.remove(&id))
                .map(|_| ())
                .ok_or_else(|| not_found(path))
        })
    }
}
