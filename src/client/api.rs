//! The transport seam between the engine and the remote management API.

use async_trait::async_trait;

use crate::error::ApiError;

/// Raw JSON access to the remote management API.
///
/// Implementations map HTTP failures onto [`ApiError`] but never retry;
/// retries, timeouts and cancellation are layered on top by
/// [`Remote`](super::Remote). An empty response body is returned as JSON
/// `null`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issues a GET request.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<serde_json::Value, ApiError>;

    /// Issues a POST request.
    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError>;

    /// Issues a PATCH request.
    async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError>;

    /// Issues a PUT request.
    async fn put(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError>;

    /// Issues a DELETE request.
    async fn delete(&self, path: &str) -> Result<(), ApiError>;
}

/// One page of a collection response: `{<items-key>: [...], rowCount, pageToken?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Items on this page.
    pub items: Vec<serde_json::Value>,
    /// Row count reported by the server, if any.
    pub row_count: Option<u64>,
    /// Continuation token for the next page.
    pub next_page_token: Option<String>,
}

impl Page {
    /// Parses a collection response.
    ///
    /// # Errors
    ///
    /// Returns an error if the response is not an object or its items are not an array.
    pub fn from_json(json: &serde_json::Value, items_key: &str) -> Result<Self, ApiError> {
        let obj = json
            .as_object()
            .ok_or_else(|| ApiError::invalid_response("collection response is not an object"))?;

        let items = match obj.get(items_key) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ApiError::invalid_response(format!(
                    "'{items_key}' in collection response is not an array"
                )));
            }
        };

        let next_page_token = obj
            .get("pageToken")
            .and_then(serde_json::Value::as_str)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);

        Ok(Self {
            items,
            row_count: obj.get("rowCount").and_then(serde_json::Value::as_u64),
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_parsing() {
        let page = Page::from_json(
            &json!({"alerts": [{"id": "a"}, {"id": "b"}], "rowCount": 5, "pageToken": "t2"}),
            "alerts",
        )
        .expect("parses");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.row_count, Some(5));
        assert_eq!(page.next_page_token.as_deref(), Some("t2"));
    }

    #[test]
    fn test_last_page_and_empty_token() {
        let page = Page::from_json(&json!({"labels": [], "pageToken": ""}), "labels").expect("parses");
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());

        let page = Page::from_json(&json!({"rowCount": 0}), "labels").expect("parses");
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_malformed_page() {
        assert!(Page::from_json(&json!([]), "labels").is_err());
        assert!(Page::from_json(&json!({"labels": "nope"}), "labels").is_err());
    }
}
