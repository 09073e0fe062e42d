//! HTTP implementation of [`ApiClient`].
//!
//! This module provides the `reqwest` client for the cost management REST API.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, header};
use std::time::Duration;
use tracing::{debug, trace};

use super::api::ApiClient;
use crate::error::ApiError;

/// Default API base URL.
pub const DEFAULT_HOST: &str = "https://api.doit.com";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Cost management API client.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    /// HTTP client.
    client: Client,
    /// API base URL, without trailing slash.
    base_url: String,
    /// Bearer token.
    api_token: String,
    /// Optional tenant selector appended to every call.
    customer_context: Option<String>,
    /// Per-request timeout in seconds.
    timeout_secs: u64,
}

impl HttpApiClient {
    /// Creates a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, api_token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, api_token: &str, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            customer_context: None,
            timeout_secs,
        })
    }

    /// Appends `customerContext` to every request.
    #[must_use]
    pub fn with_customer_context(mut self, customer_context: Option<String>) -> Self {
        self.customer_context = customer_context.filter(|c| !c.is_empty());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");
        let mut builder = self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(header::ACCEPT, "application/json");
        if let Some(ctx) = &self.customer_context {
            builder = builder.query(&[("customerContext", ctx.as_str())]);
        }
        builder
    }

    /// Sends a request and maps the outcome.
    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<serde_json::Value, ApiError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    operation: path.to_string(),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                ApiError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response, path).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ApiError::invalid_response(format!("Failed to parse response: {e}")))
    }

    async fn error_from(response: Response, path: &str) -> ApiError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        debug!("HTTP {status} from {path}: {message}");
        ApiError::from_status(status, path, message, retry_after)
    }
}

/// Extracts the message of a structured `{error|message}` body, falling
/// back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["error", "message"]
                .iter()
                .find_map(|key| json.get(key).and_then(serde_json::Value::as_str).map(ToString::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<serde_json::Value, ApiError> {
        let builder = self.request(Method::GET, path).query(query);
        self.send(builder, path).await
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let builder = self.request(Method::POST, path).json(body);
        self.send(builder, path).await
    }

    async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let builder = self.request(Method::PATCH, path).json(body);
        self.send(builder, path).await
    }

    async fn put(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let builder = self.request(Method::PUT, path).json(body);
        self.send(builder, path).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let builder = self.request(Method::DELETE, path);
        self.send(builder, path).await.map(|_| ())
    }
}
