//! Remote API access.
//!
//! This module provides:
//! - The [`ApiClient`] transport trait and its `reqwest` implementation
//! - Collection page parsing
//! - [`Remote`], which applies retries, timeouts and cancellation to every call

mod api;
mod http;
mod retry;

pub use api::{ApiClient, Page};
#[cfg(test)]
pub use api::MockApiClient;
pub use http::{DEFAULT_HOST, DEFAULT_TIMEOUT_SECS, HttpApiClient};
pub use retry::{DEFAULT_MAX_ATTEMPTS, Remote, RetryPolicy, with_retry};
