//! Federation introspection protocol.
//!
//! Apollo routers discover a subgraph's schema by sending the well-known
//! query `query SubgraphIntrospectQuery { _service { sdl } }`. This module
//! owns that protocol end to end: detecting the query on inbound requests,
//! and issuing it against upstream subgraphs with a retry policy when the
//! schema cache needs SDL.

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;

/// The well-known federation introspection query.
pub const FEDERATION_INTROSPECTION_QUERY: &str =
    "query SubgraphIntrospectQuery { _service { sdl } }";

/// Per-attempt timeout for introspection requests.
pub const INTROSPECTION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Normalize a query for introspection comparison: drop `#` comments,
/// remove all whitespace, lowercase.
fn normalize_query(query: &str) -> String {
    query
        .lines()
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<String>()
        .to_lowercase()
}

/// True when `query` is the federation introspection query, modulo comments,
/// whitespace, and case.
pub fn is_federation_introspection(query: &str) -> bool {
    normalize_query(query) == normalize_query(FEDERATION_INTROSPECTION_QUERY)
}

/// Broad classification of a failed outbound HTTP call.
///
/// Connection-class failures mean no HTTP response reached us; they drive the
/// passthrough error matrix and the introspection cache fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// The request timed out
    Timeout,
    /// TCP connection refused
    ConnectionRefused,
    /// DNS resolution failed
    HostNotFound,
    /// Some other failure establishing the connection
    Connect,
    /// Anything else (a response may or may not have been received)
    Other,
}

impl NetworkFailure {
    pub fn is_connection_class(self) -> bool {
        !matches!(self, NetworkFailure::Other)
    }
}

/// Classify a `reqwest` error into a [`NetworkFailure`].
pub fn classify_network_failure(err: &reqwest::Error) -> NetworkFailure {
    if err.is_timeout() {
        return NetworkFailure::Timeout;
    }

    // Look for the io error underneath reqwest/hyper wrappers.
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<std::io::Error>() {
            match io_err.kind() {
                std::io::ErrorKind::ConnectionRefused => return NetworkFailure::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return NetworkFailure::Timeout,
                _ => {}
            }
        }
        source = inner.source();
    }

    if err.is_connect() {
        let text = err.to_string().to_lowercase();
        if text.contains("refused") {
            NetworkFailure::ConnectionRefused
        } else if text.contains("dns") || text.contains("resolve") {
            NetworkFailure::HostNotFound
        } else {
            NetworkFailure::Connect
        }
    } else {
        NetworkFailure::Other
    }
}

/// Human-readable description of an outbound failure, used in retry logs and
/// schema-fetch error messages.
pub fn describe_network_failure(err: &reqwest::Error) -> String {
    match classify_network_failure(err) {
        NetworkFailure::Timeout => {
            format!("timeout after {}ms", INTROSPECTION_TIMEOUT.as_millis())
        }
        NetworkFailure::ConnectionRefused => "connection refused".to_string(),
        NetworkFailure::HostNotFound => "host not found".to_string(),
        NetworkFailure::Connect | NetworkFailure::Other => err.to_string(),
    }
}

/// Client for fetching subgraph SDL via federation introspection.
#[derive(Debug, Clone)]
pub struct IntrospectionClient {
    client: reqwest::Client,
}

impl Default for IntrospectionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IntrospectionClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch SDL from `url`, retrying up to `max_retries + 1` total attempts
    /// with `retry_delay` between attempts.
    ///
    /// `headers` are sent on every attempt; `Content-Type` defaults to
    /// `application/json` but a caller-supplied value wins.
    pub async fn fetch_sdl(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<String> {
        let attempts = max_retries + 1;
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match self.attempt(url, headers).await {
                Ok(sdl) => {
                    tracing::debug!(url = %url, attempt, "introspection succeeded");
                    return Ok(sdl);
                }
                Err(failure) => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        attempts,
                        failure = %failure,
                        "introspection attempt failed"
                    );
                    last_failure = failure;
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        Err(Error::SchemaFetch(format!(
            "introspection of {url} failed after {attempts} attempt(s): {last_failure}"
        )))
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> std::result::Result<String, String> {
        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
                tracing::warn!(header = %name, "skipping invalid introspection header name");
                continue;
            };
            let Ok(header_value) = HeaderValue::try_from(value.as_str()) else {
                tracing::warn!(header = %name, "skipping invalid introspection header value");
                continue;
            };
            header_map.insert(header_name, header_value);
        }

        let response = self
            .client
            .post(url)
            .timeout(INTROSPECTION_TIMEOUT)
            .headers(header_map)
            .json(&serde_json::json!({ "query": FEDERATION_INTROSPECTION_QUERY }))
            .send()
            .await
            .map_err(|err| describe_network_failure(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| format!("invalid JSON response: {err}"))?;

        match body.pointer("/data/_service/sdl").and_then(|v| v.as_str()) {
            Some(sdl) if !sdl.is_empty() => Ok(sdl.to_string()),
            _ => Err("response did not contain a non-empty data._service.sdl".to_string()),
        }
    }
}
