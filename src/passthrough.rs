//! Passthrough engine: forward GraphQL requests to the real upstream.
//!
//! Forwarding keeps the body intact but scrubs the incoming headers: the
//! RFC 9110 hop-by-hop set plus headers that describe the inbound transport
//! (`host`, `content-length`, `content-encoding`) must not cross the proxy.
//! Upstream responses are relayed with any status; connection-class failures
//! (no HTTP response at all) map onto a 502/503/504 matrix, with one special
//! case: when the failed request was the federation introspection query, the
//! cached schema answers instead, so a router restart does not lose its
//! supergraph while a subgraph is down.

use crate::error::{Error, Result};
use crate::introspection::{classify_network_failure, is_federation_introspection, NetworkFailure};
use crate::schema_cache::SchemaCache;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Default upstream timeout.
pub const DEFAULT_PASSTHROUGH_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Headers that only describe a single transport connection.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers that describe the inbound request body/connection and would be
/// wrong on the outbound one.
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &["host", "content-length", "content-encoding"];

fn is_stripped(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name) || CONNECTION_SPECIFIC_HEADERS.contains(&name)
}

/// Copy `incoming` minus hop-by-hop and connection-specific headers,
/// preserving repeated values, and default the content type to JSON.
pub fn sanitize_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut outgoing = HeaderMap::new();
    for (name, value) in incoming {
        if is_stripped(name.as_str()) {
            continue;
        }
        outgoing.append(name.clone(), value.clone());
    }
    if !outgoing.contains_key(CONTENT_TYPE) {
        outgoing.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    outgoing
}

/// A relayed upstream response.
#[derive(Debug)]
pub struct PassthroughResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Engine that forwards request bodies to upstream subgraphs.
#[derive(Clone)]
pub struct PassthroughEngine {
    client: reqwest::Client,
    timeout: Duration,
    schema_cache: SchemaCache,
}

impl PassthroughEngine {
    pub fn new(schema_cache: SchemaCache) -> Self {
        Self::with_timeout(schema_cache, DEFAULT_PASSTHROUGH_TIMEOUT)
    }

    pub fn with_timeout(schema_cache: SchemaCache, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .build()
            .expect("passthrough client construction cannot fail");
        Self {
            client,
            timeout,
            schema_cache,
        }
    }

    /// Forward `body` to `target_url` and relay the response.
    ///
    /// `query` is the GraphQL query from the body, used to recognize the
    /// introspection fallback case.
    pub async fn forward(
        &self,
        target_url: &str,
        subgraph: &str,
        incoming_headers: &HeaderMap,
        body: &Value,
        query: &str,
    ) -> Result<PassthroughResponse> {
        let outgoing_headers = sanitize_headers(incoming_headers);

        let result = self
            .client
            .post(target_url)
            .timeout(self.timeout)
            .headers(outgoing_headers)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let failure = classify_network_failure(&err);
                if failure.is_connection_class() && is_federation_introspection(query) {
                    if let Some(fallback) = self.introspection_fallback(target_url, subgraph).await {
                        return Ok(fallback);
                    }
                }
                return Err(map_failure(failure, target_url, &err));
            }
        };

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            // The body is re-serialized (and already decompressed), so
            // transport-level headers from upstream would be wrong here too.
            if is_stripped(name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert("x-proxy-mode", HeaderValue::from_static("passthrough"));
        if let Ok(target) = HeaderValue::try_from(target_url) {
            headers.insert("x-proxy-target", target);
        }

        let text = response
            .text()
            .await
            .map_err(|err| Error::BadGateway(format!("failed reading upstream body: {err}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        tracing::debug!(
            subgraph = %subgraph,
            target = %target_url,
            status = status.as_u16(),
            "passthrough relayed"
        );

        Ok(PassthroughResponse {
            status,
            headers,
            body,
        })
    }

    /// Answer a failed introspection passthrough from the schema cache.
    async fn introspection_fallback(
        &self,
        target_url: &str,
        subgraph: &str,
    ) -> Option<PassthroughResponse> {
        match self.schema_cache.get_schema(subgraph).await {
            Ok(entry) => {
                tracing::info!(
                    subgraph = %subgraph,
                    target = %target_url,
                    "upstream unreachable, serving introspection from schema cache"
                );
                let mut headers = HeaderMap::new();
                headers.insert(
                    "x-proxy-mode",
                    HeaderValue::from_static("passthrough-introspection-cached"),
                );
                headers.insert("x-cache-fallback", HeaderValue::from_static("true"));
                if let Ok(target) = HeaderValue::try_from(target_url) {
                    headers.insert("x-proxy-target", target);
                }
                Some(PassthroughResponse {
                    status: StatusCode::OK,
                    headers,
                    body: json!({ "data": { "_service": { "sdl": entry.sdl } } }),
                })
            }
            Err(err) => {
                tracing::warn!(
                    subgraph = %subgraph,
                    error = %err,
                    "introspection fallback failed, surfacing the upstream error"
                );
                None
            }
        }
    }
}

fn map_failure(failure: NetworkFailure, target_url: &str, err: &reqwest::Error) -> Error {
    match failure {
        NetworkFailure::Timeout => Error::GatewayTimeout(format!("{target_url} did not respond")),
        NetworkFailure::ConnectionRefused | NetworkFailure::HostNotFound => {
            Error::ServiceUnavailable(format!("{target_url} is unreachable"))
        }
        NetworkFailure::Connect => Error::BadGateway(format!("cannot connect to {target_url}")),
        NetworkFailure::Other => Error::Internal(format!("passthrough to {target_url} failed: {err}")),
    }
}
