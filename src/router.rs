//! Request router: decode one proxied GraphQL request and dispatch it.
//!
//! The proxy endpoint is `POST /{encodedUrl}` where the single path segment
//! is the percent-encoded upstream URL and the `x-subgraph-name` header names
//! the subgraph. Decoding happens exactly once, into an explicit
//! [`DecodedRequest`] that downstream engines consume.
//!
//! The routing decision is a pure function of the subgraph's configuration,
//! its monitored state, and the global passthrough flag; the only side
//! channel is an optional live probe of the target when the cached health
//! bit is false.

use crate::error::{Error, Result};
use crate::health::{HealthMonitor, SubgraphState};
use crate::mock::{MockEngine, MockRequest};
use crate::passthrough::{PassthroughEngine, PassthroughResponse};
use crate::schema_cache::SchemaCache;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static DNS_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("static regex compiles")
});

/// A fully decoded proxy request, handed to the mock or passthrough engine.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    /// Percent-decoded upstream URL from the path
    pub target_url: String,
    /// Value of the `x-subgraph-name` header
    pub subgraph_name: String,
    /// GraphQL query string
    pub query: String,
    /// GraphQL variables, forwarded untouched
    pub variables: Option<Value>,
    /// Operation to execute when the document has several
    pub operation_name: Option<String>,
    /// The original JSON body, forwarded verbatim on passthrough
    pub body: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLRequestBody {
    query: Option<String>,
    #[serde(default)]
    variables: Option<Value>,
    #[serde(rename = "operationName", default)]
    operation_name: Option<String>,
}

/// Percent-decode the request path into a validated upstream URL.
///
/// The path must consist of exactly one segment. Decoding happens once; the
/// result must be an absolute http(s) URL whose host is `localhost`, an IPv4
/// address, or a DNS-style name.
pub fn decode_target_url(raw_path: &str) -> Result<String> {
    let segment = raw_path.strip_prefix('/').unwrap_or(raw_path);
    if segment.is_empty() {
        return Err(Error::InvalidUrl("request path is empty".to_string()));
    }
    if segment.contains('/') {
        return Err(Error::InvalidUrl(
            "request path must contain exactly one encoded URL segment".to_string(),
        ));
    }

    let decoded = urlencoding::decode(segment)
        .map_err(|_| Error::InvalidUrl("path segment is not valid percent-encoding".to_string()))?;

    validate_target_url(&decoded)?;
    Ok(decoded.into_owned())
}

fn validate_target_url(candidate: &str) -> Result<()> {
    let parsed = url::Url::parse(candidate)
        .map_err(|_| Error::InvalidUrl(format!("'{candidate}' is not an absolute URL")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme '{other}', only http and https are proxied"
            )))
        }
    }

    let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
        return Err(Error::InvalidUrl(format!("'{candidate}' has no host")));
    };

    let acceptable = host.eq_ignore_ascii_case("localhost")
        || host.parse::<std::net::Ipv4Addr>().is_ok()
        || DNS_NAME_RE.is_match(host);
    if !acceptable {
        return Err(Error::InvalidUrl(format!("host '{host}' is not allowed")));
    }

    Ok(())
}

/// Decode path, header, and body into a [`DecodedRequest`].
pub fn decode_request(raw_path: &str, headers: &HeaderMap, body: &[u8]) -> Result<DecodedRequest> {
    let target_url = decode_target_url(raw_path)?;

    let subgraph_name = headers
        .get("x-subgraph-name")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Error::InvalidRequest("the x-subgraph-name header is required".to_string())
        })?
        .to_string();

    let body_value: Value = serde_json::from_slice(body)
        .map_err(|err| Error::InvalidRequest(format!("request body is not valid JSON: {err}")))?;
    let parsed: GraphQLRequestBody = serde_json::from_value(body_value.clone())
        .map_err(|err| Error::InvalidRequest(format!("malformed GraphQL request body: {err}")))?;

    let query = parsed
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or(Error::MissingQuery)?;

    Ok(DecodedRequest {
        target_url,
        subgraph_name,
        query,
        variables: parsed.variables,
        operation_name: parsed.operation_name,
        body: body_value,
    })
}

/// The routing core: classify each request and dispatch it.
#[derive(Clone)]
pub struct RequestRouter {
    health: HealthMonitor,
    schema_cache: SchemaCache,
    mock_engine: MockEngine,
    passthrough: PassthroughEngine,
    enable_passthrough: bool,
    mock_on_error: bool,
}

impl RequestRouter {
    pub fn new(
        health: HealthMonitor,
        schema_cache: SchemaCache,
        mock_engine: MockEngine,
        passthrough: PassthroughEngine,
        enable_passthrough: bool,
        mock_on_error: bool,
    ) -> Self {
        Self {
            health,
            schema_cache,
            mock_engine,
            passthrough,
            enable_passthrough,
            mock_on_error,
        }
    }

    /// Handle one decoded request.
    pub async fn handle(
        &self,
        incoming_headers: &HeaderMap,
        request: &DecodedRequest,
    ) -> Result<Response> {
        // Prefer the name lookup; fall back to matching the target URL
        // against registered subgraphs.
        let state = self
            .health
            .get_state(&request.subgraph_name)
            .or_else(|| self.health.find_by_url(&request.target_url));

        match state {
            Some(state) => self.handle_known(incoming_headers, request, state).await,
            None => self.mock_unknown(request).await,
        }
    }

    async fn handle_known(
        &self,
        incoming_headers: &HeaderMap,
        request: &DecodedRequest,
        state: SubgraphState,
    ) -> Result<Response> {
        if self.should_passthrough(&state, &request.target_url).await {
            tracing::debug!(
                subgraph = %state.name,
                target = %request.target_url,
                "routing decision: passthrough"
            );
            let relayed = self
                .passthrough
                .forward(
                    &request.target_url,
                    &state.name,
                    incoming_headers,
                    &request.body,
                    &request.query,
                )
                .await?;
            return Ok(relay_response(relayed));
        }

        // Mock path. Subgraphs that opted out of mocking surface the outage
        // instead, as does a globally disabled mock fallback (unless pinned).
        if state.config.disable_mocking {
            return Err(Error::SubgraphUnavailable(state.name.clone()));
        }
        if !self.mock_on_error && !state.config.force_mock {
            return Err(Error::SubgraphUnavailable(state.name.clone()));
        }

        tracing::debug!(
            subgraph = %state.name,
            target = %request.target_url,
            "routing decision: mock"
        );
        let entry = self.schema_cache.get_schema(&state.name).await?;
        let execution = self
            .mock_engine
            .execute(
                &entry.schema,
                MockRequest {
                    subgraph: &state.name,
                    query: &request.query,
                    operation_name: request.operation_name.as_deref(),
                    overrides: None,
                },
            )
            .await?;

        Ok(mock_response(
            execution.body,
            execution.is_introspection,
            &state.name,
            &request.target_url,
        ))
    }

    /// Unknown subgraphs still get a mock attempt by name: a schema may be
    /// loadable even though the health monitor never saw a registration. The
    /// usual outcome is `SCHEMA_NOT_FOUND`.
    async fn mock_unknown(&self, request: &DecodedRequest) -> Result<Response> {
        tracing::debug!(
            subgraph = %request.subgraph_name,
            target = %request.target_url,
            "request for unregistered subgraph"
        );
        let entry = self
            .schema_cache
            .get_schema(&request.subgraph_name)
            .await
            .map_err(|err| {
                tracing::debug!(
                    subgraph = %request.subgraph_name,
                    error = %err,
                    "no schema for unregistered subgraph"
                );
                Error::SchemaNotFound(request.subgraph_name.clone())
            })?;

        let execution = self
            .mock_engine
            .execute(
                &entry.schema,
                MockRequest {
                    subgraph: &request.subgraph_name,
                    query: &request.query,
                    operation_name: request.operation_name.as_deref(),
                    overrides: None,
                },
            )
            .await?;

        Ok(mock_response(
            execution.body,
            execution.is_introspection,
            &request.subgraph_name,
            &request.target_url,
        ))
    }

    /// Passthrough iff globally enabled, the subgraph is not mocking, and the
    /// upstream looks reachable: either the cached health bit is set or a
    /// live probe answers 200 within the health timeout.
    async fn should_passthrough(&self, state: &SubgraphState, target_url: &str) -> bool {
        if !self.enable_passthrough || state.is_mocking {
            return false;
        }
        if state.is_healthy {
            return true;
        }
        self.health.probe(target_url).await
    }
}

fn relay_response(relayed: PassthroughResponse) -> Response {
    (relayed.status, relayed.headers, Json(relayed.body)).into_response()
}

fn mock_response(
    body: Value,
    is_introspection: bool,
    subgraph: &str,
    target_url: &str,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-proxy-mode",
        HeaderValue::from_static(if is_introspection {
            "mock-introspection"
        } else {
            "mock"
        }),
    );
    headers.insert("x-mock-response", HeaderValue::from_static("true"));
    if let Ok(value) = HeaderValue::try_from(subgraph) {
        headers.insert("x-mock-subgraph", value);
    }
    if let Ok(value) = HeaderValue::try_from(target_url) {
        headers.insert("x-proxy-target", value);
    }
    (StatusCode::OK, headers, Json(body)).into_response()
}
