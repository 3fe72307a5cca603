//! HTTP surface of the proxy.
//!
//! Operational endpoints (`/`, `/live`, `/ready`, `/health`, `/status`) plus
//! the proxy endpoint `POST /{encodedUrl}`. All state lives in one
//! [`AppState`] shared through axum's `State` extractor; request-time errors
//! funnel through the `Error` responder, which writes the GraphQL error
//! envelope.

use crate::bootstrap::{self, BootstrapSummary};
use crate::config::{ProxyConfig, SubgraphConfig};
use crate::error::{Error, Result};
use crate::health::{HealthMonitor, SchemaSource, SubgraphStatus};
use crate::mock::MockEngine;
use crate::passthrough::PassthroughEngine;
use crate::registry::SharedRegistry;
use crate::resolvers::SharedResolverSource;
use crate::router::{decode_request, RequestRouter};
use crate::schema_cache::SchemaCache;
use crate::shutdown::ShutdownCoordinator;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tower_http::trace::TraceLayer;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Everything the handlers need.
pub struct AppState {
    pub config: ProxyConfig,
    pub health: HealthMonitor,
    pub schema_cache: SchemaCache,
    pub request_router: RequestRouter,
    pub shutdown: ShutdownCoordinator,
    pub summary: BootstrapSummary,
    registry_enabled: bool,
    started_at: Instant,
}

/// The assembled proxy: state plus the axum application.
pub struct ProxyServer {
    state: Arc<AppState>,
}

impl ProxyServer {
    /// Build the full proxy: run bootstrap, start the schema refresher, and
    /// wire the engines together.
    pub async fn build(
        config: ProxyConfig,
        registry: Option<SharedRegistry>,
        resolver_source: SharedResolverSource,
    ) -> Result<Self> {
        let health = HealthMonitor::new(config.subgraph_health_timeout);
        let schema_cache = SchemaCache::new(
            config.schema_cache_ttl,
            config.schema_dir.clone(),
            registry.clone(),
        );

        let summary =
            bootstrap::initialize(&config, registry.as_ref(), &health, &schema_cache).await?;
        schema_cache.start_periodic_refresh();

        let mock_engine = MockEngine::new(resolver_source);
        let passthrough = PassthroughEngine::new(schema_cache.clone());
        let request_router = RequestRouter::new(
            health.clone(),
            schema_cache.clone(),
            mock_engine,
            passthrough,
            config.enable_passthrough,
            config.mock_on_error,
        );

        Ok(Self {
            state: Arc::new(AppState {
                registry_enabled: registry.is_some(),
                config,
                health,
                schema_cache,
                request_router,
                shutdown: ShutdownCoordinator::with_defaults(),
                summary,
                started_at: Instant::now(),
            }),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The axum application. Exposed separately so tests can drive it with
    /// `tower::ServiceExt::oneshot`.
    pub fn app(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/live", get(live_handler))
            .route("/ready", get(ready_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/:encoded_url", post(proxy_handler))
            .fallback(fallback_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until SIGTERM/SIGINT, then drain in-flight requests, cancel all
    /// timers, and clear monitor state.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> Result<()> {
        let app = self.app();
        let coordinator = self.state.shutdown.clone();

        let signal_coordinator = coordinator.clone();
        tokio::spawn(async move {
            crate::shutdown::signal_shutdown().await;
            signal_coordinator.shutdown().await;
        });

        tracing::info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "proxy listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(coordinator.shutdown_signal())
            .await?;

        // Reached once the listener closed; finish draining and tear down
        // background work.
        coordinator.shutdown().await;
        self.state.health.shutdown();
        self.state.schema_cache.stop_periodic_refresh();
        Ok(())
    }
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "subgraph-mock-proxy",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now_ms(),
    }))
}

async fn live_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "timestamp": now_ms(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.shutdown.is_shutting_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        )
            .into_response()
    } else {
        Json(json!({ "status": "ready" })).into_response()
    }
}

/// Component status in the aggregated health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
struct ComponentCheck {
    status: ComponentStatus,
    message: String,
    #[serde(rename = "lastCheck")]
    last_check: u64,
    metrics: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: ComponentStatus,
    timestamp: u64,
    uptime: f64,
    checks: HashMap<String, ComponentCheck>,
}

impl HealthReport {
    fn new(uptime: f64) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            timestamp: now_ms(),
            uptime,
            checks: HashMap::new(),
        }
    }

    /// Merge a component check, degrading the overall status to the worst
    /// one seen.
    fn with_check(mut self, name: &str, check: ComponentCheck) -> Self {
        match (self.status, check.status) {
            (ComponentStatus::Healthy, worse @ (ComponentStatus::Degraded | ComponentStatus::Unhealthy)) => {
                self.status = worse;
            }
            (ComponentStatus::Degraded, ComponentStatus::Unhealthy) => {
                self.status = ComponentStatus::Unhealthy;
            }
            _ => {}
        }
        self.checks.insert(name.to_string(), check);
        self
    }
}

impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        let code = match self.status {
            ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        };
        (code, Json(self)).into_response()
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> HealthReport {
    let states = state.health.get_all_states();
    let total = states.len();
    let healthy = states.iter().filter(|s| s.is_healthy).count();
    let mocking = states.iter().filter(|s| s.is_mocking).count();

    let monitor_status = if total > 0 && healthy == 0 && mocking == 0 {
        ComponentStatus::Unhealthy
    } else if states.iter().any(|s| !s.is_healthy && !s.is_mocking) {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    let monitor_check = ComponentCheck {
        status: monitor_status,
        message: format!("{healthy}/{total} subgraphs healthy, {mocking} mocking"),
        last_check: now_ms(),
        metrics: json!({
            "totalSubgraphs": total,
            "healthySubgraphs": healthy,
            "mockingSubgraphs": mocking,
        }),
    };

    let cached = state.schema_cache.len();
    let cache_status = if total > 0 && cached == 0 {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    let cache_check = ComponentCheck {
        status: cache_status,
        message: format!("{cached} schemas cached"),
        last_check: now_ms(),
        metrics: json!({ "cachedSchemas": cached }),
    };

    let registry_check = if state.registry_enabled {
        ComponentCheck {
            status: ComponentStatus::Healthy,
            message: "schema registry configured".to_string(),
            last_check: now_ms(),
            metrics: json!({}),
        }
    } else {
        ComponentCheck {
            status: ComponentStatus::Degraded,
            message: "running without a schema registry".to_string(),
            last_check: now_ms(),
            metrics: json!({}),
        }
    };

    HealthReport::new(state.started_at.elapsed().as_secs_f64())
        .with_check("health_monitor", monitor_check)
        .with_check("schema_cache", cache_check)
        .with_check("registry", registry_check)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphStatusEntry {
    name: String,
    url: Option<String>,
    status: SubgraphStatus,
    is_healthy: bool,
    is_mocking: bool,
    schema_source: SchemaSource,
    last_check: Option<u64>,
    consecutive_failures: u32,
    config: SubgraphConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    total_subgraphs: usize,
    healthy_subgraphs: usize,
    mocking_subgraphs: usize,
    subgraphs: Vec<SubgraphStatusEntry>,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut states = state.health.get_all_states();
    states.sort_by(|a, b| a.name.cmp(&b.name));

    let healthy = states.iter().filter(|s| s.is_healthy).count();
    let mocking = states.iter().filter(|s| s.is_mocking).count();
    let subgraphs = states
        .into_iter()
        .map(|s| SubgraphStatusEntry {
            name: s.name,
            url: s.url,
            status: s.status,
            is_healthy: s.is_healthy,
            is_mocking: s.is_mocking,
            schema_source: s.schema_source,
            last_check: s.last_health_check.map(|t| {
                t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
            }),
            consecutive_failures: s.consecutive_failures,
            config: (*s.config).clone(),
        })
        .collect::<Vec<_>>();

    Json(StatusResponse {
        total_subgraphs: subgraphs.len(),
        healthy_subgraphs: healthy,
        mocking_subgraphs: mocking,
        subgraphs,
    })
}

async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _guard = state.shutdown.request_guard();

    // The raw (still percent-encoded) path; decoding happens exactly once in
    // the request decoder.
    let decoded = match decode_request(uri.path(), &headers, &body) {
        Ok(decoded) => decoded,
        Err(err) => return err.into_response(),
    };

    match state.request_router.handle(&headers, &decoded).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn fallback_handler(method: Method, uri: Uri) -> Response {
    if method == Method::POST {
        Error::InvalidUrl(format!(
            "'{}' does not contain a single encoded target URL segment",
            uri.path()
        ))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not found" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticRegistry;
    use crate::resolvers::StaticResolverSource;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const PRODUCTS_SDL: &str =
        "type Product { id: ID! name: String price: Float } type Query { products: [Product!]! }";

    async fn build_proxy() -> ProxyServer {
        let registry = StaticRegistry::new()
            .with_subgraph("products", Some("http://products:4001/graphql"), PRODUCTS_SDL)
            .into_shared();
        let config = ProxyConfig {
            subgraph_config_file: PathBuf::from("/nonexistent/subgraph-config.json"),
            ..Default::default()
        };
        ProxyServer::build(
            config,
            Some(registry),
            StaticResolverSource::default().into_shared(),
        )
        .await
        .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn proxy_request(target: &str, subgraph: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/{}", urlencoding::encode(target)))
            .header("content-type", "application/json");
        if let Some(name) = subgraph {
            builder = builder.header("x-subgraph-name", name);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["service"], "subgraph-mock-proxy");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
        assert!(body["timestamp"].is_number());
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"], "alive");
        assert!(body["uptime"].is_number());
    }

    #[tokio::test]
    async fn test_ready_flips_on_shutdown() {
        let proxy = build_proxy().await;
        let app = proxy.app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ready");

        proxy.state().shutdown.shutdown().await;
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_components() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert!(body["checks"]["health_monitor"].is_object());
        assert!(body["checks"]["schema_cache"].is_object());
        assert!(body["checks"]["registry"].is_object());
        assert_eq!(body["checks"]["registry"]["status"], "healthy");
        assert_eq!(
            body["checks"]["schema_cache"]["metrics"]["cachedSchemas"],
            1
        );
    }

    #[tokio::test]
    async fn test_status_endpoint_lists_subgraphs() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;

        assert_eq!(body["totalSubgraphs"], 1);
        let subgraph = &body["subgraphs"][0];
        assert_eq!(subgraph["name"], "products");
        assert_eq!(subgraph["url"], "http://products:4001/graphql");
        assert_eq!(subgraph["schemaSource"], "apollo-registry");
        assert!(subgraph["config"]["maxRetries"].is_number());
    }

    #[tokio::test]
    async fn test_proxy_mocks_when_passthrough_impossible() {
        let proxy = build_proxy().await;
        // The registered URL points at a closed port, so the live probe
        // fails and the request routes to the mock engine.
        proxy.state().health.register(
            "products",
            Some("http://127.0.0.1:1/graphql".to_string()),
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );

        let response = proxy
            .app()
            .oneshot(proxy_request(
                "http://127.0.0.1:1/graphql",
                Some("products"),
                r#"{"query":"query Q { products { id name price } }"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-proxy-mode").unwrap(), "mock");
        let body = json_body(response).await;
        assert!(body["data"]["products"].is_array());
    }

    #[tokio::test]
    async fn test_proxy_missing_header_is_invalid_request() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(proxy_request(
                "http://unknown:4000/graphql",
                None,
                r#"{"query":"{ __typename }"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(
            body["errors"][0]["extensions"]["code"],
            "INVALID_GRAPHQL_REQUEST"
        );
        assert!(body["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("x-subgraph-name"));
    }

    #[tokio::test]
    async fn test_proxy_invalid_encoding_is_invalid_url() {
        let proxy = build_proxy().await;
        let request = Request::builder()
            .method("POST")
            .uri("/%ZZ")
            .header("content-type", "application/json")
            .header("x-subgraph-name", "products")
            .body(Body::from(r#"{"query":"{ __typename }"}"#))
            .unwrap();

        let response = proxy.app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_URL");
        assert_eq!(body["data"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_subgraph_returns_schema_not_found() {
        let proxy = build_proxy().await;
        let response = proxy
            .app()
            .oneshot(proxy_request(
                "http://unknown:4000/graphql",
                Some("unknown"),
                r#"{"query":"{ __typename }"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "SCHEMA_NOT_FOUND");
        assert!(body["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("unknown"));
    }
}
