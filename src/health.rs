//! Subgraph health monitoring.
//!
//! The monitor owns every subgraph's routing state and drives all
//! transitions. Each registered subgraph gets its own probe task running at
//! its configured interval, which serializes writes per subgraph; readers
//! (the request router, the status endpoint) take cheap snapshots.
//!
//! The state machine collapses repeated failures into a stable `mocking`
//! state once `max_retries` consecutive probes fail, unless mocking is
//! disabled for the subgraph. `force_mock` pins the subgraph to `mocking`
//! from registration and disables probing entirely. Tie-break order:
//! `force_mock` over `disable_mocking` over the retry counter.

use crate::config::SubgraphConfig;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// Routing status of a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubgraphStatus {
    /// Registered but not probed yet
    Unknown,
    /// Last probe succeeded
    Available,
    /// Failing, but below the mocking threshold (or mocking disabled)
    Unavailable,
    /// Served from mocks; probes may still run to detect recovery
    Mocking,
}

impl std::fmt::Display for SubgraphStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubgraphStatus::Unknown => "unknown",
            SubgraphStatus::Available => "available",
            SubgraphStatus::Unavailable => "unavailable",
            SubgraphStatus::Mocking => "mocking",
        };
        f.write_str(s)
    }
}

/// Where the subgraph's schema is loaded from, derived from its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaSource {
    #[serde(rename = "apollo-registry")]
    ApolloRegistry,
    #[serde(rename = "local-introspection")]
    LocalIntrospection,
    #[serde(rename = "unknown")]
    Unknown,
}

impl SchemaSource {
    /// Derive the source from a subgraph config and whether a registry is
    /// available at all.
    pub fn derive(config: &SubgraphConfig, registry_enabled: bool) -> Self {
        if config.use_local_schema || config.schema_file.is_some() {
            SchemaSource::LocalIntrospection
        } else if registry_enabled {
            SchemaSource::ApolloRegistry
        } else {
            SchemaSource::Unknown
        }
    }
}

/// Snapshot of one subgraph's monitored state.
#[derive(Debug, Clone)]
pub struct SubgraphState {
    pub name: String,
    pub url: Option<String>,
    pub status: SubgraphStatus,
    pub schema_source: SchemaSource,
    pub is_healthy: bool,
    pub is_mocking: bool,
    pub consecutive_failures: u32,
    pub last_health_check: Option<SystemTime>,
    pub config: Arc<SubgraphConfig>,
}

struct MonitorInner {
    states: RwLock<HashMap<String, SubgraphState>>,
    probes: Mutex<HashMap<String, JoinHandle<()>>>,
    client: reqwest::Client,
    probe_timeout: Duration,
}

/// Concurrent health monitor over all registered subgraphs.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                states: RwLock::new(HashMap::new()),
                probes: Mutex::new(HashMap::new()),
                client: reqwest::Client::new(),
                probe_timeout,
            }),
        }
    }

    /// Register a subgraph, replacing any previous registration atomically.
    ///
    /// Probes are scheduled unless the subgraph is `force_mock` or has no
    /// URL to probe; either condition also puts it into `mocking` directly.
    pub fn register(
        &self,
        name: &str,
        url: Option<String>,
        config: SubgraphConfig,
        schema_source: SchemaSource,
    ) {
        let config = Arc::new(config);
        let mocking_from_start = config.force_mock || url.is_none();

        let state = SubgraphState {
            name: name.to_string(),
            url: url.clone(),
            status: if mocking_from_start {
                SubgraphStatus::Mocking
            } else {
                SubgraphStatus::Unknown
            },
            schema_source,
            is_healthy: false,
            is_mocking: mocking_from_start,
            consecutive_failures: 0,
            last_health_check: None,
            config: config.clone(),
        };

        // Replace state and probe together so a re-registration never leaves
        // a timer probing with the old config.
        if let Some(previous) = self.inner.probes.lock().remove(name) {
            previous.abort();
        }
        self.inner.states.write().insert(name.to_string(), state);

        if !config.force_mock {
            if let Some(url) = url {
                self.spawn_probe(name.to_string(), url, config.health_check_interval());
            }
        }

        tracing::info!(
            subgraph = %name,
            force_mock = config.force_mock,
            "subgraph registered"
        );
    }

    /// Remove a subgraph and cancel its probe timer.
    pub fn unregister(&self, name: &str) {
        if let Some(handle) = self.inner.probes.lock().remove(name) {
            handle.abort();
        }
        self.inner.states.write().remove(name);
    }

    fn spawn_probe(&self, name: String, url: String, period: Duration) {
        let inner = self.inner.clone();
        let probe_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let healthy = probe_once(&inner.client, &url, inner.probe_timeout).await;
                apply_outcome(&inner, &probe_name, healthy);
            }
        });
        self.inner.probes.lock().insert(name, handle);
    }

    /// Perform one probe now, update state, and return the new snapshot.
    pub async fn check_health(&self, name: &str) -> Result<SubgraphState> {
        let (url, force_mock) = {
            let states = self.inner.states.read();
            let state = states
                .get(name)
                .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
            (state.url.clone(), state.config.force_mock)
        };

        // A pinned-mocking subgraph or one without a URL has nothing to probe.
        let Some(url) = url.filter(|_| !force_mock) else {
            return self
                .get_state(name)
                .ok_or_else(|| Error::NotRegistered(name.to_string()));
        };

        let healthy = probe_once(&self.inner.client, &url, self.inner.probe_timeout).await;
        apply_outcome(&self.inner, name, healthy)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Probe a URL without touching any state. Used for the router's live
    /// passthrough check.
    pub async fn probe(&self, url: &str) -> bool {
        probe_once(&self.inner.client, url, self.inner.probe_timeout).await
    }

    /// Manual health override following the normal transition rules.
    pub fn set_health(&self, name: &str, healthy: bool) -> Result<SubgraphState> {
        if !self.inner.states.read().contains_key(name) {
            return Err(Error::NotRegistered(name.to_string()));
        }
        apply_outcome(&self.inner, name, healthy)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Snapshot of one subgraph.
    pub fn get_state(&self, name: &str) -> Option<SubgraphState> {
        self.inner.states.read().get(name).cloned()
    }

    /// Snapshot of every subgraph.
    pub fn get_all_states(&self) -> Vec<SubgraphState> {
        self.inner.states.read().values().cloned().collect()
    }

    /// Find a subgraph by its routing URL.
    pub fn find_by_url(&self, url: &str) -> Option<SubgraphState> {
        self.inner
            .states
            .read()
            .values()
            .find(|state| state.url.as_deref() == Some(url))
            .cloned()
    }

    /// Number of registered subgraphs.
    pub fn len(&self) -> usize {
        self.inner.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every probe timer and drop all state.
    pub fn shutdown(&self) {
        let mut probes = self.inner.probes.lock();
        for (_, handle) in probes.drain() {
            handle.abort();
        }
        self.inner.states.write().clear();
        tracing::info!("health monitor shut down");
    }
}

/// One probe: POST a `__typename` query, healthy iff HTTP 200.
async fn probe_once(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let result = client
        .post(url)
        .timeout(timeout)
        .header("content-type", "application/json")
        .header("x-apollo-operation-name", "TypenameQuery")
        .json(&serde_json::json!({ "query": "query { __typename }" }))
        .send()
        .await;

    match result {
        Ok(response) => response.status().as_u16() == 200,
        Err(err) => {
            tracing::debug!(url = %url, error = %err, "health probe failed");
            false
        }
    }
}

/// Apply a probe (or manual) outcome under the state lock and return the new
/// snapshot. Returns `None` when the subgraph vanished concurrently.
fn apply_outcome(inner: &MonitorInner, name: &str, healthy: bool) -> Option<SubgraphState> {
    let mut states = inner.states.write();
    let state = states.get_mut(name)?;
    let previous_status = state.status;

    state.last_health_check = Some(SystemTime::now());

    if healthy {
        state.consecutive_failures = 0;
        if state.config.force_mock {
            state.status = SubgraphStatus::Mocking;
            state.is_mocking = true;
            state.is_healthy = false;
        } else {
            state.status = SubgraphStatus::Available;
            state.is_healthy = true;
            state.is_mocking = false;
        }
    } else {
        state.is_healthy = false;
        state.consecutive_failures += 1;
        let crossed_threshold = state.consecutive_failures >= state.config.max_retries;
        if crossed_threshold && !state.config.disable_mocking && !state.config.force_mock {
            state.status = SubgraphStatus::Mocking;
            state.is_mocking = true;
        } else {
            state.status = SubgraphStatus::Unavailable;
        }
    }

    if state.status != previous_status {
        tracing::info!(
            subgraph = %name,
            from = %previous_status,
            to = %state.status,
            failures = state.consecutive_failures,
            "subgraph status changed"
        );
    }

    Some(state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(Duration::from_millis(500))
    }

    /// Stub upstream whose health can be flipped at runtime.
    async fn spawn_upstream(healthy: Arc<AtomicBool>, hits: Arc<AtomicU32>) -> String {
        let app = Router::new().route(
            "/graphql",
            post(move |headers: axum::http::HeaderMap| {
                let healthy = healthy.clone();
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(
                        headers
                            .get("x-apollo-operation-name")
                            .and_then(|v| v.to_str().ok()),
                        Some("TypenameQuery")
                    );
                    if healthy.load(Ordering::SeqCst) {
                        (
                            axum::http::StatusCode::OK,
                            Json(serde_json::json!({ "data": { "__typename": "Query" } })),
                        )
                    } else {
                        (
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                            Json(serde_json::json!({ "errors": [{ "message": "down" }] })),
                        )
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/graphql")
    }

    #[tokio::test]
    async fn test_register_initial_state() {
        let monitor = monitor();
        monitor.register(
            "products",
            Some("http://products:4001/graphql".to_string()),
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );

        let state = monitor.get_state("products").unwrap();
        assert_eq!(state.status, SubgraphStatus::Unknown);
        assert!(!state.is_healthy);
        assert!(!state.is_mocking);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_health_check.is_none());
        assert_eq!(state.schema_source, SchemaSource::ApolloRegistry);
    }

    #[tokio::test]
    async fn test_force_mock_pins_mocking_and_skips_probes() {
        let healthy = Arc::new(AtomicBool::new(true));
        let hits = Arc::new(AtomicU32::new(0));
        let url = spawn_upstream(healthy, hits.clone()).await;

        let monitor = monitor();
        monitor.register(
            "reviews",
            Some(url),
            SubgraphConfig {
                force_mock: true,
                health_check_interval_ms: 5_000,
                ..Default::default()
            },
            SchemaSource::ApolloRegistry,
        );

        let state = monitor.get_state("reviews").unwrap();
        assert_eq!(state.status, SubgraphStatus::Mocking);
        assert!(state.is_mocking);
        assert!(!state.is_healthy);
        assert!(monitor.inner.probes.lock().is_empty());

        // Even an explicit check leaves the pinned state alone.
        let checked = monitor.check_health("reviews").await.unwrap();
        assert_eq!(checked.status, SubgraphStatus::Mocking);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_url_mocks_from_registration() {
        let monitor = monitor();
        monitor.register(
            "schema-only",
            None,
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );

        let state = monitor.get_state("schema-only").unwrap();
        assert!(state.is_mocking);
        assert_eq!(state.status, SubgraphStatus::Mocking);
        assert!(monitor.inner.probes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_cross_threshold_into_mocking_then_recover() {
        let healthy = Arc::new(AtomicBool::new(false));
        let hits = Arc::new(AtomicU32::new(0));
        let url = spawn_upstream(healthy.clone(), hits).await;

        let monitor = monitor();
        monitor.register(
            "products",
            Some(url),
            SubgraphConfig {
                max_retries: 2,
                // Long interval so only explicit checks drive transitions;
                // the immediate first tick may contribute one failure.
                health_check_interval_ms: 300_000,
                ..Default::default()
            },
            SchemaSource::ApolloRegistry,
        );

        let first = monitor.check_health("products").await.unwrap();
        assert!(!first.is_healthy);
        assert!(first.last_health_check.is_some());

        // Drive failures past the threshold.
        let mut state = first;
        while state.consecutive_failures < 2 {
            state = monitor.check_health("products").await.unwrap();
        }
        assert_eq!(state.status, SubgraphStatus::Mocking);
        assert!(state.is_mocking);
        assert!(!state.is_healthy);

        // Recovery resets the counter and clears mocking.
        healthy.store(true, Ordering::SeqCst);
        let recovered = monitor.check_health("products").await.unwrap();
        assert_eq!(recovered.status, SubgraphStatus::Available);
        assert!(recovered.is_healthy);
        assert!(!recovered.is_mocking);
        assert_eq!(recovered.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_disable_mocking_stays_unavailable() {
        let monitor = monitor();
        monitor.register(
            "orders",
            Some("http://127.0.0.1:1/graphql".to_string()),
            SubgraphConfig {
                disable_mocking: true,
                max_retries: 1,
                health_check_interval_ms: 300_000,
                ..Default::default()
            },
            SchemaSource::ApolloRegistry,
        );
        // Kill the background probe so only set_health drives transitions.
        if let Some(handle) = monitor.inner.probes.lock().remove("orders") {
            handle.abort();
        }

        for _ in 0..3 {
            monitor.set_health("orders", false).unwrap();
        }
        let state = monitor.get_state("orders").unwrap();
        assert_eq!(state.status, SubgraphStatus::Unavailable);
        assert!(!state.is_mocking);
        assert_eq!(state.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_set_health_follows_transition_rules() {
        let monitor = monitor();
        monitor.register(
            "products",
            Some("http://products:4001/graphql".to_string()),
            SubgraphConfig {
                max_retries: 2,
                health_check_interval_ms: 300_000,
                ..Default::default()
            },
            SchemaSource::ApolloRegistry,
        );
        // Kill the background probe so only set_health drives transitions.
        if let Some(handle) = monitor.inner.probes.lock().remove("products") {
            handle.abort();
        }

        monitor.set_health("products", false).unwrap();
        let state = monitor.get_state("products").unwrap();
        assert_eq!(state.status, SubgraphStatus::Unavailable);

        monitor.set_health("products", false).unwrap();
        let state = monitor.get_state("products").unwrap();
        assert_eq!(state.status, SubgraphStatus::Mocking);

        let recovered = monitor.set_health("products", true).unwrap();
        assert_eq!(recovered.status, SubgraphStatus::Available);
        assert_eq!(recovered.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_check_health_unknown_subgraph() {
        let monitor = monitor();
        let err = monitor.check_health("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
        assert!(monitor.set_health("ghost", true).is_err());
    }

    #[tokio::test]
    async fn test_periodic_probe_runs() {
        let healthy = Arc::new(AtomicBool::new(true));
        let hits = Arc::new(AtomicU32::new(0));
        let url = spawn_upstream(healthy, hits.clone()).await;

        let monitor = monitor();
        monitor.register(
            "products",
            Some(url),
            SubgraphConfig {
                // Validation floors this at 5s for real configs; the monitor
                // itself takes whatever it is given, which tests exploit.
                health_check_interval_ms: 25,
                ..Default::default()
            },
            SchemaSource::ApolloRegistry,
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(hits.load(Ordering::SeqCst) >= 2);
        let state = monitor.get_state("products").unwrap();
        assert_eq!(state.status, SubgraphStatus::Available);
        assert!(state.is_healthy);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_config() {
        let monitor = monitor();
        monitor.register(
            "products",
            Some("http://products:4001/graphql".to_string()),
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );
        monitor.register(
            "products",
            Some("http://products:4001/graphql".to_string()),
            SubgraphConfig {
                force_mock: true,
                ..Default::default()
            },
            SchemaSource::LocalIntrospection,
        );

        let state = monitor.get_state("products").unwrap();
        assert!(state.config.force_mock);
        assert_eq!(state.schema_source, SchemaSource::LocalIntrospection);
        assert_eq!(state.status, SubgraphStatus::Mocking);
        assert!(monitor.inner.probes.lock().is_empty());
        assert_eq!(monitor.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_url() {
        let monitor = monitor();
        monitor.register(
            "products",
            Some("http://products:4001/graphql".to_string()),
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );

        let found = monitor.find_by_url("http://products:4001/graphql").unwrap();
        assert_eq!(found.name, "products");
        assert!(monitor.find_by_url("http://other:4000/graphql").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_drops_everything() {
        let monitor = monitor();
        monitor.register(
            "a",
            Some("http://a:4001/graphql".to_string()),
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );
        monitor.register(
            "b",
            None,
            SubgraphConfig::default(),
            SchemaSource::ApolloRegistry,
        );

        monitor.shutdown();
        assert!(monitor.is_empty());
        assert!(monitor.get_state("a").is_none());
        assert!(monitor.inner.probes.lock().is_empty());
    }

    #[test]
    fn test_schema_source_derivation() {
        let local = SubgraphConfig {
            use_local_schema: true,
            ..Default::default()
        };
        assert_eq!(
            SchemaSource::derive(&local, true),
            SchemaSource::LocalIntrospection
        );

        let file = SubgraphConfig {
            schema_file: Some("x.graphql".to_string()),
            ..Default::default()
        };
        assert_eq!(
            SchemaSource::derive(&file, false),
            SchemaSource::LocalIntrospection
        );

        let registry = SubgraphConfig::default();
        assert_eq!(
            SchemaSource::derive(&registry, true),
            SchemaSource::ApolloRegistry
        );
        assert_eq!(SchemaSource::derive(&registry, false), SchemaSource::Unknown);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SubgraphStatus::Mocking).unwrap(),
            serde_json::json!("mocking")
        );
        assert_eq!(
            serde_json::to_value(SchemaSource::ApolloRegistry).unwrap(),
            serde_json::json!("apollo-registry")
        );
    }
}
