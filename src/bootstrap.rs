//! Three-phase startup: registry discovery, local overrides, cache warming.
//!
//! 1. Fetch the full subgraph list from the registry (an empty list is fine).
//! 2. Load the optional local config file and validate it.
//! 3. Register every registry subgraph with defaults, then re-register the
//!    locally configured ones with their overrides, point the schema cache at
//!    the right source for each, and warm the cache for everything the
//!    registry knows about. Warm failures are isolated per subgraph.

use crate::config::{ProxyConfig, SubgraphConfig, SubgraphConfigFile};
use crate::error::Result;
use crate::health::{HealthMonitor, SchemaSource};
use crate::registry::SharedRegistry;
use crate::schema_cache::SchemaCache;

/// Counts emitted after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub total_subgraphs: usize,
    pub from_apollo: usize,
    pub local_overrides: usize,
}

/// Run the three-phase initialization.
pub async fn initialize(
    config: &ProxyConfig,
    registry: Option<&SharedRegistry>,
    health: &HealthMonitor,
    schema_cache: &SchemaCache,
) -> Result<BootstrapSummary> {
    // Phase 1: discovery.
    let discovered = match registry {
        Some(registry) => registry.list_subgraphs().await?,
        None => {
            tracing::info!("no registry configured, starting from local config only");
            Vec::new()
        }
    };
    let from_apollo = discovered.len();

    // Phase 2: local overrides.
    let local = SubgraphConfigFile::load(&config.subgraph_config_file, config)?
        .unwrap_or_default();
    let local_overrides = local.subgraphs.len();

    // Phase 3: registration. Registry subgraphs get the default config with
    // the globally configured probe period.
    let registry_enabled = registry.is_some();
    let default_config = SubgraphConfig {
        health_check_interval_ms: config.subgraph_check_interval.as_millis() as u64,
        ..Default::default()
    };
    for subgraph in &discovered {
        let source = SchemaSource::derive(&default_config, registry_enabled);
        schema_cache.set_subgraph_config(&subgraph.name, subgraph.url.clone(), default_config.clone());
        health.register(&subgraph.name, subgraph.url.clone(), default_config.clone(), source);
    }

    for (name, subgraph_config) in &local.subgraphs {
        // Keep the registry-discovered URL when the subgraph exists there.
        let url = discovered
            .iter()
            .find(|s| &s.name == name)
            .and_then(|s| s.url.clone());
        let source = SchemaSource::derive(subgraph_config, registry_enabled);

        health.unregister(name);
        health.register(name, url.clone(), subgraph_config.clone(), source);
        schema_cache.set_subgraph_config(name, url, subgraph_config.clone());
    }

    let registry_names: Vec<String> = discovered.iter().map(|s| s.name.clone()).collect();
    let warmed = schema_cache.warm(&registry_names).await;

    let summary = BootstrapSummary {
        total_subgraphs: health.len(),
        from_apollo,
        local_overrides,
    };
    tracing::info!(
        total_subgraphs = summary.total_subgraphs,
        from_apollo = summary.from_apollo,
        local_overrides = summary.local_overrides,
        warmed,
        "proxy initialized"
    );
    Ok(summary)
}
