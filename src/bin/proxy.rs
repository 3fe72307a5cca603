//! Proxy entry point: environment configuration in, graceful shutdown out.

use subgraph_mock_proxy::registry::{ApolloPlatformRegistry, SharedRegistry};
use subgraph_mock_proxy::resolvers::FileResolverSource;
use subgraph_mock_proxy::{ProxyConfig, ProxyServer};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("LOG_LEVEL")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ProxyConfig::from_env()?;

    let registry: Option<SharedRegistry> = match (&config.apollo_key, &config.apollo_graph_id) {
        (Some(key), Some(graph_id)) => {
            tracing::info!(graph_id = %graph_id, variant = %config.apollo_graph_variant, "using Apollo schema registry");
            Some(Arc::new(ApolloPlatformRegistry::new(
                key.clone(),
                graph_id,
                &config.apollo_graph_variant,
            )))
        }
        _ => {
            tracing::warn!("APOLLO_KEY/APOLLO_GRAPH_ID not set, running without a schema registry");
            None
        }
    };

    let mocks = FileResolverSource::new(config.mocks_dir.clone()).into_shared();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let proxy = ProxyServer::build(config, registry, mocks).await?;
    proxy.serve(listener).await?;
    Ok(())
}
