//! Schema registry clients.
//!
//! The proxy discovers subgraphs and fetches their SDL from a central
//! registry. [`SchemaRegistry`] is the seam: the production implementation
//! talks to the Apollo Platform API, and [`StaticRegistry`] serves fixed
//! SDL for tests and air-gapped development.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A subgraph as listed by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySubgraph {
    pub name: String,
    /// Routing URL; may be absent for subgraphs that are schema-only
    pub url: Option<String>,
}

/// Source of subgraph listings and SDL.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// List every subgraph of the configured graph variant. An empty list is
    /// a valid answer.
    async fn list_subgraphs(&self) -> Result<Vec<RegistrySubgraph>>;

    /// Fetch the current SDL for one subgraph.
    async fn fetch_sdl(&self, name: &str) -> Result<String>;
}

/// Shared trait object handed to the schema cache and bootstrap.
pub type SharedRegistry = Arc<dyn SchemaRegistry>;

const APOLLO_API_ENDPOINT: &str = "https://api.apollographql.com/api/graphql";

const LIST_SUBGRAPHS_QUERY: &str = r#"
query ProxySubgraphList($ref: ID!) {
  variant(ref: $ref) {
    ... on GraphVariant {
      subgraphs {
        name
        url
        activePartialSchema { sdl }
      }
    }
  }
}
"#;

/// Registry client backed by the Apollo Platform API.
///
/// Authenticates with an `x-api-key` header and addresses the graph by
/// `graph_id@variant` ref, the same way rover does.
#[derive(Debug, Clone)]
pub struct ApolloPlatformRegistry {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    graph_ref: String,
}

#[derive(Debug, Deserialize)]
struct PlatformResponse {
    data: Option<PlatformData>,
    errors: Option<Vec<PlatformError>>,
}

#[derive(Debug, Deserialize)]
struct PlatformError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlatformData {
    variant: Option<PlatformVariant>,
}

#[derive(Debug, Deserialize)]
struct PlatformVariant {
    subgraphs: Option<Vec<PlatformSubgraph>>,
}

#[derive(Debug, Deserialize)]
struct PlatformSubgraph {
    name: String,
    url: Option<String>,
    #[serde(rename = "activePartialSchema")]
    active_partial_schema: Option<PlatformSchema>,
}

#[derive(Debug, Deserialize)]
struct PlatformSchema {
    sdl: Option<String>,
}

impl ApolloPlatformRegistry {
    pub fn new(api_key: impl Into<String>, graph_id: &str, variant: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: APOLLO_API_ENDPOINT.to_string(),
            api_key: api_key.into(),
            graph_ref: format!("{graph_id}@{variant}"),
        }
    }

    /// Point the client at a different API endpoint. Used by tests.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn query_variant(&self) -> Result<Vec<PlatformSubgraph>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&serde_json::json!({
                "query": LIST_SUBGRAPHS_QUERY,
                "variables": { "ref": self.graph_ref },
            }))
            .send()
            .await
            .map_err(|err| Error::SchemaFetch(format!("registry request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SchemaFetch(format!(
                "registry returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: PlatformResponse = response
            .json()
            .await
            .map_err(|err| Error::SchemaFetch(format!("invalid registry response: {err}")))?;

        if let Some(errors) = body.errors {
            if let Some(first) = errors.first() {
                return Err(Error::SchemaFetch(format!(
                    "registry error: {}",
                    first.message
                )));
            }
        }

        Ok(body
            .data
            .and_then(|d| d.variant)
            .and_then(|v| v.subgraphs)
            .unwrap_or_default())
    }
}

#[async_trait]
impl SchemaRegistry for ApolloPlatformRegistry {
    async fn list_subgraphs(&self) -> Result<Vec<RegistrySubgraph>> {
        let subgraphs = self.query_variant().await?;
        tracing::info!(
            graph_ref = %self.graph_ref,
            count = subgraphs.len(),
            "fetched subgraph list from Apollo registry"
        );
        Ok(subgraphs
            .into_iter()
            .map(|s| RegistrySubgraph {
                name: s.name,
                url: s.url,
            })
            .collect())
    }

    async fn fetch_sdl(&self, name: &str) -> Result<String> {
        let subgraphs = self.query_variant().await?;
        let subgraph = subgraphs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                Error::SchemaFetch(format!("registry has no subgraph named '{name}'"))
            })?;

        subgraph
            .active_partial_schema
            .and_then(|s| s.sdl)
            .filter(|sdl| !sdl.is_empty())
            .ok_or_else(|| {
                Error::SchemaFetch(format!("registry has no SDL for subgraph '{name}'"))
            })
    }
}

/// Fixed in-memory registry.
///
/// Serves a static subgraph list and SDL map; the workhorse for tests and for
/// running the proxy without Apollo credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    subgraphs: Vec<RegistrySubgraph>,
    sdl: HashMap<String, String>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subgraph with optional routing URL and SDL.
    pub fn with_subgraph(
        mut self,
        name: impl Into<String>,
        url: Option<&str>,
        sdl: impl Into<String>,
    ) -> Self {
        let name = name.into();
        self.subgraphs.push(RegistrySubgraph {
            name: name.clone(),
            url: url.map(|u| u.to_string()),
        });
        self.sdl.insert(name, sdl.into());
        self
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(self)
    }
}

#[async_trait]
impl SchemaRegistry for StaticRegistry {
    async fn list_subgraphs(&self) -> Result<Vec<RegistrySubgraph>> {
        Ok(self.subgraphs.clone())
    }

    async fn fetch_sdl(&self, name: &str) -> Result<String> {
        self.sdl
            .get(name)
            .filter(|sdl| !sdl.is_empty())
            .cloned()
            .ok_or_else(|| Error::SchemaFetch(format!("no SDL registered for '{name}'")))
    }
}
