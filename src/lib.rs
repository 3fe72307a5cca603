//! # subgraph-mock-proxy
//!
//! A GraphQL-aware reverse proxy that sits between an Apollo Federation
//! router and its subgraph services. Per request it decides whether to
//! forward to the real subgraph ("passthrough") or synthesize a
//! schema-conformant response from a cached schema ("mock"), so a federated
//! graph keeps composing and serving while individual subgraphs are down.
//!
//! ## Main Components
//!
//! - [`RequestRouter`]: decodes each `POST /{encodedUrl}` request and picks
//!   passthrough or mock based on subgraph state.
//! - [`HealthMonitor`]: per-subgraph probe timers and the state machine that
//!   collapses repeated failures into a stable `mocking` state.
//! - [`SchemaCache`]: TTL-bound schema store fed from SDL files, federation
//!   introspection, or a schema registry, with background refresh.
//! - [`MockEngine`]: executes GraphQL operations against a cached schema
//!   with layered, declarative resolver templates.
//! - [`PassthroughEngine`]: header-hygienic forwarding with an
//!   introspection-from-cache fallback when the upstream is unreachable.
//! - [`ProxyServer`]: the axum application tying everything together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use subgraph_mock_proxy::{ProxyConfig, ProxyServer};
//! use subgraph_mock_proxy::registry::StaticRegistry;
//! use subgraph_mock_proxy::resolvers::FileResolverSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProxyConfig::from_env()?;
//!     let registry = StaticRegistry::new()
//!         .with_subgraph(
//!             "products",
//!             Some("http://localhost:4001/graphql"),
//!             "type Product { id: ID! } type Query { products: [Product!]! }",
//!         )
//!         .into_shared();
//!     let mocks = FileResolverSource::new(config.mocks_dir.clone()).into_shared();
//!
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//!     let proxy = ProxyServer::build(config, Some(registry), mocks).await?;
//!     proxy.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod health;
pub mod introspection;
pub mod mock;
pub mod passthrough;
pub mod registry;
pub mod resolvers;
pub mod router;
pub mod schema;
pub mod schema_cache;
pub mod server;
pub mod shutdown;

pub use bootstrap::BootstrapSummary;
pub use config::{ProxyConfig, SubgraphConfig, SubgraphConfigFile};
pub use error::{Error, GraphQLError, GraphQLErrorResponse, Result};
pub use health::{HealthMonitor, SchemaSource, SubgraphState, SubgraphStatus};
pub use introspection::{
    is_federation_introspection, IntrospectionClient, FEDERATION_INTROSPECTION_QUERY,
};
pub use mock::{MockEngine, MockExecution, MockRequest};
pub use passthrough::{sanitize_headers, PassthroughEngine, PassthroughResponse};
pub use registry::{ApolloPlatformRegistry, SchemaRegistry, SharedRegistry, StaticRegistry};
pub use resolvers::{
    FileResolverSource, MockDocument, ResolverMap, ResolverSourceLoader, SharedResolverSource,
    StaticResolverSource,
};
pub use router::{decode_request, decode_target_url, DecodedRequest, RequestRouter};
pub use schema::CompiledSchema;
pub use schema_cache::{schema_version, CachedSchemaEntry, SchemaCache};
pub use server::ProxyServer;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
