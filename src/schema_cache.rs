//! Schema cache: multi-source loading, TTL expiry, warming, refresh.
//!
//! Per subgraph name the cache keeps at most one compiled schema. Entries
//! carry a content-addressed version (SHA-256 of the SDL) and expire after a
//! fixed TTL; a single background refresher reloads the currently-cached set
//! every TTL period. Loads go to the first applicable source:
//!
//! 1. `schemaFile`: SDL file inside the schema directory
//! 2. `useLocalSchema` + URL: federation introspection of the subgraph
//! 3. otherwise: the schema registry, by subgraph name
//!
//! Concurrent `get_schema` calls on a cold name may each trigger a load;
//! whichever finishes last wins the slot. Entries are swapped whole, so
//! readers never observe a torn entry.

use crate::config::SubgraphConfig;
use crate::error::{Error, Result};
use crate::introspection::IntrospectionClient;
use crate::registry::SharedRegistry;
use crate::schema::CompiledSchema;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// Content-addressed version of an SDL document: SHA-256, hex-encoded.
pub fn schema_version(sdl: &str) -> String {
    hex::encode(Sha256::digest(sdl.as_bytes()))
}

/// One cached schema.
#[derive(Debug, Clone)]
pub struct CachedSchemaEntry {
    /// The compiled schema handed out to the mock engine
    pub schema: Arc<CompiledSchema>,
    /// The SDL text the schema was built from
    pub sdl: String,
    /// SHA-256 of the SDL
    pub version: String,
    /// Wall-clock time of the fetch
    pub fetched_at: SystemTime,
    /// `fetched_at + TTL`
    pub expires_at: SystemTime,
}

impl CachedSchemaEntry {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }
}

/// Where to load a subgraph's schema from.
#[derive(Debug, Clone, Default)]
struct SourceConfig {
    url: Option<String>,
    config: SubgraphConfig,
}

struct CacheInner {
    ttl: Duration,
    schema_dir: PathBuf,
    registry: Option<SharedRegistry>,
    introspection: IntrospectionClient,
    entries: RwLock<HashMap<String, Arc<CachedSchemaEntry>>>,
    sources: RwLock<HashMap<String, SourceConfig>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

/// Concurrent schema cache with TTL and a periodic background refresher.
#[derive(Clone)]
pub struct SchemaCache {
    inner: Arc<CacheInner>,
}

impl SchemaCache {
    pub fn new(ttl: Duration, schema_dir: PathBuf, registry: Option<SharedRegistry>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                schema_dir,
                registry,
                introspection: IntrospectionClient::new(),
                entries: RwLock::new(HashMap::new()),
                sources: RwLock::new(HashMap::new()),
                refresher: Mutex::new(None),
            }),
        }
    }

    /// Record where `name`'s schema is loaded from. Re-registering replaces
    /// the previous source atomically.
    pub fn set_subgraph_config(&self, name: &str, url: Option<String>, config: SubgraphConfig) {
        self.inner
            .sources
            .write()
            .insert(name.to_string(), SourceConfig { url, config });
    }

    /// True iff an unexpired entry exists for `name`.
    pub fn has(&self, name: &str) -> bool {
        self.inner
            .entries
            .read()
            .get(name)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Unexpired entry for `name`, if present. Never triggers a load.
    pub fn peek(&self, name: &str) -> Option<Arc<CachedSchemaEntry>> {
        self.inner
            .entries
            .read()
            .get(name)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Number of cached entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the schema for `name`, loading and caching it on miss or expiry.
    pub async fn get_schema(&self, name: &str) -> Result<Arc<CachedSchemaEntry>> {
        if let Some(entry) = self.peek(name) {
            return Ok(entry);
        }

        let entry = Arc::new(load_entry(&self.inner, name).await?);
        self.inner
            .entries
            .write()
            .insert(name.to_string(), entry.clone());
        tracing::info!(
            subgraph = %name,
            version = %entry.version,
            "schema cached"
        );
        Ok(entry)
    }

    /// Load many names concurrently. Individual failures are logged and do
    /// not abort the others; returns how many loads succeeded.
    pub async fn warm(&self, names: &[String]) -> usize {
        let loads = names.iter().map(|name| async move {
            (name.as_str(), self.get_schema(name).await)
        });
        let results = futures::future::join_all(loads).await;

        let mut warmed = 0;
        for (name, result) in results {
            match result {
                Ok(_) => warmed += 1,
                Err(err) => {
                    tracing::warn!(subgraph = %name, error = %err, "cache warm failed");
                }
            }
        }
        warmed
    }

    /// Start the background refresher. It runs every TTL period and reloads
    /// exactly the names that are cached at that moment.
    ///
    /// # Panics
    ///
    /// Panics if the refresher is already running; starting it twice is a
    /// programming error.
    pub fn start_periodic_refresh(&self) {
        let mut slot = self.inner.refresher.lock();
        if slot.is_some() {
            panic!("schema cache periodic refresh already started");
        }

        let inner = self.inner.clone();
        let ttl = inner.ttl;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            // The first tick of a tokio interval fires immediately; skip it so
            // the first refresh lands one TTL after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                refresh_all(&inner).await;
            }
        }));
        tracing::info!(ttl_ms = ttl.as_millis() as u64, "schema refresh started");
    }

    /// Stop the background refresher. Safe to call when it is not running.
    pub fn stop_periodic_refresh(&self) {
        if let Some(handle) = self.inner.refresher.lock().take() {
            handle.abort();
            tracing::info!("schema refresh stopped");
        }
    }
}

async fn refresh_all(inner: &Arc<CacheInner>) {
    let names: Vec<String> = inner.entries.read().keys().cloned().collect();
    tracing::debug!(count = names.len(), "refreshing cached schemas");

    for name in names {
        match load_entry(inner, &name).await {
            Ok(entry) => {
                inner
                    .entries
                    .write()
                    .insert(name.clone(), Arc::new(entry));
                tracing::debug!(subgraph = %name, "schema refreshed");
            }
            Err(err) => {
                // Keep serving the stale entry; the next cycle retries.
                tracing::warn!(subgraph = %name, error = %err, "schema refresh failed");
            }
        }
    }
}

async fn load_entry(inner: &Arc<CacheInner>, name: &str) -> Result<CachedSchemaEntry> {
    let source = inner
        .sources
        .read()
        .get(name)
        .cloned()
        .unwrap_or_default();

    let sdl = load_sdl(inner, name, &source).await?;
    let schema = CompiledSchema::parse(&sdl)?;
    let version = schema_version(&sdl);
    let fetched_at = SystemTime::now();

    Ok(CachedSchemaEntry {
        schema: Arc::new(schema),
        sdl,
        version,
        fetched_at,
        expires_at: fetched_at + inner.ttl,
    })
}

async fn load_sdl(inner: &Arc<CacheInner>, name: &str, source: &SourceConfig) -> Result<String> {
    if let Some(file) = &source.config.schema_file {
        let path = inner.schema_dir.join(file);
        tracing::debug!(subgraph = %name, path = %path.display(), "loading schema from file");
        return tokio::fs::read_to_string(&path).await.map_err(|err| {
            Error::SchemaFetch(format!("cannot read schema file {}: {err}", path.display()))
        });
    }

    if source.config.use_local_schema {
        let Some(url) = &source.url else {
            return Err(Error::SchemaFetch(format!(
                "subgraph '{name}' uses a local schema but has neither a URL nor a schema file"
            )));
        };
        tracing::debug!(subgraph = %name, url = %url, "loading schema via introspection");
        return inner
            .introspection
            .fetch_sdl(
                url,
                &source.config.introspection_headers,
                source.config.max_retries,
                source.config.retry_delay(),
            )
            .await;
    }

    let Some(registry) = &inner.registry else {
        return Err(Error::SchemaFetch(format!(
            "subgraph '{name}' needs the schema registry but none is configured"
        )));
    };
    tracing::debug!(subgraph = %name, "loading schema from registry");
    registry.fetch_sdl(name).await
}
