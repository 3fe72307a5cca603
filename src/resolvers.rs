//! Mock resolver sources.
//!
//! Custom mock values come from a declarative document mapping GraphQL type
//! names to value templates, with an optional `_globals` section shared by
//! every subgraph:
//!
//! ```json
//! {
//!     "_globals": { "Product": { "name": "Globally mocked" } },
//!     "products": { "Query": { "products": [{ "id": "p1" }] } }
//! }
//! ```
//!
//! [`ResolverSourceLoader`] is the seam: [`FileResolverSource`] reads
//! `mocks.json` from the mocks directory and caches it until invalidated;
//! [`StaticResolverSource`] serves a fixed document for tests and embedding.
//! Loading is infallible by design: a missing or broken document degrades to
//! built-in defaults with a log line, never a failed request.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-type value templates: GraphQL type name → JSON template.
///
/// An object template overrides individual fields of mocked objects of that
/// type; any other JSON value replaces the generated value outright.
pub type ResolverMap = serde_json::Map<String, serde_json::Value>;

/// A parsed mock document: global templates plus per-subgraph maps.
#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    pub globals: ResolverMap,
    pub subgraphs: HashMap<String, ResolverMap>,
}

impl MockDocument {
    /// Parse the on-disk shape: a JSON object whose `_globals` key holds the
    /// shared map and whose remaining keys are subgraph names.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let serde_json::Value::Object(top) = value else {
            return Err("mock document must be a JSON object".to_string());
        };

        let mut document = MockDocument::default();
        for (key, entry) in top {
            let serde_json::Value::Object(map) = entry else {
                return Err(format!("mock entry '{key}' must be an object of type templates"));
            };
            if key == "_globals" {
                document.globals = map;
            } else {
                document.subgraphs.insert(key, map);
            }
        }
        Ok(document)
    }

    /// The subgraph-specific map, if one was configured.
    pub fn subgraph(&self, name: &str) -> Option<&ResolverMap> {
        self.subgraphs.get(name)
    }
}

/// Source of mock resolver documents.
#[async_trait]
pub trait ResolverSourceLoader: Send + Sync {
    /// Current document. Implementations cache and never fail; a source that
    /// cannot be read yields the empty document.
    async fn load(&self) -> Arc<MockDocument>;

    /// Drop any cached document so the next [`load`](Self::load) re-reads.
    fn invalidate(&self);
}

/// Shared trait object used by the mock engine.
pub type SharedResolverSource = Arc<dyn ResolverSourceLoader>;

/// File-based resolver source reading `mocks.json` from a directory.
pub struct FileResolverSource {
    dir: PathBuf,
    cached: RwLock<Option<Arc<MockDocument>>>,
}

impl FileResolverSource {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cached: RwLock::new(None),
        }
    }

    pub fn into_shared(self) -> SharedResolverSource {
        Arc::new(self)
    }

    fn read_document(&self) -> MockDocument {
        let path = self.dir.join("mocks.json");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // A script-based mock module cannot be loaded at runtime;
                // point at the declarative format instead of failing.
                for script in ["mocks.js", "mocks.ts"] {
                    if self.dir.join(script).exists() {
                        tracing::warn!(
                            path = %self.dir.join(script).display(),
                            "found a script mock module; only declarative mocks.json is loadable, continuing with defaults"
                        );
                        return MockDocument::default();
                    }
                }
                tracing::debug!(dir = %self.dir.display(), "no mock document found, using defaults");
                return MockDocument::default();
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "cannot read mock document, using defaults"
                );
                return MockDocument::default();
            }
        };

        match serde_json::from_str::<serde_json::Value>(&raw)
            .map_err(|err| err.to_string())
            .and_then(MockDocument::from_value)
        {
            Ok(document) => {
                tracing::info!(
                    path = %path.display(),
                    subgraphs = document.subgraphs.len(),
                    globals = document.globals.len(),
                    "mock document loaded"
                );
                document
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "cannot parse mock document, using defaults"
                );
                MockDocument::default()
            }
        }
    }
}

#[async_trait]
impl ResolverSourceLoader for FileResolverSource {
    async fn load(&self) -> Arc<MockDocument> {
        if let Some(document) = self.cached.read().clone() {
            return document;
        }
        let document = Arc::new(self.read_document());
        *self.cached.write() = Some(document.clone());
        document
    }

    fn invalidate(&self) {
        *self.cached.write() = None;
        tracing::debug!("mock document cache invalidated");
    }
}

/// Fixed in-memory resolver source.
#[derive(Default)]
pub struct StaticResolverSource {
    document: Arc<MockDocument>,
}

impl StaticResolverSource {
    pub fn new(document: MockDocument) -> Self {
        Self {
            document: Arc::new(document),
        }
    }

    /// Build from the same JSON shape the file source reads.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        Ok(Self::new(MockDocument::from_value(value)?))
    }

    pub fn into_shared(self) -> SharedResolverSource {
        Arc::new(self)
    }
}

#[async_trait]
impl ResolverSourceLoader for StaticResolverSource {
    async fn load(&self) -> Arc<MockDocument> {
        self.document.clone()
    }

    fn invalidate(&self) {}
}
