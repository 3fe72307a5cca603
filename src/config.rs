//! Proxy configuration: environment variables and the subgraph config file.
//!
//! Configuration comes from two places:
//!
//! 1. Environment variables for process-wide settings (port, Apollo registry
//!    credentials, cache TTL, health probe timing, passthrough toggles).
//! 2. An optional JSON file (`subgraph-config.json` by default) holding
//!    per-subgraph overrides: `{ "subgraphs": { "<name>": { ... } } }`.
//!
//! Invalid values are configuration errors, never silent fallbacks. The file
//! being absent is fine; a file that fails to parse or validate is not.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of consecutive failures tolerated before a subgraph
/// transitions to mocking.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between introspection retry attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default health probe period per subgraph.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

/// Default schema cache TTL.
pub const DEFAULT_SCHEMA_CACHE_TTL_MS: u64 = 300_000;

/// Default health probe timeout.
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;

/// Process-wide proxy configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen port for the HTTP surface
    pub port: u16,
    /// Apollo registry API key (`APOLLO_KEY`); registry access is disabled without it
    pub apollo_key: Option<String>,
    /// Apollo graph ref id (`APOLLO_GRAPH_ID`)
    pub apollo_graph_id: Option<String>,
    /// Apollo graph variant (`APOLLO_GRAPH_VARIANT`, default "current")
    pub apollo_graph_variant: String,
    /// Schema cache entry lifetime
    pub schema_cache_ttl: Duration,
    /// Default probe period for subgraphs without an explicit override
    pub subgraph_check_interval: Duration,
    /// Timeout for a single health probe
    pub subgraph_health_timeout: Duration,
    /// Global passthrough switch; when off every request is mocked
    pub enable_passthrough: bool,
    /// Fall back to mocking when a passthrough upstream fails
    pub mock_on_error: bool,
    /// Directory holding `.graphql` SDL files referenced by `schemaFile`
    pub schema_dir: PathBuf,
    /// Directory scanned for the declarative mock resolver file
    pub mocks_dir: PathBuf,
    /// Path of the subgraph config file
    pub subgraph_config_file: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            apollo_key: None,
            apollo_graph_id: None,
            apollo_graph_variant: "current".to_string(),
            schema_cache_ttl: Duration::from_millis(DEFAULT_SCHEMA_CACHE_TTL_MS),
            subgraph_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            subgraph_health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            enable_passthrough: true,
            mock_on_error: true,
            schema_dir: PathBuf::from("schemas"),
            mocks_dir: PathBuf::from("mocks"),
            subgraph_config_file: PathBuf::from("subgraph-config.json"),
        }
    }
}

impl ProxyConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through a lookup function.
    ///
    /// Kept separate from [`ProxyConfig::from_env`] so tests can inject values
    /// without mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got '{raw}'")))?,
            None => defaults.port,
        };

        Ok(Self {
            port,
            apollo_key: lookup("APOLLO_KEY").filter(|v| !v.is_empty()),
            apollo_graph_id: lookup("APOLLO_GRAPH_ID").filter(|v| !v.is_empty()),
            apollo_graph_variant: lookup("APOLLO_GRAPH_VARIANT")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.apollo_graph_variant),
            schema_cache_ttl: millis_var(&lookup, "SCHEMA_CACHE_TTL_MS", defaults.schema_cache_ttl)?,
            subgraph_check_interval: millis_var(
                &lookup,
                "SUBGRAPH_CHECK_INTERVAL_MS",
                defaults.subgraph_check_interval,
            )?,
            subgraph_health_timeout: millis_var(
                &lookup,
                "SUBGRAPH_HEALTH_TIMEOUT_MS",
                defaults.subgraph_health_timeout,
            )?,
            enable_passthrough: bool_var(&lookup, "ENABLE_PASSTHROUGH", defaults.enable_passthrough)?,
            mock_on_error: bool_var(&lookup, "MOCK_ON_ERROR", defaults.mock_on_error)?,
            schema_dir: lookup("SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_dir),
            mocks_dir: lookup("MOCKS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.mocks_dir),
            subgraph_config_file: lookup("SUBGRAPH_CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.subgraph_config_file),
        })
    }

    /// True when the Apollo registry credentials are complete.
    pub fn registry_enabled(&self) -> bool {
        self.apollo_key.is_some() && self.apollo_graph_id.is_some()
    }
}

fn millis_var<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => {
            let ms = raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("{key} must be a millisecond count, got '{raw}'"))
            })?;
            if ms == 0 {
                return Err(Error::Config(format!("{key} must be positive")));
            }
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

fn bool_var<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Config(format!("{key} must be a boolean, got '{raw}'"))),
        },
        None => Ok(default),
    }
}

/// Per-subgraph configuration options.
///
/// The recognized set is exhaustive; unknown keys in the config file are
/// rejected so typos surface at startup instead of silently changing behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SubgraphConfig {
    /// Always mock this subgraph; health probing is skipped entirely
    pub force_mock: bool,
    /// Never mock this subgraph; failures surface as errors
    pub disable_mocking: bool,
    /// Load the schema by introspection (or file) instead of the registry
    pub use_local_schema: bool,
    /// SDL file name inside the schema directory; takes precedence over introspection
    pub schema_file: Option<String>,
    /// Extra headers sent only on introspection requests
    pub introspection_headers: HashMap<String, String>,
    /// Consecutive failures tolerated before the mocking transition (0-10)
    pub max_retries: u32,
    /// Delay between introspection retries in milliseconds (100-30000)
    pub retry_delay_ms: u64,
    /// Health probe period in milliseconds (5000-300000)
    pub health_check_interval_ms: u64,
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            force_mock: false,
            disable_mocking: false,
            use_local_schema: false,
            schema_file: None,
            introspection_headers: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        }
    }
}

impl SubgraphConfig {
    /// Validate option combinations and numeric ranges.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.force_mock && self.disable_mocking {
            return Err(Error::Config(format!(
                "subgraph '{name}': forceMock and disableMocking are mutually exclusive"
            )));
        }
        if self.max_retries > 10 {
            return Err(Error::Config(format!(
                "subgraph '{name}': maxRetries must be between 0 and 10, got {}",
                self.max_retries
            )));
        }
        if !(100..=30_000).contains(&self.retry_delay_ms) {
            return Err(Error::Config(format!(
                "subgraph '{name}': retryDelayMs must be between 100 and 30000, got {}",
                self.retry_delay_ms
            )));
        }
        if !(5_000..=300_000).contains(&self.health_check_interval_ms) {
            return Err(Error::Config(format!(
                "subgraph '{name}': healthCheckIntervalMs must be between 5000 and 300000, got {}",
                self.health_check_interval_ms
            )));
        }
        Ok(())
    }

    /// Probe period as a [`Duration`].
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Shape of the subgraph config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubgraphConfigFile {
    #[serde(default)]
    pub subgraphs: HashMap<String, SubgraphConfig>,
}

impl SubgraphConfigFile {
    /// Load and validate the config file at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist; any other read,
    /// parse, or validation failure is an error.
    pub fn load(path: &Path, global: &ProxyConfig) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::Config(format!(
                    "cannot read subgraph config {}: {err}",
                    path.display()
                )))
            }
        };

        let file: SubgraphConfigFile = serde_json::from_str(&raw).map_err(|err| {
            Error::Config(format!(
                "cannot parse subgraph config {}: {err}",
                path.display()
            ))
        })?;
        file.validate(global)?;
        Ok(Some(file))
    }

    /// Validate every subgraph entry, including combinations that only make
    /// sense relative to the global configuration.
    pub fn validate(&self, global: &ProxyConfig) -> Result<()> {
        for (name, config) in &self.subgraphs {
            config.validate(name)?;
            // disableMocking with passthrough globally off leaves no way to
            // answer a request for this subgraph.
            if config.disable_mocking && !global.enable_passthrough {
                return Err(Error::Config(format!(
                    "subgraph '{name}': disableMocking with ENABLE_PASSTHROUGH=false leaves no viable routing path"
                )));
            }
        }
        Ok(())
    }
}
