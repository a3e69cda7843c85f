//! Configuration module for the similarity engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.civicsim/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CS_` and use double underscores
//! to separate nested levels:
//! - `CS_SEARCH__THRESHOLD=0.75` sets `search.threshold`
//! - `CS_CLUSTERING__MIN_SIMILARITY=0.85` sets `clustering.min_similarity`
//! - `CS_EMBEDDING__TIMEOUT_SECS=20` sets `embedding.timeout_secs`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, EngineResult, StorageContext};

const CONFIG_DIR: &str = ".civicsim";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "CS_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding persisted vectors and the model cache
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .civicsim is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Upper bound on a single embedding call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,

    /// Results must score strictly above this
    #[serde(default = "default_search_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusteringConfig {
    /// Pairs must score strictly above this to link two records
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Status filter applied when none is given; empty means no filter
    #[serde(default = "default_cluster_status")]
    pub default_status: String,

    /// Number of threads scoring pairs
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Pool size that triggers a warning
    #[serde(default = "default_large_pool_warning")]
    pub large_pool_warning: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".civicsim/index")
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_timeout_secs() -> u64 {
    crate::vector::DEFAULT_EMBED_TIMEOUT.as_secs()
}
fn default_search_limit() -> usize {
    crate::search::DEFAULT_SEARCH_LIMIT
}
fn default_similar_limit() -> usize {
    crate::search::DEFAULT_SIMILAR_LIMIT
}
fn default_search_threshold() -> f32 {
    crate::search::DEFAULT_SEARCH_THRESHOLD
}
fn default_min_similarity() -> f32 {
    crate::clustering::DEFAULT_MIN_SIMILARITY
}
fn default_cluster_status() -> String {
    "reported".to_string()
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_large_pool_warning() -> usize {
    crate::clustering::DEFAULT_LARGE_POOL_WARNING
}
fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            clustering: ClusteringConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            show_download_progress: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            similar_limit: default_similar_limit(),
            threshold: default_search_threshold(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            default_status: default_cluster_status(),
            parallel_threads: default_parallel_threads(),
            large_pool_warning: default_large_pool_warning(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClusteringConfig {
    /// The configured default status, or `None` when it is blank.
    pub fn status_filter(&self) -> Option<&str> {
        let status = self.default_status.trim();
        (!status.is_empty()).then_some(status)
    }
}

fn config_error(e: figment::Error) -> EngineError {
    EngineError::Config {
        reason: e.to_string(),
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> EngineResult<Self> {
        // Try to find the workspace root by looking for .civicsim directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| Path::new(CONFIG_DIR).join(CONFIG_FILE));

        let mut settings = Self::layered(&config_path, ENV_PREFIX)?;
        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        Ok(settings)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> EngineResult<Self> {
        Self::layered(path.as_ref(), ENV_PREFIX)
    }

    fn layered(config_path: &Path, env_prefix: &str) -> EngineResult<Self> {
        let settings: Settings = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels
            .merge(Env::prefixed(env_prefix).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find the workspace config by looking for a .civicsim directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .civicsim is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |reason: String| Err(EngineError::Config { reason });

        for (name, value) in [
            ("search.threshold", self.search.threshold),
            ("clustering.min_similarity", self.clustering.min_similarity),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} = {value} is outside [0, 1]"));
            }
        }
        for (name, value) in [
            ("search.default_limit", self.search.default_limit),
            ("search.similar_limit", self.search.similar_limit),
            ("clustering.parallel_threads", self.clustering.parallel_threads),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }
        if self.embedding.timeout_secs == 0 {
            return invalid("embedding.timeout_secs must be at least 1".to_string());
        }
        crate::vector::parse_embedding_model(&self.embedding.model)?;
        Ok(())
    }

    /// Resolve a configured path against the workspace root.
    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Directory holding the persisted vector store.
    pub fn vectors_dir(&self) -> PathBuf {
        self.resolve(&self.index_path).join("vectors")
    }

    /// Directory where fastembed caches downloaded models.
    pub fn models_dir(&self) -> PathBuf {
        self.resolve(&self.index_path).join("models")
    }

    /// Snapshot of the last indexed record dataset.
    pub fn records_path(&self) -> PathBuf {
        self.resolve(&self.index_path).join("records.json")
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at_path(parent)?;
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| EngineError::Config {
            reason: format!("failed to serialize settings: {e}"),
        })?;
        std::fs::write(path, toml_string).at_path(path)
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> EngineResult<PathBuf> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Same as [`init_config_file`](Self::init_config_file) under `root`.
    pub fn init_config_file_in(root: &Path, force: bool) -> EngineResult<PathBuf> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(EngineError::Config {
                reason: format!(
                    "{} already exists. Use --force to overwrite",
                    config_path.display()
                ),
            });
        }

        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).at_path(&config_dir)?;

        let defaults = Settings::default();
        let template = format!(
            r#"# civicsim configuration

# Version of the configuration schema
version = {version}

# Persisted vectors and model cache (relative to the workspace root)
index_path = "{index_path}"

# Global debug mode
debug = false

[embedding]
# fastembed model: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15,
# ParaphraseMLMiniLML12V2, MultilingualE5Small
model = "{model}"
# Seconds to wait for one embedding before giving up
timeout_secs = {timeout}
show_download_progress = false

[search]
default_limit = {limit}
similar_limit = {similar}
# Results must score strictly above this
threshold = {threshold}

[clustering]
min_similarity = {min_similarity}
# Status used when clustering without --status; "" clusters every status
default_status = "{status}"
# Threads scoring pairs (defaults to CPU count)
# parallel_threads = {threads}
large_pool_warning = {large_pool}

[server]
bind = "{bind}"
"#,
            version = defaults.version,
            index_path = defaults.index_path.display(),
            model = defaults.embedding.model,
            timeout = defaults.embedding.timeout_secs,
            limit = defaults.search.default_limit,
            similar = defaults.search.similar_limit,
            threshold = defaults.search.threshold,
            min_similarity = defaults.clustering.min_similarity,
            status = defaults.clustering.default_status,
            threads = defaults.clustering.parallel_threads,
            large_pool = defaults.clustering.large_pool_warning,
            bind = defaults.server.bind,
        );

        std::fs::write(&config_path, template).at_path(&config_path)?;
        tracing::info!("Created {}", config_path.display());
        Ok(config_path)
    }
}
