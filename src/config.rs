//! Configuration module for the taxonomy builder.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.taxonomist/settings.toml`)
//! - Environment variable overrides
//! - Per-request cluster overrides (HTTP body, CLI flags)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TX_` and use double underscores
//! to separate nested levels:
//! - `TX_CLUSTERING__MAX_LEVELS=4` sets `clustering.max_levels`
//! - `TX_LABELER__PROVIDER=keyword` sets `labeler.provider`
//! - `TX_LOGGING__LEVEL=debug` sets `logging.level`

use crate::error::BuildError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Smallest population the orchestrator will try to cluster.
pub const MIN_POPULATION: usize = 5;

/// Subdivision threshold for levels missing from `level_min_cluster_sizes`.
pub const DEFAULT_MIN_SIZE_TO_SUBDIVIDE: usize = 25;

/// Discovery cluster size when neither the level map nor the global value is set.
pub const DEFAULT_DISCOVERY_MIN_CLUSTER_SIZE: usize = 10;

/// Lower bound for derived `min_samples`.
pub const MIN_SAMPLES_FLOOR: usize = 3;

/// Lower bound for the reduced dimensionality at any level.
pub const MIN_COMPONENTS: usize = 2;

/// Hard ceiling on tree depth.
pub const MAX_LEVELS_LIMIT: u32 = 10;

const CONFIG_DIR: &str = ".taxonomist";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Clustering parameters used by every build unless overridden
    #[serde(default)]
    pub clustering: ClusterConfig,

    /// Topic labeling provider
    #[serde(default)]
    pub labeler: LabelerConfig,

    /// Record and topic storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How record-to-topic confidence is computed.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    /// `1 - min(avg_distance, 1.0)`, one value for every member of a cluster
    #[default]
    CentroidDistance,
    /// Per-record membership probability reported by the discoverer
    MembershipProbability,
}

/// Tunables for one taxonomy build.
///
/// Level maps are keyed by the level number as a string so they survive
/// TOML and environment layering (`[clustering.level_min_cluster_sizes]`
/// followed by `1 = 40`).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Target dimensionality at level 1; halved per level below it
    #[serde(default = "default_umap_n_components")]
    pub umap_n_components: usize,

    /// Neighborhood size for the reduction graph
    #[serde(default = "default_umap_n_neighbors")]
    pub umap_n_neighbors: usize,

    /// Minimum spacing of points in the reduced space
    #[serde(default = "default_umap_min_dist")]
    pub umap_min_dist: f32,

    /// Global discovery cluster size, used for levels missing from the level map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdbscan_min_cluster_size: Option<usize>,

    /// Global discovery density; derived from the cluster size when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdbscan_min_samples: Option<usize>,

    /// Most recent records loaded per build
    #[serde(default = "default_max_embeddings")]
    pub max_embeddings: usize,

    /// Maximum tree depth (1-10)
    #[serde(default = "default_max_levels")]
    pub max_levels: u32,

    /// Minimum cluster size that is subdivided further, per level
    #[serde(default = "default_level_min_cluster_sizes")]
    pub level_min_cluster_sizes: BTreeMap<String, usize>,

    /// Discovery cluster size per level
    #[serde(default = "default_level_hdbscan_min_cluster_sizes")]
    pub level_hdbscan_min_cluster_sizes: BTreeMap<String, usize>,

    /// Representative texts handed to the labeler per cluster
    #[serde(default = "default_representative_count")]
    pub representative_count: usize,

    #[serde(default)]
    pub confidence_mode: ConfidenceMode,
}

/// Which labeler implementation to build.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelerProvider {
    /// OpenAI-compatible chat and embeddings endpoints
    #[serde(rename = "openai")]
    OpenAi,
    /// Offline keyword extraction
    Keyword,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LabelerConfig {
    #[serde(default = "default_provider")]
    pub provider: LabelerProvider,

    /// Chat model used for titles and descriptions
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Model used to embed topic titles
    #[serde(default = "default_remote_embedding_model")]
    pub embedding_model: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Embed titles with a local fastembed model when using the keyword labeler
    #[serde(default = "default_false")]
    pub local_embeddings: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per tenant
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Build timeout in seconds (0 disables the timeout)
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default = "default_false")]
    pub json: bool,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_umap_n_components() -> usize {
    10
}
fn default_umap_n_neighbors() -> usize {
    15
}
fn default_umap_min_dist() -> f32 {
    0.1
}
fn default_max_embeddings() -> usize {
    100_000
}
fn default_max_levels() -> u32 {
    3
}
fn default_level_min_cluster_sizes() -> BTreeMap<String, usize> {
    level_map(&[(1, 40), (2, 20), (3, 10), (4, 10)])
}
fn default_level_hdbscan_min_cluster_sizes() -> BTreeMap<String, usize> {
    level_map(&[(1, 30), (2, 15), (3, 8), (4, 5)])
}
fn default_representative_count() -> usize {
    10
}
fn default_provider() -> LabelerProvider {
    LabelerProvider::OpenAi
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_remote_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    150
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".taxonomist/data")
}
fn default_bind_address() -> String {
    "127.0.0.1:8001".to_string()
}
fn default_build_timeout_secs() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}

fn level_map(entries: &[(u32, usize)]) -> BTreeMap<String, usize> {
    entries
        .iter()
        .map(|(level, size)| (level.to_string(), *size))
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            clustering: ClusterConfig::default(),
            labeler: LabelerConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            umap_n_components: default_umap_n_components(),
            umap_n_neighbors: default_umap_n_neighbors(),
            umap_min_dist: default_umap_min_dist(),
            hdbscan_min_cluster_size: None,
            hdbscan_min_samples: None,
            max_embeddings: default_max_embeddings(),
            max_levels: default_max_levels(),
            level_min_cluster_sizes: default_level_min_cluster_sizes(),
            level_hdbscan_min_cluster_sizes: default_level_hdbscan_min_cluster_sizes(),
            representative_count: default_representative_count(),
            confidence_mode: ConfidenceMode::default(),
        }
    }
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            embedding_model: default_remote_embedding_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            local_embeddings: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ClusterConfig {
    /// Minimum size a level-`level` cluster needs before it is subdivided.
    ///
    /// Falls back to [`DEFAULT_MIN_SIZE_TO_SUBDIVIDE`] for unmapped levels.
    #[must_use]
    pub fn min_size_to_subdivide(&self, level: u32) -> usize {
        self.level_min_cluster_sizes
            .get(&level.to_string())
            .copied()
            .unwrap_or(DEFAULT_MIN_SIZE_TO_SUBDIVIDE)
    }

    /// Discovery `min_cluster_size` for a level.
    ///
    /// Level map first, then the global value, then
    /// [`DEFAULT_DISCOVERY_MIN_CLUSTER_SIZE`]. Never below 2.
    #[must_use]
    pub fn discovery_min_cluster_size(&self, level: u32) -> usize {
        self.level_hdbscan_min_cluster_sizes
            .get(&level.to_string())
            .copied()
            .or(self.hdbscan_min_cluster_size)
            .unwrap_or(DEFAULT_DISCOVERY_MIN_CLUSTER_SIZE)
            .max(2)
    }

    /// Discovery `min_samples` for a level.
    ///
    /// The global value when set, otherwise half the level's cluster size
    /// with a floor of [`MIN_SAMPLES_FLOOR`]. Never exceeds the cluster size.
    #[must_use]
    pub fn discovery_min_samples(&self, level: u32) -> usize {
        let min_cluster_size = self.discovery_min_cluster_size(level);
        let samples = match self.hdbscan_min_samples {
            Some(explicit) => explicit.max(1),
            None => (min_cluster_size / 2).max(MIN_SAMPLES_FLOOR),
        };
        samples.min(min_cluster_size)
    }

    /// Reduced dimensionality for a level: the base halved per level below
    /// the root, floored at [`MIN_COMPONENTS`].
    #[must_use]
    pub fn n_components(&self, level: u32) -> usize {
        let shift = level.saturating_sub(1);
        self.umap_n_components
            .checked_shr(shift)
            .unwrap_or(0)
            .max(MIN_COMPONENTS)
    }

    /// Neighborhood size clamped to what a population of `population` allows.
    #[must_use]
    pub fn n_neighbors(&self, population: usize) -> usize {
        let upper = population.saturating_sub(1).max(1);
        self.umap_n_neighbors.max(2).min(upper)
    }

    #[must_use]
    pub fn min_dist(&self) -> f32 {
        self.umap_min_dist
    }

    /// Check every option against its documented range.
    pub fn validate(&self) -> Result<(), BuildError> {
        fn check<T: PartialOrd + std::fmt::Display>(
            name: &str,
            value: T,
            low: T,
            high: T,
        ) -> Result<(), BuildError> {
            if value < low || value > high {
                return Err(BuildError::InvalidConfig {
                    reason: format!("{name} = {value} is outside {low}..={high}"),
                });
            }
            Ok(())
        }

        check("umap_n_components", self.umap_n_components, 2, 50)?;
        check("umap_n_neighbors", self.umap_n_neighbors, 2, 200)?;
        check("umap_min_dist", self.umap_min_dist, 0.0, 1.0)?;
        if let Some(size) = self.hdbscan_min_cluster_size {
            check("hdbscan_min_cluster_size", size, 5, 1000)?;
        }
        if let Some(samples) = self.hdbscan_min_samples {
            check("hdbscan_min_samples", samples, 1, 100)?;
        }
        check("max_embeddings", self.max_embeddings, 100, 500_000)?;
        check("max_levels", self.max_levels, 1, MAX_LEVELS_LIMIT)?;
        check("representative_count", self.representative_count, 1, 100)?;

        for (name, map) in [
            ("level_min_cluster_sizes", &self.level_min_cluster_sizes),
            (
                "level_hdbscan_min_cluster_sizes",
                &self.level_hdbscan_min_cluster_sizes,
            ),
        ] {
            for (key, size) in map {
                let level: u32 = key.parse().map_err(|_| BuildError::InvalidConfig {
                    reason: format!("{name} has non-numeric level key '{key}'"),
                })?;
                check(name, level, 1, MAX_LEVELS_LIMIT)?;
                check(name, *size, 2, 100_000)?;
            }
        }
        Ok(())
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring `TX_` variables
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore
            // stays inside field names
            .merge(Env::prefixed("TX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.taxonomist/settings.toml` from the current directory upwards
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, SETTINGS_TEMPLATE)?;
        Ok(config_path)
    }
}

const SETTINGS_TEMPLATE: &str = r#"# Taxonomist Configuration File

# Version of the configuration schema
version = 1

[clustering]
# Reduced dimensionality at level 1, halved for every level below it (2-50)
umap_n_components = 10

# Neighborhood size for the reduction graph (2-200)
umap_n_neighbors = 15

# Minimum spacing of points in the reduced space (0.0-1.0)
umap_min_dist = 0.1

# Global discovery settings, used for levels missing from the map below
# hdbscan_min_cluster_size = 50
# hdbscan_min_samples = 10

# Most recent records loaded per build (100-500000)
max_embeddings = 100000

# Maximum depth of the taxonomy (1-10)
max_levels = 3

# Representative texts sent to the labeler per cluster
representative_count = 10

# "centroid_distance" or "membership_probability"
confidence_mode = "centroid_distance"

# Clusters at least this large are subdivided (default 25 for other levels)
[clustering.level_min_cluster_sizes]
1 = 40
2 = 20
3 = 10
4 = 10

# Discovery min_cluster_size per level
[clustering.level_hdbscan_min_cluster_sizes]
1 = 30
2 = 15
3 = 8
4 = 5

[labeler]
# "openai" or "keyword"
provider = "openai"
model = "gpt-4o"
embedding_model = "text-embedding-3-small"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
temperature = 0.3
max_tokens = 150
request_timeout_secs = 60

# Embed titles locally (downloads a fastembed model) with the keyword labeler
local_embeddings = false

[storage]
data_dir = ".taxonomist/data"

[server]
bind = "127.0.0.1:8001"

# 0 disables the timeout
build_timeout_secs = 3600

[logging]
# Overridden by RUST_LOG
level = "info"
json = false
"#;
