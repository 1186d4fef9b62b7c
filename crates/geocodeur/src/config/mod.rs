//! Geocoder configuration.
//!
//! Every field has a default, so an empty JSON object is a valid file. Files
//! may carry trailing commas before a closing brace or bracket.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{alias::AliasGenerator, rank::RankTable};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "GEOCODEUR_CONFIG_PATH";

/// Largest accepted result limit.
pub const MAX_LIMIT: usize = 100;

mod error {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum ConfigError {
        #[error("Failed to read config file {path}: {source}")]
        Read {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("Failed to parse config: {0}")]
        Parse(#[from] serde_json::Error),
        #[error("Invalid pattern: {0}")]
        Pattern(#[from] regex::Error),
        #[error("Invalid configuration: {0}")]
        Invalid(String),
    }

    pub type Result<T> = std::result::Result<T, ConfigError>;
}

pub use error::{ConfigError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Root under which indexes and the metric tree log are stored.
    pub data_dir: PathBuf,
    /// Logical name of the backing store.
    pub index_name: String,
    /// Default fuzzy-stage threshold, overridable per call.
    pub similarity_threshold: f64,
    pub default_limit: usize,
    /// Maximum candidates returned by either retrieval stage.
    pub candidate_ceiling: usize,
    /// Number of ingestion workers.
    pub ingest_concurrency: usize,
    pub batch_size: usize,
    /// Heap budget, in bytes, for each index writer.
    pub writer_memory_budget: usize,
    pub pool_sweep_interval_secs: u64,
    /// Tokens stripped from names to produce shorter aliases.
    pub truncations: Vec<String>,
    /// Alternative names: `name -> synonym`.
    pub synonyms: BTreeMap<String, String>,
    pub class_rank_overrides: BTreeMap<String, u32>,
    pub subclass_rank_overrides: BTreeMap<String, u32>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            data_dir: geocodeur_data::get_data_dir(),
            index_name: "geocodeur".to_string(),
            similarity_threshold: 0.45,
            default_limit: 10,
            candidate_ceiling: 100,
            ingest_concurrency: 10,
            batch_size: 100,
            writer_memory_budget: 50_000_000,
            pool_sweep_interval_secs: 60,
            truncations: vec!["Rijksweg".to_string()],
            synonyms: BTreeMap::from([(
                "'s-Hertogenbosch".to_string(),
                "Den Bosch".to_string(),
            )]),
            class_rank_overrides: BTreeMap::new(),
            subclass_rank_overrides: BTreeMap::new(),
        }
    }
}

impl GeocoderConfig {
    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        info!(path = ?path, index = %config.index_name, "Loaded configuration");
        Ok(config)
    }

    /// Load from the file named by `GEOCODEUR_CONFIG_PATH`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => {
                debug!("{CONFIG_PATH_ENV} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Parse a JSON document, tolerating trailing commas.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cleaned = strip_trailing_commas(raw)?;
        let config: Self = serde_json::from_str(&cleaned)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.default_limit == 0 || self.default_limit > MAX_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "default_limit must be between 1 and {MAX_LIMIT}, got {}",
                self.default_limit
            )));
        }
        let positive = [
            ("candidate_ceiling", self.candidate_ceiling),
            ("ingest_concurrency", self.ingest_concurrency),
            ("batch_size", self.batch_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.pool_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pool_sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.writer_memory_budget < crate::index::MIN_THREAD_MEMORY_BUDGET {
            return Err(ConfigError::Invalid(format!(
                "writer_memory_budget must be at least {} bytes, got {}",
                crate::index::MIN_THREAD_MEMORY_BUDGET,
                self.writer_memory_budget
            )));
        }
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid("index_name is empty".to_string()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pool_sweep_interval_secs)
    }

    /// Directory holding the configured geocode index.
    pub fn index_dir(&self) -> PathBuf {
        self.index_dir_for(&self.index_name)
    }

    pub fn index_dir_for(&self, name: &str) -> PathBuf {
        self.data_dir.join("tantivy_indexes").join(name)
    }

    /// Directory holding the metric tree's durable log.
    pub fn metric_tree_dir(&self) -> PathBuf {
        self.data_dir.join("metric_tree").join(&self.index_name)
    }

    pub fn rank_table(&self) -> RankTable {
        let table = self
            .class_rank_overrides
            .iter()
            .fold(RankTable::new(), |table, (class, rank)| {
                table.with_class_override(class.clone(), *rank)
            });
        self.subclass_rank_overrides
            .iter()
            .fold(table, |table, (subclass, rank)| {
                table.with_subclass_override(subclass.clone(), *rank)
            })
    }

    pub fn alias_generator(&self) -> AliasGenerator {
        AliasGenerator::new(self.rank_table())
            .with_truncations(self.truncations.iter().cloned())
            .with_synonyms(self.synonyms.clone())
    }
}

fn strip_trailing_commas(raw: &str) -> Result<String> {
    let trailing = regex::Regex::new(r",(\s*[}\]])")?;
    Ok(trailing.replace_all(raw, "$1").into_owned())
}

/// Builder for [`GeocoderConfig`].
#[derive(Debug, Clone, Default)]
pub struct GeocoderConfigBuilder {
    config: GeocoderConfig,
}

impl GeocoderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small batches, few workers. Suited to tests and tiny extracts.
    pub fn small() -> Self {
        let mut builder = Self::new();
        builder.config.ingest_concurrency = 2;
        builder.config.batch_size = 10;
        builder.config.writer_memory_budget = 15_000_000;
        builder
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_name = name.into();
        self
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.config.default_limit = limit;
        self
    }

    pub fn candidate_ceiling(mut self, ceiling: usize) -> Self {
        self.config.candidate_ceiling = ceiling;
        self
    }

    pub fn ingest_concurrency(mut self, workers: usize) -> Self {
        self.config.ingest_concurrency = workers;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.pool_sweep_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn truncations<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.truncations = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn synonym(mut self, name: impl Into<String>, synonym: impl Into<String>) -> Self {
        self.config.synonyms.insert(name.into(), synonym.into());
        self
    }

    pub fn class_rank(mut self, class: impl Into<String>, rank: u32) -> Self {
        self.config.class_rank_overrides.insert(class.into(), rank);
        self
    }

    pub fn subclass_rank(mut self, subclass: impl Into<String>, rank: u32) -> Self {
        self.config
            .subclass_rank_overrides
            .insert(subclass.into(), rank);
        self
    }

    pub fn build(self) -> Result<GeocoderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
