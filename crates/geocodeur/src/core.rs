//! The [`Geocodeur`] entry point.
//!
//! Ties configuration, the pooled geocode index, ingestion and the metric
//! tree together behind one handle.
//!
//! ```rust,no_run
//! use geocodeur::{GeocodeOptions, Geocodeur, GeocoderConfig};
//!
//! let geocodeur = Geocodeur::new(GeocoderConfig::default())?;
//! geocodeur.build_index(&["features.parquet"])?;
//!
//! for result in geocodeur.geocode("kerkstraat amsterdam", &GeocodeOptions::new().limit(5))? {
//!     println!("{} ({}) {:.3}", result.name, result.class, result.similarity);
//! }
//! # Ok::<(), geocodeur::error::GeocodeError>(())
//! ```

use std::{path::Path, sync::Arc};

use once_cell::sync::OnceCell;
use tracing::{info, instrument};

use crate::{
    config::GeocoderConfig,
    error::Result,
    index::GeocodeIndex,
    ingest::{self, IngestReport},
    metric_tree::PersistentMetricTree,
    pool::ResourcePool,
    search::{FeatureRecord, GeocodeEngine, GeocodeOptions, GeocodeResult},
};

/// Geocoder over one configured index.
///
/// Index handles are shared through a pool and released after a period of
/// inactivity. The metric tree is opened on first use.
pub struct Geocodeur {
    config: GeocoderConfig,
    pool: ResourcePool<GeocodeIndex>,
    tree: OnceCell<PersistentMetricTree>,
}

impl std::fmt::Debug for Geocodeur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocodeur")
            .field("index", &self.config.index_name)
            .field("data_dir", &self.config.data_dir)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Geocodeur {
    #[instrument(name = "Initialize Geocodeur", skip_all, fields(index = %config.index_name))]
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        config.validate()?;
        let pool = ResourcePool::with_sweeper(config.sweep_interval())?;
        info!(data_dir = ?config.data_dir, "Geocodeur ready");
        Ok(Self {
            config,
            pool,
            tree: OnceCell::new(),
        })
    }

    /// Configure from `GEOCODEUR_CONFIG_PATH`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::new(GeocoderConfig::from_env()?)
    }

    pub fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    /// A query engine over the pooled index.
    pub fn engine(&self) -> Result<GeocodeEngine<Arc<GeocodeIndex>>> {
        let index = self.pool.acquire(&self.config.index_name, &self.config)?;
        Ok(GeocodeEngine::new(index)
            .with_default_threshold(self.config.similarity_threshold)
            .with_candidate_ceiling(self.config.candidate_ceiling))
    }

    /// Ranked features matching `query`.
    pub fn geocode(&self, query: &str, options: &GeocodeOptions) -> Result<Vec<GeocodeResult>> {
        Ok(self.engine()?.geocode(query, options)?)
    }

    /// The feature stored under `id`.
    pub fn lookup(&self, id: u64, include_geometry: bool) -> Result<Option<FeatureRecord>> {
        Ok(self.engine()?.lookup(id, include_geometry)?)
    }

    /// Rebuild the index from `sources`.
    ///
    /// Pooled handles are dropped before and after so queries never see a
    /// half-replaced directory through a stale handle. Callers must not
    /// query while a build runs.
    pub fn build_index<P: AsRef<Path>>(&self, sources: &[P]) -> Result<IngestReport> {
        self.pool.release(&self.config.index_name);
        let report = ingest::build_index(&self.config, sources);
        self.pool.release(&self.config.index_name);
        Ok(report?)
    }

    /// The persistent metric tree, opened and hydrated on first use.
    pub fn metric_tree(&self) -> Result<&PersistentMetricTree> {
        Ok(self
            .tree
            .get_or_try_init(|| PersistentMetricTree::open(self.config.metric_tree_dir()))?)
    }

    pub fn tree_insert(&self, value: &str) -> Result<()> {
        Ok(self.metric_tree()?.insert(value)?)
    }

    /// Values within `max_distance` edits of `query`.
    pub fn tree_search(&self, query: &str, max_distance: usize) -> Result<Vec<String>> {
        Ok(self.metric_tree()?.search(query, max_distance)?)
    }

    /// Stop the sweeper and close every pooled handle.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        if let Some(tree) = self.tree.get() {
            tree.evict();
        }
        info!(index = %self.config.index_name, "Geocodeur shut down");
    }
}
