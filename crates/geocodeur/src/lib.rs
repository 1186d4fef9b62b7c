//! Geocodeur - typo-tolerant geocoding over prepared map features
//!
//! Features (named map objects with a class, a subclass and the divisions
//! they lie in) are ingested into a tantivy index together with a set of
//! generated aliases. Queries are matched against the aliases in two
//! stages: an exact stage that requires every query token as a word prefix,
//! and a trigram fuzzy stage that only runs when the exact stage finds
//! nothing. Candidates are deduplicated per feature and ranked by similarity
//! and class importance.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use geocodeur::{GeocodeOptions, Geocodeur, GeocoderConfigBuilder};
//!
//! let config = GeocoderConfigBuilder::new().data_dir("/tmp/geocodeur").build()?;
//! let geocodeur = Geocodeur::new(config)?;
//! geocodeur.build_index(&["features.csv"])?;
//!
//! let results = geocodeur.geocode("amsterdam", &GeocodeOptions::new())?;
//! if let Some(best) = results.first() {
//!     println!("{} [{}] matched '{}'", best.name, best.search_type, best.alias);
//! }
//! # Ok::<(), geocodeur::error::GeocodeError>(())
//! ```
//!
//! A separate BK-tree ([`PersistentMetricTree`]) answers bounded
//! edit-distance lookups over an arbitrary string set.

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod alias;
mod config;
mod core;
pub mod error;
mod geometry;
mod index;
mod ingest;
mod metric_tree;
mod pool;
mod rank;
mod search;
mod similarity;

pub use alias::{Alias, AliasGenerator};
pub use config::{CONFIG_PATH_ENV, ConfigError, GeocoderConfig, GeocoderConfigBuilder, MAX_LIMIT};
pub use core::Geocodeur;
pub use geocodeur_data as data;
pub use geocodeur_data::SourceFeature;
pub use geometry::{GeometryError, to_geojson};
pub use index::{GeocodeIndex, IndexError, IndexSink};
pub use ingest::{BatchWriter, IngestError, IngestReport, IngestSink, build_index, ingest};
pub use metric_tree::{MetricTree, MetricTreeError, PersistentMetricTree};
pub use pool::{PoolError, PooledResource, ResourcePool};
pub use rank::{FeatureClass, RankTable, UNKNOWN_RANK, class_rank, subclass_rank};
pub use search::{
    AliasStore, Candidate, CandidateQuery, ClassFilter, FeatureRecord, GeocodeEngine,
    GeocodeOptions, GeocodeResult, SearchError, SearchType, rank_candidates,
};
pub use similarity::{edit_distance, trigram_similarity, trigrams};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for the geocoder.
///
/// `RUST_LOG` takes precedence over `level` when set. Call once at startup;
/// later calls are no-ops.
///
/// ```rust
/// use geocodeur::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO)?;
/// # Ok::<(), geocodeur::error::GeocodeError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static (), error::GeocodeError> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("tantivy=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    })
}
