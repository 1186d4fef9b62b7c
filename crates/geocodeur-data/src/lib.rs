//! Loading of prepared feature files for the geocodeur index.
//!
//! The offline preparation pipeline (spatial joins, geometry merging) writes
//! one file per feature class. This crate is the seam between that pipeline
//! and the indexer: it reads Parquet or CSV feature files with polars,
//! normalises their columns, and slices them into fixed-size batches of
//! [`SourceFeature`] records.
use once_cell::sync::Lazy;
use std::path::PathBuf;

mod error;
pub mod feature;
pub mod source;
pub mod test_data;

pub use error::{DataError, Result};
pub use feature::{RELATION_DELIMITER, SourceFeature, split_relations};
pub use source::{FeatureBatches, load_features, scan_features};
pub use test_data::{
    TestDataConfig, TestDataFormat, create_test_data, sample_features, write_features_csv,
    write_features_parquet,
};

pub const DATA_DIR_DEFAULT: &str = "./geocodeur_data";
pub const DATA_DIR_ENV: &str = "GEOCODEUR_DATA_DIR";

/// Default data directory, resolved once per process.
///
/// `GEOCODEUR_DATA_DIR` wins. With the `system-dirs` feature the platform data
/// directory is used next, otherwise [`DATA_DIR_DEFAULT`].
pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    #[cfg(feature = "system-dirs")]
    {
        if let Some(dirs) = directories::ProjectDirs::from("org", "geocodeur", "geocodeur") {
            return dirs.data_dir().to_path_buf();
        }
    }
    PathBuf::from(DATA_DIR_DEFAULT)
});

pub fn get_data_dir() -> PathBuf {
    DATA_DIR.clone()
}
