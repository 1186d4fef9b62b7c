use std::path::Path;

use itertools::izip;
use polars::prelude::*;
use tracing::{info, instrument};

use crate::error::{DataError, Result};
use crate::feature::{SourceFeature, split_relations};

const REQUIRED_COLUMNS: [&str; 3] = ["name", "class", "subclass"];
const OPTIONAL_COLUMNS: [&str; 2] = ["relation", "geom"];

/// Lazily scan a prepared feature file and normalise it to the five string
/// columns `name, class, subclass, relation, geom`.
///
/// Parquet and CSV (with header) are supported, picked by file extension.
/// `relation` and `geom` may be absent from the file; they are filled with nulls.
pub fn scan_features(path: impl AsRef<Path>) -> Result<LazyFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DataError::FileNotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mut lf = match extension.as_deref() {
        Some("parquet") => LazyFrame::scan_parquet(path, Default::default())?,
        Some("csv") => LazyCsvReader::new(path)
            .with_has_header(true)
            // Every column is read as a string; the indexer does its own parsing.
            .with_infer_schema_length(Some(0))
            .finish()?,
        _ => return Err(DataError::UnsupportedFormat(path.to_path_buf())),
    };

    let schema = lf.collect_schema()?;
    if let Some(column) = REQUIRED_COLUMNS
        .into_iter()
        .find(|column| !schema.contains(column))
    {
        return Err(DataError::MissingColumn {
            path: path.to_path_buf(),
            column,
        });
    }

    let mut columns: Vec<Expr> = REQUIRED_COLUMNS
        .into_iter()
        .map(|name| col(name).cast(DataType::String))
        .collect();
    columns.extend(OPTIONAL_COLUMNS.into_iter().map(|name| {
        if schema.contains(name) {
            col(name).cast(DataType::String)
        } else {
            lit(NULL).cast(DataType::String).alias(name)
        }
    }));

    Ok(lf.select(columns))
}

/// Read a feature file into memory and return it as a sequence of batches.
#[instrument(name = "Load feature file", skip_all, fields(path = %path.as_ref().display()), level = "info")]
pub fn load_features(path: impl AsRef<Path>, batch_size: usize) -> Result<FeatureBatches> {
    let t_load = std::time::Instant::now();
    let df = scan_features(path.as_ref())?.collect()?;
    info!(
        rows = df.height(),
        elapsed = ?t_load.elapsed(),
        "Feature file collected into memory"
    );
    FeatureBatches::new(df, batch_size)
}

/// Sequential, fixed-size slicing of a normalised feature frame.
///
/// Every batch except possibly the last holds exactly `batch_size` records.
#[derive(Debug, Clone)]
pub struct FeatureBatches {
    df: DataFrame,
    batch_size: usize,
    offset: usize,
}

impl FeatureBatches {
    pub fn new(df: DataFrame, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize);
        }
        Ok(Self {
            df,
            batch_size,
            offset: 0,
        })
    }

    /// Total number of rows across all batches.
    pub fn total_rows(&self) -> usize {
        self.df.height()
    }
}

impl Iterator for FeatureBatches {
    type Item = Result<Vec<SourceFeature>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.df.height() {
            return None;
        }
        let batch = self.df.slice(self.offset as i64, self.batch_size);
        self.offset += self.batch_size;
        Some(features_from_frame(&batch))
    }
}

fn features_from_frame(df: &DataFrame) -> Result<Vec<SourceFeature>> {
    let names = df.column("name")?.str()?;
    let classes = df.column("class")?.str()?;
    let subclasses = df.column("subclass")?.str()?;
    let relations = df.column("relation")?.str()?;
    let geometries = df.column("geom")?.str()?;

    Ok(izip!(names, classes, subclasses, relations, geometries)
        .map(|(name, class, subclass, relation, geom)| SourceFeature {
            name: name.unwrap_or_default().to_owned(),
            class: class.unwrap_or_default().to_owned(),
            subclass: subclass.unwrap_or_default().to_owned(),
            relations: relation.map(split_relations).unwrap_or_default(),
            geometry: geom.filter(|g| !g.is_empty()).map(str::to_owned),
        })
        .collect())
}
