use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("Feature file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Unsupported feature file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("Feature file {path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,
}
