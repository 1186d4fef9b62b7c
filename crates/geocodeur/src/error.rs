use thiserror::Error;

/// A request that can never succeed as given. Raised before any store access.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Query is empty")]
    EmptyQuery,
    #[error("Unknown class '{0}'")]
    UnknownClass(String),
    #[error("Limit must be between 1 and {max}, got {limit}")]
    LimitOutOfRange { limit: usize, max: usize },
    #[error("Similarity threshold must be in (0, 1], got {0}")]
    ThresholdOutOfRange(f64),
}

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Search error: {0}")]
    SearchError(#[from] crate::search::SearchError),
    #[error("Index error: {0}")]
    IndexError(#[from] crate::index::IndexError),
    #[error("Ingestion error: {0}")]
    IngestError(#[from] crate::ingest::IngestError),
    #[error("Resource error: {0}")]
    PoolError(#[from] crate::pool::PoolError),
    #[error("Metric tree error: {0}")]
    MetricTreeError(#[from] crate::metric_tree::MetricTreeError),
    #[error("Data error: {0}")]
    DataError(#[from] geocodeur_data::DataError),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Init Logging error: {0}")]
    InitLoggingError(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GeocodeError>;
