//! Bounded-parallel ingestion of prepared feature files.
//!
//! Features are read sequentially and sliced into fixed-size batches. Each
//! batch is handed to one worker of a fixed-size pool; the worker writes
//! every feature of the batch, with its aliases, through one atomic unit and
//! commits it. A row that fails to write is logged and skipped. A failed
//! commit aborts the whole run.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use geocodeur_data::{SourceFeature, load_features};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{alias::Alias, alias::AliasGenerator, config::GeocoderConfig, index::GeocodeIndex};

pub use error::{IngestError, Result};

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum IngestError {
        #[error("No source files given")]
        NoSources,
        #[error("Failed to read features: {0}")]
        Data(#[from] geocodeur_data::DataError),
        #[error("Failed to open store: {0}")]
        Store(#[from] crate::index::IndexError),
        #[error("Invalid configuration: {0}")]
        Config(#[from] crate::config::ConfigError),
        #[error("Failed to start workers: {0}")]
        WorkerPool(#[from] rayon::ThreadPoolBuildError),
        #[error("Failed to write '{name}': {reason}")]
        Write { name: String, reason: String },
        #[error("Failed to commit batch of {rows} rows: {reason}")]
        Commit { rows: usize, reason: String },
    }

    impl IngestError {
        /// Whether this error aborts an ingestion run.
        pub fn is_fatal(&self) -> bool {
            !matches!(self, Self::Write { .. })
        }
    }

    pub type Result<T> = std::result::Result<T, IngestError>;
}

/// Somewhere ingestion can write batches to.
pub trait IngestSink: Sync {
    /// Open one atomic unit of work.
    fn begin(&self) -> Result<Box<dyn BatchWriter + '_>>;
}

/// One open unit of work. Nothing written through it is visible before
/// [`BatchWriter::commit`] succeeds.
pub trait BatchWriter {
    /// Write a feature with its aliases and return the id assigned to it.
    fn write_row(&mut self, feature: &SourceFeature, aliases: &[Alias]) -> Result<u64>;

    /// Make every row written so far durable and visible.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Counts from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub batches: usize,
    pub features_written: usize,
    pub aliases_written: usize,
    /// Features without a name.
    pub features_skipped: usize,
    /// Rows whose write failed.
    pub rows_failed: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    batches: AtomicUsize,
    features_written: AtomicUsize,
    aliases_written: AtomicUsize,
    features_skipped: AtomicUsize,
    rows_failed: AtomicUsize,
}

impl Counters {
    fn report(&self, elapsed: Duration) -> IngestReport {
        IngestReport {
            batches: self.batches.load(Ordering::Relaxed),
            features_written: self.features_written.load(Ordering::Relaxed),
            aliases_written: self.aliases_written.load(Ordering::Relaxed),
            features_skipped: self.features_skipped.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Drop and recreate the configured store, then ingest every file in `sources`.
///
/// Not safe to run while queries are served from the same store.
#[instrument(name = "Build index", skip_all, fields(index = %config.index_name, sources = sources.len()))]
pub fn build_index<P: AsRef<Path>>(config: &GeocoderConfig, sources: &[P]) -> Result<IngestReport> {
    if sources.is_empty() {
        return Err(IngestError::NoSources);
    }
    config.validate()?;

    let t0 = Instant::now();
    let index = GeocodeIndex::create(&config.index_dir())?;
    let sink = index.writer(config.writer_memory_budget)?;
    let generator = config.alias_generator();

    let mut report = IngestReport::default();
    for source in sources {
        let source: PathBuf = source.as_ref().to_path_buf();
        let batches = load_features(&source, config.batch_size)?;
        info!(path = ?source, rows = batches.total_rows(), "Ingesting source");
        let part = ingest(&sink, batches, &generator, config.ingest_concurrency)?;
        report.merge(&part);
    }
    report.elapsed = t0.elapsed();

    info!(
        features = report.features_written,
        aliases = report.aliases_written,
        skipped = report.features_skipped,
        failed = report.rows_failed,
        elapsed = ?report.elapsed,
        "Index build complete"
    );
    Ok(report)
}

impl IngestReport {
    fn merge(&mut self, other: &Self) {
        self.batches += other.batches;
        self.features_written += other.features_written;
        self.aliases_written += other.aliases_written;
        self.features_skipped += other.features_skipped;
        self.rows_failed += other.rows_failed;
    }
}

/// Write every batch through `sink` using at most `concurrency` workers.
///
/// Blocks until all workers are done. Stops at the first fatal error.
pub fn ingest<S, I>(
    sink: &S,
    batches: I,
    generator: &AliasGenerator,
    concurrency: usize,
) -> Result<IngestReport>
where
    S: IngestSink,
    I: Iterator<Item = geocodeur_data::Result<Vec<SourceFeature>>> + Send,
{
    let t0 = Instant::now();
    let counters = Counters::default();
    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .thread_name(|i| format!("geocodeur-ingest-{i}"))
        .build()?;

    workers.install(|| {
        batches.par_bridge().try_for_each(|batch| {
            let batch = batch?;
            write_batch(sink, &batch, generator, &counters)
        })
    })?;

    Ok(counters.report(t0.elapsed()))
}

fn write_batch<S: IngestSink>(
    sink: &S,
    batch: &[SourceFeature],
    generator: &AliasGenerator,
    counters: &Counters,
) -> Result<()> {
    let mut writer = sink.begin()?;
    let mut written = 0;
    for feature in batch {
        let aliases = generator.generate(feature);
        if aliases.is_empty() {
            counters.features_skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        match writer.write_row(feature, &aliases) {
            Ok(id) => {
                written += 1;
                counters.features_written.fetch_add(1, Ordering::Relaxed);
                counters
                    .aliases_written
                    .fetch_add(aliases.len(), Ordering::Relaxed);
                debug!(id, name = %feature.name, aliases = aliases.len(), "Wrote feature");
            }
            Err(e) if !e.is_fatal() => {
                counters.rows_failed.fetch_add(1, Ordering::Relaxed);
                warn!(name = %feature.name, class = %feature.class, error = %e, "Skipping row");
            }
            Err(e) => return Err(e),
        }
    }
    writer.commit()?;
    let batches = counters.batches.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(batch = batches, rows = written, "Committed batch");
    Ok(())
}
