use std::sync::atomic::{AtomicU64, Ordering};

use geocodeur_data::SourceFeature;
use parking_lot::Mutex;
use tantivy::{Index, IndexReader, IndexWriter, Opstamp, TantivyDocument};
use tracing::{trace, warn};

use super::{
    error::Result,
    schema::{GeocodeFields, KIND_ALIAS, KIND_FEATURE},
};
use crate::{
    alias::Alias,
    geometry::to_geojson,
    ingest::{self, BatchWriter, IngestError, IngestSink},
    similarity::trigrams,
};

/// Smallest per-thread heap tantivy accepts for a writer.
pub const MIN_THREAD_MEMORY_BUDGET: usize = 15_000_000;
const MAX_WRITER_THREADS: usize = 4;

/// Writes feature and alias documents into a [`super::GeocodeIndex`].
///
/// Feature ids come from a counter seeded with the index's committed
/// high-water mark; every commit records the current mark.
pub struct IndexSink {
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: GeocodeFields,
    last_id: AtomicU64,
}

impl IndexSink {
    pub(super) fn new(
        index: &Index,
        reader: IndexReader,
        fields: GeocodeFields,
        high_water: u64,
        memory_budget: usize,
    ) -> Result<Self> {
        let threads = (memory_budget / MIN_THREAD_MEMORY_BUDGET).clamp(1, MAX_WRITER_THREADS);
        let writer: IndexWriter = index.writer_with_num_threads(threads, memory_budget)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader,
            fields,
            last_id: AtomicU64::new(high_water),
        })
    }

    /// Highest id handed out so far.
    pub fn high_water(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn feature_document(
        &self,
        id: u64,
        feature: &SourceFeature,
        geometry: Option<&str>,
    ) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.kind, KIND_FEATURE);
        doc.add_u64(f.id, id);
        doc.add_text(f.name, &feature.name);
        doc.add_text(f.class, &feature.class);
        doc.add_text(f.subclass, &feature.subclass);
        for division in &feature.relations {
            doc.add_text(f.divisions, division);
        }
        if let Some(geometry) = geometry {
            doc.add_text(f.geometry, geometry);
        }
        doc
    }

    fn alias_document(&self, feature_id: u64, class: &str, alias: &Alias) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.kind, KIND_ALIAS);
        doc.add_u64(f.feature_id, feature_id);
        doc.add_text(f.class, class);
        doc.add_text(f.alias, &alias.text);
        for gram in trigrams(&alias.text) {
            doc.add_text(f.trigram, &gram);
        }
        doc.add_u64(f.class_rank, u64::from(alias.class_rank));
        doc.add_u64(f.subclass_rank, u64::from(alias.subclass_rank));
        doc.add_u64(f.word_count, u64::from(alias.word_count));
        doc.add_u64(f.char_count, u64::from(alias.char_count));
        doc.add_u64(f.rank_key, alias.rank_key());
        doc
    }

    /// Add `documents` and commit them as one unit. On failure nothing is kept.
    fn commit_documents(&self, documents: Vec<TantivyDocument>) -> Result<Opstamp> {
        let mut writer = self.writer.lock();
        let committed = add_and_commit(&mut writer, documents, self.high_water());
        if committed.is_err() {
            if let Err(e) = writer.rollback() {
                warn!(error = %e, "Rollback after failed commit also failed");
            }
        }
        drop(writer);
        let opstamp = committed?;
        self.reader.reload()?;
        Ok(opstamp)
    }
}

fn add_and_commit(
    writer: &mut IndexWriter,
    documents: Vec<TantivyDocument>,
    high_water: u64,
) -> tantivy::Result<Opstamp> {
    for doc in documents {
        writer.add_document(doc)?;
    }
    let mut prepared = writer.prepare_commit()?;
    prepared.set_payload(&high_water.to_string());
    prepared.commit()
}

impl IngestSink for IndexSink {
    fn begin(&self) -> ingest::Result<Box<dyn BatchWriter + '_>> {
        Ok(Box::new(IndexBatch {
            sink: self,
            documents: Vec::new(),
            rows: 0,
        }))
    }
}

/// Documents of one batch, buffered until commit.
struct IndexBatch<'a> {
    sink: &'a IndexSink,
    documents: Vec<TantivyDocument>,
    rows: usize,
}

impl BatchWriter for IndexBatch<'_> {
    fn write_row(&mut self, feature: &SourceFeature, aliases: &[Alias]) -> ingest::Result<u64> {
        let geometry = feature
            .geometry
            .as_deref()
            .map(to_geojson)
            .transpose()
            .map_err(|e| IngestError::Write {
                name: feature.name.clone(),
                reason: e.to_string(),
            })?;

        let id = self.sink.allocate_id();
        self.documents
            .push(self.sink.feature_document(id, feature, geometry.as_deref()));
        for alias in aliases {
            self.documents
                .push(self.sink.alias_document(id, &feature.class, alias));
        }
        self.rows += 1;
        trace!(id, aliases = aliases.len(), "Buffered row");
        Ok(id)
    }

    fn commit(self: Box<Self>) -> ingest::Result<()> {
        let Self {
            sink,
            documents,
            rows,
        } = *self;
        sink.commit_documents(documents)
            .map(|_| ())
            .map_err(|e| IngestError::Commit {
                rows,
                reason: e.to_string(),
            })
    }
}
