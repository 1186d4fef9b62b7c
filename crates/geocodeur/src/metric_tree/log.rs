use std::{fs, path::Path};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
    collector::{Count, DocSetCollector},
    directory::MmapDirectory,
    doc,
    query::{AllQuery, TermQuery},
    schema::{Field, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, Value},
};
use tracing::{debug, instrument};

use super::error::{MetricTreeError, Result};

const WRITER_MEMORY_BUDGET: usize = 20_000_000;

/// Durable flat store of every value inserted into a metric tree, keyed by
/// the SHA-256 digest of the value.
pub struct ValueLog {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    key: Field,
    value: Field,
}

impl ValueLog {
    fn schema() -> Schema {
        let mut schema_builder = SchemaBuilder::new();
        schema_builder.add_text_field("key", STRING | STORED);
        schema_builder.add_text_field("value", STORED);
        schema_builder.build()
    }

    /// Open the log stored in `dir`, creating it if needed.
    #[instrument(name = "Open value log", level = "debug")]
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let directory = MmapDirectory::open(dir)?;
        let index = Index::open_or_create(directory, Self::schema())?;
        Self::from_index(index)
    }

    /// A log that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(Self::schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let schema = index.schema();
        let key = schema.get_field("key")?;
        let value = schema.get_field("value")?;
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            key,
            value,
        })
    }

    pub fn key_of(value: &str) -> String {
        format!("{:x}", Sha256::digest(value.as_bytes()))
    }

    /// Durably record `value`. Returns `false` when it was already recorded.
    pub fn put(&self, value: &str) -> Result<bool> {
        let key = Self::key_of(value);
        let mut writer = self.writer.lock();
        let existing = TermQuery::new(
            Term::from_field_text(self.key, &key),
            IndexRecordOption::Basic,
        );
        if self.reader.searcher().search(&existing, &Count)? > 0 {
            return Ok(false);
        }
        writer.add_document(doc!(self.key => key.as_str(), self.value => value))?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(true)
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every recorded value, in storage order.
    pub fn values(&self) -> Result<Vec<String>> {
        let searcher = self.reader.searcher();
        let mut addresses: Vec<DocAddress> =
            searcher.search(&AllQuery, &DocSetCollector)?.into_iter().collect();
        addresses.sort();

        let values = addresses
            .into_iter()
            .map(|address| {
                let doc = searcher.doc::<TantivyDocument>(address)?;
                doc.get_first(self.value)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| MetricTreeError::CorruptEntry(format!("{address:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(count = values.len(), "Read value log");
        Ok(values)
    }
}

impl std::fmt::Debug for ValueLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueLog").field("len", &self.len()).finish()
    }
}
