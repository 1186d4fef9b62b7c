//! Tantivy-backed storage for features and their aliases.
//!
//! One index holds two kinds of documents. Feature documents carry the
//! display attributes of a feature under a generated id. Alias documents
//! carry one searchable string each, the ranks of the owning feature and the
//! length counts used to bound retrieval. A batch commit makes a feature and
//! all of its aliases visible together.
//!
//! The highest feature id ever assigned is kept in the commit payload and
//! survives rebuilds, so ids are never reused.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

use itertools::Itertools;
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, Order, ReloadPolicy, Searcher, TantivyDocument,
    Term,
    collector::{Count, DocSetCollector, TopDocs},
    query::{BooleanQuery, Occur, Query, RegexQuery, TermQuery, TermSetQuery},
    schema::{IndexRecordOption, Value},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::GeocoderConfig,
    pool::PooledResource,
    search::{
        self, AliasStore, Candidate, CandidateQuery, ClassFilter, FeatureRecord,
        MAX_CHAR_COUNT_GAP, MAX_WORD_COUNT_GAP,
    },
    similarity::{trigram_similarity, trigrams},
};

mod schema;
mod writer;

pub use error::{IndexError, Result};
pub use schema::{ALIAS_TOKENIZER, GeocodeFields, KIND_ALIAS, KIND_FEATURE};
pub use writer::{IndexSink, MIN_THREAD_MEMORY_BUDGET};

const SETUP_WRITER_BUDGET: usize = 15_000_000;

mod error {
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum IndexError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
        #[error("Tantivy error: {0}")]
        Tantivy(#[from] tantivy::TantivyError),
        #[error("No index found at {0}")]
        NotFound(PathBuf),
        #[error("Document is missing field '{0}'")]
        MissingField(&'static str),
        #[error("Commit payload is not an id: {0:?}")]
        CorruptPayload(String),
        #[error(transparent)]
        Other(#[from] anyhow::Error),
    }

    pub type Result<T> = std::result::Result<T, IndexError>;
}

/// An opened geocode index.
pub struct GeocodeIndex {
    index: Index,
    reader: IndexReader,
    fields: GeocodeFields,
    location: Option<PathBuf>,
}

impl fmt::Debug for GeocodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeIndex")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl GeocodeIndex {
    /// Open an existing index.
    #[instrument(name = "Open index", skip_all, fields(path = ?dir))]
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.join("meta.json").exists() {
            return Err(IndexError::NotFound(dir.to_path_buf()));
        }
        let index = Index::open_in_dir(dir)?;
        let opened = Self::from_index(index, Some(dir.to_path_buf()))?;
        debug!(features = opened.num_features()?, "Opened index");
        Ok(opened)
    }

    /// Create an empty index at `dir`, replacing whatever is there.
    ///
    /// The id high-water mark of a replaced index carries over.
    #[instrument(name = "Create index", skip_all, fields(path = ?dir))]
    pub fn create(dir: &Path) -> Result<Self> {
        let high_water = if dir.join("meta.json").exists() {
            match Self::open(dir).and_then(|previous| previous.high_water()) {
                Ok(mark) => mark,
                Err(e) => {
                    warn!(error = %e, "Could not read previous index, ids restart at 1");
                    0
                }
            }
        } else {
            0
        };

        if dir.exists() {
            info!("Removing existing index directory");
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let index = Index::create_in_dir(dir, GeocodeFields::schema())?;
        set_high_water(&index, high_water)?;
        info!(high_water, "Created empty index");
        Self::from_index(index, Some(dir.to_path_buf()))
    }

    /// A fresh index held in RAM.
    pub fn in_memory() -> Result<Self> {
        let index = Index::create_in_ram(GeocodeFields::schema());
        Self::from_index(index, None)
    }

    fn from_index(index: Index, location: Option<PathBuf>) -> Result<Self> {
        schema::register_tokenizers(&index);
        let fields = GeocodeFields::resolve(&index.schema())?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            fields,
            location,
        })
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Highest feature id committed so far, 0 for a new index.
    pub fn high_water(&self) -> Result<u64> {
        match self.index.load_metas()?.payload {
            None => Ok(0),
            Some(payload) => payload
                .trim()
                .parse()
                .map_err(|_| IndexError::CorruptPayload(payload)),
        }
    }

    /// Pick up commits made since the last reload.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    pub fn num_features(&self) -> Result<u64> {
        let kind = TermQuery::new(
            Term::from_field_text(self.fields.kind, KIND_FEATURE),
            IndexRecordOption::Basic,
        );
        let count = self.reader.searcher().search(&kind, &Count)?;
        Ok(count as u64)
    }

    /// A sink writing into this index, continuing after the committed high-water mark.
    pub fn writer(&self, memory_budget: usize) -> Result<IndexSink> {
        IndexSink::new(
            &self.index,
            self.reader.clone(),
            self.fields,
            self.high_water()?,
            memory_budget,
        )
    }

    fn alias_filters(&self, query: &CandidateQuery) -> Vec<(Occur, Box<dyn Query>)> {
        let f = &self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.kind, KIND_ALIAS),
                    IndexRecordOption::Basic,
                )),
            ),
            (
                Occur::Must,
                Box::new(TermSetQuery::new(count_terms(
                    f.word_count,
                    query.word_count,
                    MAX_WORD_COUNT_GAP,
                ))),
            ),
            (
                Occur::Must,
                Box::new(TermSetQuery::new(count_terms(
                    f.char_count,
                    query.length,
                    MAX_CHAR_COUNT_GAP,
                ))),
            ),
        ];
        if let ClassFilter::Only(classes) = &query.classes {
            let terms = classes
                .iter()
                .map(|class| Term::from_field_text(f.class, class.as_str()));
            clauses.push((Occur::Must, Box::new(TermSetQuery::new(terms))));
        }
        clauses
    }

    /// Aliases with a token starting with every query token, in rank order.
    #[instrument(name = "Exact stage", skip_all, level = "debug", fields(query = %query.text))]
    fn exact_stage(&self, query: &CandidateQuery) -> Result<Vec<Candidate>> {
        let mut clauses = self.alias_filters(query);
        for token in &query.tokens {
            let pattern = format!("{}.*", regex::escape(token));
            let prefix = RegexQuery::from_pattern(&pattern, self.fields.alias)?;
            clauses.push((Occur::Must, Box::new(prefix)));
        }
        let query_obj = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let t0 = Instant::now();
        let top_docs = searcher.search(
            &query_obj,
            &TopDocs::with_limit(query.ceiling)
                .order_by_fast_field::<u64>("rank_key", Order::Asc),
        )?;
        debug!(hits = top_docs.len(), elapsed = ?t0.elapsed(), "Exact stage complete");

        top_docs
            .into_iter()
            .map(|(_, address)| self.candidate(&searcher, address, &query.text))
            .collect()
    }

    /// Aliases sharing trigrams with the query, scored exactly and kept when
    /// strictly above `threshold`, in rank order.
    ///
    /// Every alias inside the length window that shares a trigram is scored;
    /// the ceiling applies only after ranking.
    #[instrument(name = "Fuzzy stage", skip_all, level = "debug", fields(query = %query.text, threshold = threshold))]
    fn fuzzy_stage(&self, query: &CandidateQuery, threshold: f64) -> Result<Vec<Candidate>> {
        let grams = trigrams(&query.text);
        if grams.is_empty() {
            return Ok(Vec::new());
        }
        let shared_trigram: Vec<(Occur, Box<dyn Query>)> = grams
            .iter()
            .sorted()
            .map(|gram| {
                let term = Term::from_field_text(self.fields.trigram, gram);
                let clause: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, clause)
            })
            .collect();
        let mut clauses = self.alias_filters(query);
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(shared_trigram))));
        let query_obj = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let t0 = Instant::now();
        let addresses: HashSet<DocAddress> = searcher.search(&query_obj, &DocSetCollector)?;
        let scanned = addresses.len();

        let mut candidates = addresses
            .into_iter()
            .map(|address| self.candidate(&searcher, address, &query.text))
            .filter_ok(|candidate| candidate.similarity > threshold)
            .collect::<Result<Vec<_>>>()?;
        candidates.sort_by(|a, b| {
            (a.class_rank, a.subclass_rank)
                .cmp(&(b.class_rank, b.subclass_rank))
                .then_with(|| b.similarity.total_cmp(&a.similarity))
                .then_with(|| a.feature_id.cmp(&b.feature_id))
                .then_with(|| a.alias.cmp(&b.alias))
        });
        candidates.truncate(query.ceiling);
        debug!(scanned, kept = candidates.len(), elapsed = ?t0.elapsed(), "Fuzzy stage complete");
        Ok(candidates)
    }

    fn candidate(&self, searcher: &Searcher, address: DocAddress, query_text: &str) -> Result<Candidate> {
        let f = &self.fields;
        let doc: TantivyDocument = searcher.doc(address)?;
        let alias = text_field(&doc, f.alias, "alias")?;
        let candidate = Candidate {
            feature_id: u64_field(&doc, f.feature_id, "feature_id")?,
            similarity: trigram_similarity(&alias, query_text),
            alias,
            class_rank: rank_field(&doc, f.class_rank, "class_rank")?,
            subclass_rank: rank_field(&doc, f.subclass_rank, "subclass_rank")?,
        };
        trace!(?candidate, "Candidate");
        Ok(candidate)
    }

    /// Features by id; unknown ids are skipped.
    pub fn features(&self, ids: &[u64], include_geometry: bool) -> Result<Vec<FeatureRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let f = &self.fields;
        let query = TermSetQuery::new(ids.iter().map(|&id| Term::from_field_u64(f.id, id)));
        let searcher = self.reader.searcher();
        let addresses: HashSet<DocAddress> = searcher.search(&query, &DocSetCollector)?;

        addresses
            .into_iter()
            .sorted()
            .map(|address| {
                let doc: TantivyDocument = searcher.doc(address)?;
                Ok(FeatureRecord {
                    id: u64_field(&doc, f.id, "id")?,
                    name: text_field(&doc, f.name, "name")?,
                    class: text_field(&doc, f.class, "class")?,
                    subclass: text_field(&doc, f.subclass, "subclass")?,
                    divisions: doc
                        .get_all(f.divisions)
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect(),
                    geometry: if include_geometry {
                        doc.get_first(f.geometry)
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                    } else {
                        None
                    },
                })
            })
            .collect()
    }
}

/// Write an empty commit carrying `high_water` as its payload.
fn set_high_water(index: &Index, high_water: u64) -> Result<()> {
    let mut writer: IndexWriter = index.writer_with_num_threads(1, SETUP_WRITER_BUDGET)?;
    let mut prepared = writer.prepare_commit()?;
    prepared.set_payload(&high_water.to_string());
    prepared.commit()?;
    Ok(())
}

fn count_terms(field: tantivy::schema::Field, center: usize, gap: usize) -> Vec<Term> {
    (center.saturating_sub(gap)..=center.saturating_add(gap))
        .map(|n| Term::from_field_u64(field, n as u64))
        .collect()
}

fn text_field(doc: &TantivyDocument, field: tantivy::schema::Field, name: &'static str) -> Result<String> {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(IndexError::MissingField(name))
}

fn u64_field(doc: &TantivyDocument, field: tantivy::schema::Field, name: &'static str) -> Result<u64> {
    doc.get_first(field)
        .and_then(|v| v.as_u64())
        .ok_or(IndexError::MissingField(name))
}

fn rank_field(doc: &TantivyDocument, field: tantivy::schema::Field, name: &'static str) -> Result<u32> {
    let raw = u64_field(doc, field, name)?;
    u32::try_from(raw).map_err(|_| anyhow::anyhow!("{name} out of range: {raw}").into())
}

impl AliasStore for GeocodeIndex {
    fn exact_candidates(&self, query: &CandidateQuery) -> search::Result<Vec<Candidate>> {
        Ok(self.exact_stage(query)?)
    }

    fn fuzzy_candidates(
        &self,
        query: &CandidateQuery,
        threshold: f64,
    ) -> search::Result<Vec<Candidate>> {
        Ok(self.fuzzy_stage(query, threshold)?)
    }

    fn features(&self, ids: &[u64], include_geometry: bool) -> search::Result<Vec<FeatureRecord>> {
        Ok(GeocodeIndex::features(self, ids, include_geometry)?)
    }
}

impl PooledResource for GeocodeIndex {
    type Config = GeocoderConfig;
    type Error = IndexError;

    fn open(name: &str, config: &GeocoderConfig) -> Result<Self> {
        GeocodeIndex::open(&config.index_dir_for(name))
    }

    fn probe(&self) -> Result<()> {
        self.index.load_metas()?;
        Ok(())
    }

    fn close(&self) {
        debug!(location = ?self.location, "Closing index");
    }
}
