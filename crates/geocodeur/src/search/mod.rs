//! Hybrid retrieval: an exact prefix stage with a strict fuzzy fallback,
//! followed by per-feature deduplication and multi-key ranking.
//!
//! The engine only talks to an [`AliasStore`]. The tantivy-backed store lives
//! in [`crate::index`]; tests use in-memory stores.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    rank::FeatureClass,
    similarity::{tokenize, word_count},
};

mod engine;

pub use engine::{GeocodeEngine, MAX_WORD_COUNT_GAP, MAX_CHAR_COUNT_GAP, rank_candidates};
pub use error::{Result, SearchError};

mod error {
    use thiserror::Error;

    use crate::error::ValidationError;

    #[derive(Error, Debug)]
    pub enum SearchError {
        #[error("Invalid request: {0}")]
        Validation(#[from] ValidationError),
        #[error("Alias store error: {0}")]
        Store(#[from] crate::index::IndexError),
        #[error("Alias store unavailable: {0}")]
        Unavailable(String),
        #[error("Candidate references unknown feature {0}")]
        MissingFeature(u64),
    }

    pub type Result<T> = std::result::Result<T, SearchError>;
}

/// Which classes a query may return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassFilter {
    #[default]
    All,
    Only(Vec<FeatureClass>),
}

impl ClassFilter {
    /// Parse class names. No names means every class.
    pub fn parse<I, S>(names: I) -> std::result::Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classes: Vec<FeatureClass> = names
            .into_iter()
            .map(|name| name.as_ref().parse::<FeatureClass>())
            .collect::<std::result::Result<_, _>>()?;
        if classes.is_empty() {
            return Ok(Self::All);
        }
        classes.sort_unstable();
        classes.dedup();
        Ok(Self::Only(classes))
    }

    pub fn allows(&self, class: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(classes) => classes.iter().any(|c| c.as_str() == class),
        }
    }

    pub fn classes(&self) -> &[FeatureClass] {
        match self {
            Self::All => &FeatureClass::ALL,
            Self::Only(classes) => classes,
        }
    }
}

/// A validated, normalized query as handed to an [`AliasStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    /// Lowercased query with whitespace collapsed.
    pub text: String,
    /// Alphanumeric tokens of `text`, each matched as a prefix in the exact stage.
    pub tokens: Vec<String>,
    pub word_count: usize,
    /// Characters of `text`, spaces included. Compared against alias char
    /// counts, which exclude spaces.
    pub length: usize,
    pub classes: ClassFilter,
    /// Maximum candidates a stage may return.
    pub ceiling: usize,
}

impl CandidateQuery {
    /// Normalize `raw`. Fails when nothing searchable remains.
    pub fn new(
        raw: &str,
        classes: ClassFilter,
        ceiling: usize,
    ) -> std::result::Result<Self, ValidationError> {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let tokens: Vec<String> = tokenize(&text).collect();
        if tokens.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        Ok(Self {
            word_count: word_count(&text),
            length: text.chars().count(),
            text,
            tokens,
            classes,
            ceiling,
        })
    }

    /// Whether an alias with these counts lies close enough in length to be scored.
    pub fn within_length_window(&self, alias_words: usize, alias_chars: usize) -> bool {
        self.word_count.abs_diff(alias_words) <= MAX_WORD_COUNT_GAP
            && self.length.abs_diff(alias_chars) <= MAX_CHAR_COUNT_GAP
    }
}

/// One alias matched by a retrieval stage, scored against the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub feature_id: u64,
    pub alias: String,
    pub class_rank: u32,
    pub subclass_rank: u32,
    /// Trigram similarity between `alias` and the query.
    pub similarity: f64,
}

/// Display attributes of a stored feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: u64,
    pub name: String,
    pub class: String,
    pub subclass: String,
    pub divisions: Vec<String>,
    #[serde(rename = "geom", skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Exact,
    Fuzzy,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResult {
    pub id: u64,
    pub name: String,
    pub class: String,
    pub subclass: String,
    pub divisions: Vec<String>,
    /// The alias that matched.
    pub alias: String,
    pub search_type: SearchType,
    /// Similarity between alias and query, rounded to three decimals.
    pub similarity: f64,
    #[serde(rename = "geom", skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
}

/// Per-call options for [`GeocodeEngine::geocode`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeOptions {
    pub limit: usize,
    /// Class names to search. Empty means every class.
    pub classes: Vec<String>,
    pub include_geometry: bool,
    /// Fuzzy-stage threshold for this call only. `None` uses the engine default.
    pub fuzzy_threshold: Option<f64>,
}

impl Default for GeocodeOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            classes: Vec::new(),
            include_geometry: false,
            fuzzy_threshold: None,
        }
    }
}

impl GeocodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_geometry(mut self) -> Self {
        self.include_geometry = true;
        self
    }

    pub fn fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = Some(threshold);
        self
    }
}

/// The retrieval contract a backing store fulfils.
///
/// Both stages return at most `query.ceiling` candidates restricted to
/// `query.classes` and to the length window of the query, ordered by
/// `(class_rank, subclass_rank)` ascending.
pub trait AliasStore {
    /// Aliases containing a token starting with each query token.
    fn exact_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>>;

    /// Aliases whose trigram similarity to the query exceeds `threshold`.
    fn fuzzy_candidates(&self, query: &CandidateQuery, threshold: f64) -> Result<Vec<Candidate>>;

    /// Features by id. Unknown ids are absent from the output.
    fn features(&self, ids: &[u64], include_geometry: bool) -> Result<Vec<FeatureRecord>>;
}

impl<S: AliasStore + ?Sized> AliasStore for &S {
    fn exact_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>> {
        (**self).exact_candidates(query)
    }

    fn fuzzy_candidates(&self, query: &CandidateQuery, threshold: f64) -> Result<Vec<Candidate>> {
        (**self).fuzzy_candidates(query, threshold)
    }

    fn features(&self, ids: &[u64], include_geometry: bool) -> Result<Vec<FeatureRecord>> {
        (**self).features(ids, include_geometry)
    }
}

impl<S: AliasStore + ?Sized> AliasStore for std::sync::Arc<S> {
    fn exact_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>> {
        (**self).exact_candidates(query)
    }

    fn fuzzy_candidates(&self, query: &CandidateQuery, threshold: f64) -> Result<Vec<Candidate>> {
        (**self).fuzzy_candidates(query, threshold)
    }

    fn features(&self, ids: &[u64], include_geometry: bool) -> Result<Vec<FeatureRecord>> {
        (**self).features(ids, include_geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_query_normalizes() {
        let query = CandidateQuery::new("  Kerkstr   AMS ", ClassFilter::All, 100).unwrap();
        assert_eq!(query.text, "kerkstr ams");
        assert_eq!(query.tokens, vec!["kerkstr", "ams"]);
        assert_eq!(query.word_count, 2);
        assert_eq!(query.length, 11);
    }

    #[test]
    fn test_candidate_query_rejects_empty() {
        for raw in ["", "   ", "--", "\t\n"] {
            assert_eq!(
                CandidateQuery::new(raw, ClassFilter::All, 100),
                Err(ValidationError::EmptyQuery),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn test_length_window() {
        let query = CandidateQuery::new("amsterdam", ClassFilter::All, 100).unwrap();
        assert!(query.within_length_window(1, 9));
        assert!(query.within_length_window(3, 38));
        assert!(!query.within_length_window(4, 9));
        assert!(!query.within_length_window(1, 39));

        // Spaces count towards the query length.
        let spaced = CandidateQuery::new("a b c", ClassFilter::All, 100).unwrap();
        assert_eq!(spaced.length, 5);
        assert!(spaced.within_length_window(3, 34));
        assert!(!spaced.within_length_window(3, 35));
    }

    #[test]
    fn test_class_filter() {
        assert_eq!(ClassFilter::parse(Vec::<String>::new()).unwrap(), ClassFilter::All);

        let filter = ClassFilter::parse(["Road", "division", "road"]).unwrap();
        assert_eq!(
            filter,
            ClassFilter::Only(vec![FeatureClass::Division, FeatureClass::Road])
        );
        assert!(filter.allows("road"));
        assert!(!filter.allows("poi"));
        assert!(ClassFilter::All.allows("anything"));

        assert_eq!(
            ClassFilter::parse(["division", "forest"]),
            Err(ValidationError::UnknownClass("forest".to_string()))
        );
    }

    #[test]
    fn test_result_serialization() {
        let result = GeocodeResult {
            id: 1,
            name: "Amsterdam".to_string(),
            class: "division".to_string(),
            subclass: "locality".to_string(),
            divisions: vec!["Noord-Holland".to_string()],
            alias: "amsterdam".to_string(),
            search_type: SearchType::Exact,
            similarity: 1.0,
            geometry: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["searchType"], "exact");
        assert!(json.get("geom").is_none());

        let with_geom = GeocodeResult {
            geometry: Some("{\"type\":\"Point\"}".to_string()),
            ..result
        };
        let json = serde_json::to_value(&with_geom).unwrap();
        assert_eq!(json["geom"], "{\"type\":\"Point\"}");
    }
}
