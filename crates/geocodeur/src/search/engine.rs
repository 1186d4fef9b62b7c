use std::{cmp::Ordering, time::Instant};

use ahash::AHashMap as HashMap;
use tracing::{debug, info, instrument};

use super::{
    AliasStore, Candidate, CandidateQuery, ClassFilter, FeatureRecord, GeocodeOptions,
    GeocodeResult, Result, SearchError, SearchType,
};
use crate::{config::MAX_LIMIT, error::ValidationError, similarity::round_score};

/// Largest word-count difference between query and alias.
pub const MAX_WORD_COUNT_GAP: usize = 2;
/// Largest character-count difference between query and alias, spaces excluded.
pub const MAX_CHAR_COUNT_GAP: usize = 29;

const DEFAULT_THRESHOLD: f64 = 0.45;
const DEFAULT_CANDIDATE_CEILING: usize = 100;

/// Runs queries against an [`AliasStore`].
///
/// The engine holds no per-call state: a threshold override in one call's
/// options never affects another call.
#[derive(Debug, Clone)]
pub struct GeocodeEngine<S> {
    store: S,
    default_threshold: f64,
    candidate_ceiling: usize,
}

impl<S: AliasStore> GeocodeEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_threshold: DEFAULT_THRESHOLD,
            candidate_ceiling: DEFAULT_CANDIDATE_CEILING,
        }
    }

    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn with_candidate_ceiling(mut self, ceiling: usize) -> Self {
        self.candidate_ceiling = ceiling.max(1);
        self
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate a request without touching the store.
    pub fn prepare(
        &self,
        query: &str,
        options: &GeocodeOptions,
    ) -> std::result::Result<(CandidateQuery, f64), ValidationError> {
        if options.limit == 0 || options.limit > MAX_LIMIT {
            return Err(ValidationError::LimitOutOfRange {
                limit: options.limit,
                max: MAX_LIMIT,
            });
        }
        let threshold = options.fuzzy_threshold.unwrap_or(self.default_threshold);
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ValidationError::ThresholdOutOfRange(threshold));
        }
        let classes = ClassFilter::parse(&options.classes)?;
        let query = CandidateQuery::new(query, classes, self.candidate_ceiling)?;
        Ok((query, threshold))
    }

    /// Best matching features for `query`, at most `options.limit`, best first.
    #[instrument(name = "Geocode", skip(self, options), fields(limit = options.limit))]
    pub fn geocode(&self, query: &str, options: &GeocodeOptions) -> Result<Vec<GeocodeResult>> {
        let (query, threshold) = self.prepare(query, options)?;
        let t0 = Instant::now();

        let exact = self.store.exact_candidates(&query)?;
        let (search_type, candidates) = if exact.is_empty() {
            debug!(threshold, "No exact candidates, falling back to fuzzy search");
            (
                SearchType::Fuzzy,
                self.store.fuzzy_candidates(&query, threshold)?,
            )
        } else {
            (SearchType::Exact, exact)
        };
        let num_candidates = candidates.len();

        let ranked = rank_candidates(candidates, options.limit);
        let ids: Vec<u64> = ranked.iter().map(|c| c.feature_id).collect();
        let mut features: HashMap<u64, FeatureRecord> = self
            .store
            .features(&ids, options.include_geometry)?
            .into_iter()
            .map(|feature| (feature.id, feature))
            .collect();

        let results = ranked
            .into_iter()
            .map(|candidate| {
                let feature = features
                    .remove(&candidate.feature_id)
                    .ok_or(SearchError::MissingFeature(candidate.feature_id))?;
                Ok(GeocodeResult {
                    id: feature.id,
                    name: feature.name,
                    class: feature.class,
                    subclass: feature.subclass,
                    divisions: feature.divisions,
                    alias: candidate.alias,
                    search_type,
                    similarity: round_score(candidate.similarity),
                    geometry: if options.include_geometry {
                        feature.geometry
                    } else {
                        None
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            query = %query.text,
            %search_type,
            candidates = num_candidates,
            results = results.len(),
            elapsed = ?t0.elapsed(),
            "Geocode complete"
        );
        Ok(results)
    }

    /// The feature with `id`, if stored.
    pub fn lookup(&self, id: u64, include_geometry: bool) -> Result<Option<FeatureRecord>> {
        Ok(self
            .store
            .features(&[id], include_geometry)?
            .into_iter()
            .find(|feature| feature.id == id))
    }
}

/// Keep the best candidate per feature and order the survivors.
///
/// Per feature, the highest similarity wins, ties going to the alias that
/// sorts first. Survivors are ordered by similarity descending, then class
/// rank and subclass rank ascending, then feature id, and cut to `limit`.
pub fn rank_candidates(candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    let mut best: HashMap<u64, Candidate> = HashMap::with_capacity(candidates.len());
    for candidate in candidates {
        match best.get_mut(&candidate.feature_id) {
            Some(current) if beats(&candidate, current) => *current = candidate,
            Some(_) => {}
            None => {
                best.insert(candidate.feature_id, candidate);
            }
        }
    }

    let mut ranked: Vec<Candidate> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.class_rank.cmp(&b.class_rank))
            .then(a.subclass_rank.cmp(&b.subclass_rank))
            .then(a.feature_id.cmp(&b.feature_id))
    });
    ranked.truncate(limit);
    ranked
}

fn beats(challenger: &Candidate, current: &Candidate) -> bool {
    match challenger.similarity.total_cmp(&current.similarity) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => challenger.alias < current.alias,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rank::RankTable, similarity::trigram_similarity};
    use ahash::AHashSet as HashSet;
    use geocodeur_data::SourceFeature;
    use parking_lot::Mutex;

    fn candidate(feature_id: u64, alias: &str, similarity: f64) -> Candidate {
        Candidate {
            feature_id,
            alias: alias.to_string(),
            class_rank: 1,
            subclass_rank: 1,
            similarity,
        }
    }

    /// Store over an in-memory alias list, scanning linearly.
    #[derive(Default)]
    struct MemoryStore {
        features: Vec<FeatureRecord>,
        aliases: Vec<(u64, crate::alias::Alias)>,
        calls: Mutex<Vec<&'static str>>,
        thresholds: Mutex<Vec<f64>>,
    }

    impl MemoryStore {
        fn from_sources(sources: &[SourceFeature]) -> Self {
            let generator = crate::alias::AliasGenerator::new(RankTable::default());
            let mut store = Self::default();
            for (id, source) in (1u64..).zip(sources) {
                store.features.push(FeatureRecord {
                    id,
                    name: source.name.clone(),
                    class: source.class.clone(),
                    subclass: source.subclass.clone(),
                    divisions: source.relations.clone(),
                    geometry: source.geometry.clone(),
                });
                for alias in generator.generate(source) {
                    store.aliases.push((id, alias));
                }
            }
            store
        }

        fn class_of(&self, id: u64) -> &str {
            self.features
                .iter()
                .find(|f| f.id == id)
                .map_or("", |f| f.class.as_str())
        }

        fn scan(&self, query: &CandidateQuery, keep: impl Fn(&str) -> bool) -> Vec<Candidate> {
            let mut found: Vec<Candidate> = self
                .aliases
                .iter()
                .filter(|(id, alias)| {
                    query.classes.allows(self.class_of(*id))
                        && query.within_length_window(
                            alias.word_count as usize,
                            alias.char_count as usize,
                        )
                        && keep(&alias.text)
                })
                .map(|(id, alias)| Candidate {
                    feature_id: *id,
                    alias: alias.text.clone(),
                    class_rank: alias.class_rank,
                    subclass_rank: alias.subclass_rank,
                    similarity: trigram_similarity(&alias.text, &query.text),
                })
                .collect();
            found.sort_by_key(|c| (c.class_rank, c.subclass_rank));
            found.truncate(query.ceiling);
            found
        }
    }

    impl AliasStore for MemoryStore {
        fn exact_candidates(&self, query: &CandidateQuery) -> Result<Vec<Candidate>> {
            self.calls.lock().push("exact");
            Ok(self.scan(query, |text| {
                let words: Vec<String> = crate::similarity::tokenize(text).collect();
                query
                    .tokens
                    .iter()
                    .all(|token| words.iter().any(|word| word.starts_with(token.as_str())))
            }))
        }

        fn fuzzy_candidates(&self, query: &CandidateQuery, threshold: f64) -> Result<Vec<Candidate>> {
            self.calls.lock().push("fuzzy");
            self.thresholds.lock().push(threshold);
            Ok(self.scan(query, |text| trigram_similarity(text, &query.text) > threshold))
        }

        fn features(&self, ids: &[u64], include_geometry: bool) -> Result<Vec<FeatureRecord>> {
            self.calls.lock().push("features");
            Ok(self
                .features
                .iter()
                .filter(|f| ids.contains(&f.id))
                .cloned()
                .map(|mut f| {
                    if !include_geometry {
                        f.geometry = None;
                    }
                    f
                })
                .collect())
        }
    }

    struct FailingStore;

    impl AliasStore for FailingStore {
        fn exact_candidates(&self, _query: &CandidateQuery) -> Result<Vec<Candidate>> {
            Err(SearchError::Unavailable("connection refused".to_string()))
        }

        fn fuzzy_candidates(&self, _query: &CandidateQuery, _threshold: f64) -> Result<Vec<Candidate>> {
            Err(SearchError::Unavailable("connection refused".to_string()))
        }

        fn features(&self, _ids: &[u64], _include_geometry: bool) -> Result<Vec<FeatureRecord>> {
            Err(SearchError::Unavailable("connection refused".to_string()))
        }
    }

    fn amsterdam_store() -> MemoryStore {
        MemoryStore::from_sources(&[
            SourceFeature::new("Amsterdam", "division", "locality")
                .with_geometry("{\"type\":\"Point\",\"coordinates\":[4.9,52.37]}"),
            SourceFeature::new("Amsterdamsestraatweg", "road", "residential"),
        ])
    }

    #[test]
    fn test_amsterdam_ranks_before_street() {
        let engine = GeocodeEngine::new(amsterdam_store());
        let options = GeocodeOptions::new().limit(10).classes(["division", "road"]);
        let results = engine.geocode("amsterdam", &options).unwrap();

        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].search_type, SearchType::Exact);
        assert_eq!(results[0].similarity, 1.0);
        if let Some(street) = results.iter().position(|r| r.id == 2) {
            assert!(street > 0);
        }
    }

    #[test]
    fn test_empty_query_never_reaches_store() {
        let engine = GeocodeEngine::new(amsterdam_store());
        for query in ["", "   "] {
            let err = engine.geocode(query, &GeocodeOptions::default()).unwrap_err();
            assert!(matches!(err, SearchError::Validation(ValidationError::EmptyQuery)));
        }
        assert!(engine.store().calls.lock().is_empty());
    }

    #[test]
    fn test_invalid_options_never_reach_store() {
        let engine = GeocodeEngine::new(amsterdam_store());
        let cases = [
            GeocodeOptions::new().classes(["division", "forest"]),
            GeocodeOptions::new().limit(0),
            GeocodeOptions::new().limit(101),
            GeocodeOptions::new().fuzzy_threshold(0.0),
            GeocodeOptions::new().fuzzy_threshold(1.2),
        ];
        for options in &cases {
            let err = engine.geocode("amsterdam", options).unwrap_err();
            assert!(matches!(err, SearchError::Validation(_)), "{options:?}");
        }
        assert!(engine.store().calls.lock().is_empty());
    }

    #[test]
    fn test_fuzzy_only_when_exact_is_empty() {
        let engine = GeocodeEngine::new(amsterdam_store());

        let exact = engine.geocode("amster", &GeocodeOptions::default()).unwrap();
        assert!(exact.iter().all(|r| r.search_type == SearchType::Exact));
        assert_eq!(*engine.store().calls.lock(), vec!["exact", "features"]);

        engine.store().calls.lock().clear();
        let fuzzy = engine.geocode("amsterdm", &GeocodeOptions::default()).unwrap();
        assert!(!fuzzy.is_empty());
        assert!(fuzzy.iter().all(|r| r.search_type == SearchType::Fuzzy));
        assert_eq!(fuzzy[0].id, 1);
        assert_eq!(*engine.store().calls.lock(), vec!["exact", "fuzzy", "features"]);
    }

    #[test]
    fn test_one_result_per_feature() {
        let store = MemoryStore::from_sources(&[
            SourceFeature::new("Kerkstraat", "road", "residential")
                .with_relations(["Amsterdam", "Noord-Holland", "Nederland"]),
            SourceFeature::new("Kerkstraat", "road", "residential").with_relations(["Utrecht"]),
        ]);
        let engine = GeocodeEngine::new(store);
        for limit in [1, 2, 10, 100] {
            let results = engine
                .geocode("kerkstraat", &GeocodeOptions::new().limit(limit))
                .unwrap();
            let ids: HashSet<u64> = results.iter().map(|r| r.id).collect();
            assert_eq!(ids.len(), results.len());
            assert!(results.len() <= limit);
            assert!(results.iter().all(|r| r.alias == "kerkstraat"));
        }
    }

    #[test]
    fn test_threshold_override_does_not_leak() {
        let engine = GeocodeEngine::new(amsterdam_store()).with_default_threshold(0.45);

        engine
            .geocode("zzzz", &GeocodeOptions::new().fuzzy_threshold(0.9))
            .unwrap();
        engine.geocode("zzzz", &GeocodeOptions::new()).unwrap();

        assert_eq!(*engine.store().thresholds.lock(), vec![0.9, 0.45]);
        assert_eq!(engine.default_threshold(), 0.45);
    }

    #[test]
    fn test_geometry_only_on_request() {
        let engine = GeocodeEngine::new(amsterdam_store());
        let options = GeocodeOptions::new().classes(["division"]);

        let without = engine.geocode("amsterdam", &options).unwrap();
        assert_eq!(without[0].geometry, None);

        let with = engine.geocode("amsterdam", &options.with_geometry()).unwrap();
        assert!(with[0].geometry.as_deref().is_some_and(|g| g.contains("Point")));
    }

    #[test]
    fn test_class_filter_restricts_results() {
        let engine = GeocodeEngine::new(amsterdam_store());
        let results = engine
            .geocode("amsterdam", &GeocodeOptions::new().classes(["ROAD"]))
            .unwrap();
        assert!(results.iter().all(|r| r.class == "road"));
    }

    #[test]
    fn test_store_failure_is_propagated() {
        let engine = GeocodeEngine::new(FailingStore);
        let err = engine.geocode("amsterdam", &GeocodeOptions::default()).unwrap_err();
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[test]
    fn test_lookup() {
        let engine = GeocodeEngine::new(amsterdam_store());
        let found = engine.lookup(2, false).unwrap().unwrap();
        assert_eq!(found.name, "Amsterdamsestraatweg");
        assert!(engine.lookup(42, false).unwrap().is_none());
    }

    #[test]
    fn test_rank_candidates_dedup_and_order() {
        let mut road = candidate(3, "kerkstraat", 0.9);
        road.class_rank = 2;
        let ranked = rank_candidates(
            vec![
                candidate(1, "kerkstraat amsterdam", 0.5),
                candidate(1, "kerkstraat", 0.9),
                candidate(2, "b", 0.7),
                candidate(2, "a", 0.7),
                road,
            ],
            10,
        );
        let summary: Vec<(u64, &str)> = ranked.iter().map(|c| (c.feature_id, c.alias.as_str())).collect();
        assert_eq!(summary, vec![(1, "kerkstraat"), (3, "kerkstraat"), (2, "a")]);

        assert_eq!(rank_candidates(ranked, 2).len(), 2);
        assert!(rank_candidates(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_subclass_breaks_ties() {
        let mut motorway = candidate(1, "a2", 1.0);
        motorway.subclass_rank = 1;
        let mut residential = candidate(2, "a2", 1.0);
        residential.subclass_rank = 7;
        let ranked = rank_candidates(vec![residential, motorway], 10);
        assert_eq!(ranked[0].feature_id, 1);
    }
}
