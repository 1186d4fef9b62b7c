//! Alias generation: turns one prepared feature into its searchable text variants.

use std::collections::BTreeMap;

use geocodeur_data::SourceFeature;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    rank::RankTable,
    similarity::{char_count, word_count},
};

/// One searchable text variant of a feature, with precomputed ranking metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Lowercased search text.
    pub text: String,
    pub class_rank: u32,
    pub subclass_rank: u32,
    /// Whitespace-separated tokens in `text`.
    pub word_count: u32,
    /// Characters in `text`, spaces excluded.
    pub char_count: u32,
}

impl Alias {
    pub fn new(text: &str, class_rank: u32, subclass_rank: u32) -> Self {
        let text = text.to_lowercase();
        Self {
            word_count: word_count(&text) as u32,
            char_count: char_count(&text) as u32,
            text,
            class_rank,
            subclass_rank,
        }
    }

    /// Single sortable key ordering by class rank, then subclass rank.
    pub fn rank_key(&self) -> u64 {
        rank_key(self.class_rank, self.subclass_rank)
    }
}

pub(crate) fn rank_key(class_rank: u32, subclass_rank: u32) -> u64 {
    (u64::from(class_rank) << 32) | u64::from(subclass_rank)
}

/// Produces the aliases of a feature.
///
/// For a feature named `name` the generator emits, in order:
/// - `name` itself,
/// - the configured synonym of `name`, if any,
/// - `name` with each contained truncation token removed once,
/// - `name + " " + relation` for every relation that differs from `name`,
///   followed by `name + " " + synonym(relation)` when the relation has a synonym.
///
/// All texts are lowercased.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    truncations: Vec<String>,
    synonyms: BTreeMap<String, String>,
    ranks: RankTable,
}

impl AliasGenerator {
    pub fn new(ranks: RankTable) -> Self {
        Self {
            ranks,
            ..Default::default()
        }
    }

    pub fn with_truncations<I, S>(mut self, truncations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.truncations = truncations
            .into_iter()
            .map(Into::into)
            .filter(|token: &String| !token.is_empty())
            .collect();
        self
    }

    pub fn with_synonyms<I, K, V>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.synonyms = synonyms
            .into_iter()
            .map(|(name, synonym)| (name.into(), synonym.into()))
            .collect();
        self
    }

    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    /// All aliases of `feature`. A feature without a name yields none.
    pub fn generate(&self, feature: &SourceFeature) -> Vec<Alias> {
        if !feature.has_name() {
            warn!(
                class = %feature.class,
                subclass = %feature.subclass,
                "Skipping feature without a name"
            );
            return Vec::new();
        }

        let name = feature.name.as_str();
        let class_rank = self.ranks.class_rank(&feature.class);
        let subclass_rank = self.ranks.subclass_rank(&feature.subclass);
        let alias = |text: &str| Alias::new(text, class_rank, subclass_rank);

        let mut aliases = vec![alias(name)];

        if let Some(synonym) = self.synonyms.get(name) {
            aliases.push(alias(synonym));
        }

        for token in &self.truncations {
            if name.contains(token.as_str()) {
                let truncated = name.replacen(token.as_str(), "", 1);
                let truncated = truncated.trim();
                if !truncated.is_empty() {
                    aliases.push(alias(truncated));
                }
            }
        }

        for relation in feature.relations.iter().filter(|r| r.as_str() != name) {
            aliases.push(alias(&format!("{name} {relation}")));
            if let Some(synonym) = self.synonyms.get(relation) {
                aliases.push(alias(&format!("{name} {synonym}")));
            }
        }

        aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::UNKNOWN_RANK;

    fn generator() -> AliasGenerator {
        AliasGenerator::new(RankTable::default())
            .with_truncations(["Rijksweg"])
            .with_synonyms([("'s-Hertogenbosch", "Den Bosch")])
    }

    fn texts(aliases: &[Alias]) -> Vec<&str> {
        aliases.iter().map(|a| a.text.as_str()).collect()
    }

    #[test]
    fn test_name_is_always_an_alias() {
        let feature = SourceFeature::new("Amsterdam", "division", "locality");
        let aliases = generator().generate(&feature);
        assert_eq!(texts(&aliases), vec!["amsterdam"]);
    }

    #[test]
    fn test_relations_equal_to_name_are_skipped() {
        let feature = SourceFeature::new("Utrecht", "division", "locality")
            .with_relations(["Utrecht", "Nederland", "Utrecht"]);
        let aliases = generator().generate(&feature);
        assert_eq!(texts(&aliases), vec!["utrecht", "utrecht nederland"]);
    }

    #[test]
    fn test_truncation_token_is_removed_once() {
        let feature = SourceFeature::new("Rijksweg A2", "road", "motorway")
            .with_relations(["Utrecht"]);
        let aliases = generator().generate(&feature);
        assert_eq!(
            texts(&aliases),
            vec!["rijksweg a2", "a2", "rijksweg a2 utrecht"]
        );
    }

    #[test]
    fn test_truncation_to_empty_is_skipped() {
        let feature = SourceFeature::new("Rijksweg", "road", "motorway");
        let aliases = generator().generate(&feature);
        assert_eq!(texts(&aliases), vec!["rijksweg"]);
    }

    #[test]
    fn test_synonyms_for_name_and_relation() {
        let city = SourceFeature::new("'s-Hertogenbosch", "division", "locality");
        assert_eq!(
            texts(&generator().generate(&city)),
            vec!["'s-hertogenbosch", "den bosch"]
        );

        let street = SourceFeature::new("Kerkstraat", "road", "residential")
            .with_relations(["'s-Hertogenbosch"]);
        assert_eq!(
            texts(&generator().generate(&street)),
            vec![
                "kerkstraat",
                "kerkstraat 's-hertogenbosch",
                "kerkstraat den bosch"
            ]
        );
    }

    #[test]
    fn test_unnamed_feature_has_no_aliases() {
        assert!(generator().generate(&SourceFeature::new("", "road", "residential")).is_empty());
        assert!(generator().generate(&SourceFeature::new("   ", "road", "residential")).is_empty());
    }

    #[test]
    fn test_alias_metadata() {
        let feature = SourceFeature::new("Kerkstraat", "road", "residential")
            .with_relations(["Amsterdam"]);
        let aliases = generator().generate(&feature);
        let with_relation = &aliases[1];

        assert_eq!(with_relation.text, "kerkstraat amsterdam");
        assert_eq!(with_relation.class_rank, 2);
        assert_eq!(with_relation.subclass_rank, 7);
        assert_eq!(with_relation.word_count, 2);
        assert_eq!(with_relation.char_count, 19);
    }

    #[test]
    fn test_unknown_class_ranks() {
        let feature = SourceFeature::new("Vondelpark", "landuse", "park");
        let aliases = generator().generate(&feature);
        assert_eq!(aliases[0].class_rank, UNKNOWN_RANK);
        assert_eq!(aliases[0].subclass_rank, UNKNOWN_RANK);
    }

    #[test]
    fn test_rank_key_orders_class_before_subclass() {
        let division = Alias::new("a", 1, 100);
        let road = Alias::new("b", 2, 1);
        assert!(division.rank_key() < road.rank_key());
        assert!(Alias::new("c", 2, 1).rank_key() < Alias::new("d", 2, 7).rank_key());
    }
}
