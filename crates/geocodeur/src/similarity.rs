//! Text metrics shared by indexing and retrieval.
//!
//! Trigram similarity follows the pg_trgm definition so that scores are
//! comparable with a relational trigram index: every alphanumeric word is
//! lowercased and padded with two spaces in front and one behind, and the
//! similarity of two strings is the Jaccard index of their trigram sets.

use ahash::AHashSet as HashSet;
use rapidfuzz::distance::levenshtein;

/// Split text into lowercased alphanumeric tokens.
///
/// This is the tokenisation used for the prefix stage, both when indexing
/// aliases and when parsing queries.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Number of whitespace-separated tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Number of characters, spaces excluded.
pub fn char_count(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// The pg_trgm trigram set of `text`.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    for word in tokenize(text) {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain([' ']).collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Trigram similarity in `0.0..=1.0`. Two strings without any trigram score 0.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f64 / union as f64
}

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    levenshtein::distance(a.chars(), b.chars())
}

/// Round a score to three decimals for presentation.
pub fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        let tokens: Vec<String> = tokenize("'s-Hertogenbosch  Kerkstr.").collect();
        assert_eq!(tokens, vec!["s", "hertogenbosch", "kerkstr"]);
    }

    #[test]
    fn test_counts() {
        assert_eq!(word_count("amsterdam kerkstraat"), 2);
        assert_eq!(word_count("  amsterdam   "), 1);
        assert_eq!(char_count("amsterdam kerkstraat"), 19);
        assert_eq!(char_count(""), 0);
    }

    #[test]
    fn test_trigrams_of_word() {
        let grams = trigrams("cat");
        let expected: HashSet<String> = ["  c", " ca", "cat", "at "]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(grams, expected);
    }

    #[test]
    fn test_trigram_similarity_bounds() {
        assert!((trigram_similarity("amsterdam", "amsterdam") - 1.0).abs() < f64::EPSILON);
        assert!((trigram_similarity("Amsterdam", "amsterdam") - 1.0).abs() < f64::EPSILON);
        assert_eq!(trigram_similarity("", ""), 0.0);
        assert_eq!(trigram_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_trigram_similarity_typo() {
        let close = trigram_similarity("amsterdam", "amsterdm");
        let far = trigram_similarity("amsterdam", "rotterdam");
        assert!(close > far, "{close} should exceed {far}");
        assert!(close > 0.45);
    }

    #[test]
    fn test_trigram_similarity_known_value() {
        // "word" -> {"  w"," wo","wor","ord","rd "}, "two words" adds "  t"," tw","two","wo ",
        // and for "words" {"  w"," wo","wor","ord","rds","ds "}: shared 4 of 11.
        let sim = trigram_similarity("word", "two words");
        assert!((sim - 4.0 / 11.0).abs() < 1e-9, "{sim}");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kerkstr", "kerkstraat"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("straße", "strasse"), 2);
    }

    #[test]
    fn test_round_score() {
        assert!((round_score(0.123_456) - 0.123).abs() < f64::EPSILON);
        assert!((round_score(0.9996) - 1.0).abs() < f64::EPSILON);
    }
}
