use crate::phrase::{MatchCandidate, PhraseIndex, Tokenizer};
use tracing::debug;

/// Finds indexed phrases anywhere in a query.
pub struct PhraseMatcher<'a> {
    index: &'a PhraseIndex,
    tokenizer: &'a dyn Tokenizer,
}

impl<'a> PhraseMatcher<'a> {
    pub fn new(index: &'a PhraseIndex, tokenizer: &'a dyn Tokenizer) -> Self {
        Self { index, tokenizer }
    }

    /// Prefix-search every contiguous word span of `query` and return the
    /// union of the hits, with identical `(phrase, tag, similarity)` triples
    /// collapsed. Result order is canonical (phrase, then tag, then score).
    ///
    /// Spans sharing a start word share their trie descent: once
    /// `words[start..=end]` falls off the trie, every longer span from the
    /// same start would too, so the walk for that start stops there.
    pub fn match_all(&self, query: &str) -> Vec<MatchCandidate> {
        let words = self.tokenizer.words(query);
        let mut candidates = Vec::new();

        for start in 0..words.len() {
            let mut node = self.index.root();
            for end in start..words.len() {
                node = match node.child(&words[end]) {
                    Some(child) => child,
                    None => break,
                };
                self.index
                    .collect_from(node, &words[start..=end], &mut candidates);
            }
        }

        candidates.sort_by(|a, b| a.canonical_cmp(b));
        candidates.dedup();
        debug!(words = words.len(), candidates = candidates.len(), "phrase matching done");
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SemanticTerm;
    use crate::phrase::{SimilarityMetric, SimpleTokenizer};

    fn index(terms: Vec<SemanticTerm>) -> PhraseIndex {
        PhraseIndex::build(terms, &SimpleTokenizer, SimilarityMetric::Gestalt)
    }

    #[test]
    fn test_every_span_is_tried() {
        let index = index(vec![
            SemanticTerm::dimension("b", 1, 1),
            SemanticTerm::dimension("b c", 1, 2),
        ]);
        let hits = PhraseMatcher::new(&index, &SimpleTokenizer).match_all("a b c");

        let exact: Vec<(&str, i64)> = hits
            .iter()
            .filter(|c| c.similarity == 1.0)
            .map(|c| (c.surface_text.as_str(), c.tag.field_id))
            .collect();
        assert_eq!(exact, vec![("b", 1), ("b c", 2)]);
    }

    #[test]
    fn test_matches_equal_per_span_prefix_search() {
        let index = index(vec![
            SemanticTerm::metric("tpv", 1, 2),
            SemanticTerm::metric("total tpv", 1, 5),
            SemanticTerm::dimension("transaction time", 1, 3),
        ]);
        let query = "show me total tpv in 2024 of transaction time";
        let hits = PhraseMatcher::new(&index, &SimpleTokenizer).match_all(query);

        let words = SimpleTokenizer.words(query);
        let mut expected = Vec::new();
        for start in 0..words.len() {
            for end in start + 1..=words.len() {
                expected.extend(index.search_prefix(&words[start..end]));
            }
        }
        expected.sort_by(|a, b| a.canonical_cmp(b));
        expected.dedup();

        assert_eq!(hits, expected);
    }

    #[test]
    fn test_duplicate_hits_collapse() {
        let index = index(vec![SemanticTerm::metric("tpv", 1, 2)]);
        let hits = PhraseMatcher::new(&index, &SimpleTokenizer).match_all("tpv vs tpv");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].surface_text, "tpv");
    }

    #[test]
    fn test_empty_and_single_word_queries() {
        let index = index(vec![
            SemanticTerm::metric("tpv", 1, 2),
            SemanticTerm::metric("tpv growth", 1, 6),
        ]);
        let matcher = PhraseMatcher::new(&index, &SimpleTokenizer);
        assert!(matcher.match_all("").is_empty());
        assert!(matcher.match_all("   ").is_empty());

        let hits = matcher.match_all("TPV");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|c| c.surface_text == "tpv" && c.similarity == 1.0));
        assert!(hits
            .iter()
            .any(|c| c.surface_text == "tpv growth" && c.similarity < 1.0));
    }
}
