//! Word-level prefix trie over catalog phrases.

use crate::catalog::SemanticTerm;
use crate::phrase::{MatchCandidate, SimilarityMetric, Tokenizer};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct TrieNode {
    word: Option<String>,
    /// Terms whose phrase ends here; several catalog fields may share an alias
    tags: Vec<SemanticTerm>,
    children: BTreeMap<String, TrieNode>,
}

impl TrieNode {
    fn with_word(word: &str) -> Self {
        Self {
            word: Some(word.to_string()),
            ..Self::default()
        }
    }

    pub fn word(&self) -> Option<&str> {
        self.word.as_deref()
    }

    pub fn tags(&self) -> &[SemanticTerm] {
        &self.tags
    }

    pub fn is_terminal(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn child(&self, word: &str) -> Option<&TrieNode> {
        self.children.get(word)
    }
}

/// Phrase index built once per catalog snapshot.
#[derive(Debug, Clone)]
pub struct PhraseIndex {
    root: TrieNode,
    metric: SimilarityMetric,
    phrase_count: usize,
}

impl Default for PhraseIndex {
    fn default() -> Self {
        Self::new(SimilarityMetric::default())
    }
}

impl PhraseIndex {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            root: TrieNode::default(),
            metric,
            phrase_count: 0,
        }
    }

    /// Tokenize and insert every term's surface alias.
    pub fn build<I>(terms: I, tokenizer: &dyn Tokenizer, metric: SimilarityMetric) -> Self
    where
        I: IntoIterator<Item = SemanticTerm>,
    {
        let mut index = Self::new(metric);
        let mut skipped = 0usize;
        for term in terms {
            let words = tokenizer.words(&term.surface_alias);
            if !index.insert(&words, term) {
                skipped += 1;
            }
        }
        debug!(phrases = index.phrase_count, skipped, "built phrase index");
        index
    }

    /// Insert one phrase. Returns `false` when the phrase has no words or the
    /// exact tag is already stored at its terminal node.
    pub fn insert<S: AsRef<str>>(&mut self, phrase: &[S], tag: SemanticTerm) -> bool {
        if phrase.is_empty() {
            return false;
        }

        let mut node = &mut self.root;
        for word in phrase {
            let word = word.as_ref();
            node = node
                .children
                .entry(word.to_string())
                .or_insert_with(|| TrieNode::with_word(word));
        }

        if node.tags.contains(&tag) {
            return false;
        }
        node.tags.push(tag);
        self.phrase_count += 1;
        true
    }

    /// Every indexed phrase starting with `prefix`.
    ///
    /// Descent is exact: the first word without a matching child ends the
    /// search with no results. Each hit is scored between the prefix text and
    /// the full matched phrase.
    pub fn search_prefix<S: AsRef<str>>(&self, prefix: &[S]) -> Vec<MatchCandidate> {
        let mut out = Vec::new();
        if let Some(node) = self.node_for(prefix) {
            self.collect_from(node, prefix, &mut out);
        }
        out
    }

    pub fn node_for<S: AsRef<str>>(&self, prefix: &[S]) -> Option<&TrieNode> {
        prefix
            .iter()
            .try_fold(&self.root, |node, word| node.child(word.as_ref()))
    }

    /// Collect the subtree of `node`, which must be the node reached by `prefix`.
    pub(crate) fn collect_from<S: AsRef<str>>(
        &self,
        node: &TrieNode,
        prefix: &[S],
        out: &mut Vec<MatchCandidate>,
    ) {
        let prefix_text = join_words(prefix);
        let mut path: Vec<&str> = prefix.iter().map(|w| w.as_ref()).collect();
        self.dfs(node, &mut path, &prefix_text, out);
    }

    fn dfs<'a>(
        &self,
        node: &'a TrieNode,
        path: &mut Vec<&'a str>,
        prefix_text: &str,
        out: &mut Vec<MatchCandidate>,
    ) {
        if node.is_terminal() {
            let phrase = path.join(" ");
            let similarity = self.metric.score(prefix_text, &phrase);
            for tag in &node.tags {
                out.push(MatchCandidate {
                    surface_text: phrase.clone(),
                    tag: tag.clone(),
                    similarity,
                });
            }
        }

        for (word, child) in &node.children {
            path.push(word.as_str());
            self.dfs(child, path, prefix_text, out);
            path.pop();
        }
    }

    pub fn root(&self) -> &TrieNode {
        &self.root
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Number of `(phrase, tag)` pairs stored.
    pub fn len(&self) -> usize {
        self.phrase_count
    }

    pub fn is_empty(&self) -> bool {
        self.phrase_count == 0
    }
}

fn join_words<S: AsRef<str>>(words: &[S]) -> String {
    words.iter().map(|w| w.as_ref()).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrase::SimpleTokenizer;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn index() -> PhraseIndex {
        PhraseIndex::build(
            vec![
                SemanticTerm::metric("tpv", 1, 2),
                SemanticTerm::dimension("transaction time", 1, 3),
                SemanticTerm::dimension("transaction type", 1, 4),
                SemanticTerm::metric("total tpv", 2, 8),
            ],
            &SimpleTokenizer,
            SimilarityMetric::Gestalt,
        )
    }

    #[test]
    fn test_inserted_phrase_found_with_full_similarity() {
        let index = index();
        for (phrase, tag) in [
            ("tpv", SemanticTerm::metric("tpv", 1, 2)),
            ("transaction time", SemanticTerm::dimension("transaction time", 1, 3)),
            ("total tpv", SemanticTerm::metric("total tpv", 2, 8)),
        ] {
            let hits = index.search_prefix(&words(phrase));
            let exact = hits
                .iter()
                .find(|c| c.surface_text == phrase && c.tag == tag)
                .unwrap_or_else(|| panic!("{} not found", phrase));
            assert_eq!(exact.similarity, 1.0);
        }
    }

    #[test]
    fn test_prefix_collects_whole_subtree() {
        let hits = index().search_prefix(&["transaction"]);
        let mut phrases: Vec<&str> = hits.iter().map(|c| c.surface_text.as_str()).collect();
        phrases.sort();
        assert_eq!(phrases, vec!["transaction time", "transaction type"]);
        assert!(hits.iter().all(|c| c.similarity < 0.9));
    }

    #[test]
    fn test_missing_word_fails_immediately() {
        let index = index();
        assert!(index.search_prefix(&["transactions"]).is_empty());
        assert!(index.search_prefix(&["transaction", "date"]).is_empty());
        assert!(index.search_prefix(&["tpv", "growth"]).is_empty());
    }

    #[test]
    fn test_shared_alias_keeps_every_tag() {
        let mut index = index();
        assert!(index.insert(&["tpv"], SemanticTerm::metric("tpv", 5, 21)));
        assert!(!index.insert(&["tpv"], SemanticTerm::metric("tpv", 5, 21)));
        assert!(!index.insert::<&str>(&[], SemanticTerm::metric("", 5, 22)));

        let hits = index.search_prefix(&["tpv"]);
        assert_eq!(hits.len(), 2);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_node_words_recorded() {
        let index = index();
        let node = index.node_for(&["transaction", "time"]).unwrap();
        assert_eq!(node.word(), Some("time"));
        assert!(node.is_terminal());
        assert!(!index.node_for(&["transaction"]).unwrap().is_terminal());
        assert_eq!(index.root().word(), None);
    }
}
