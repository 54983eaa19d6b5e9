//! Business-term recognition in free text.
//!
//! Catalog aliases and synonyms are tokenized into a word trie
//! ([`PhraseIndex`]). [`PhraseMatcher`] probes it with every contiguous
//! span of the query and scores each hit against the span it came from.

pub mod matcher;
pub mod shared;
pub mod similarity;
pub mod tokenizer;
pub mod trie;

pub use matcher::PhraseMatcher;
pub use shared::SharedPhraseIndex;
pub use similarity::{gestalt_ratio, SimilarityMetric};
pub use tokenizer::{SimpleTokenizer, Tokenizer};
pub use trie::{PhraseIndex, TrieNode};

use crate::catalog::SemanticTerm;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One indexed phrase found from a query span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// The full indexed phrase, words joined by single spaces
    pub surface_text: String,
    pub tag: SemanticTerm,
    /// Score in [0, 1] between the query span and `surface_text`
    pub similarity: f64,
}

impl MatchCandidate {
    /// Total order used to dedupe candidate sets deterministically.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.surface_text
            .cmp(&other.surface_text)
            .then_with(|| self.tag.cmp(&other.tag))
            .then_with(|| self.similarity.total_cmp(&other.similarity))
    }
}
