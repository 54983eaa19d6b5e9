//! Snapshot handle for the phrase index.
//!
//! Resolution runs take an `Arc` snapshot at start and keep it for the whole
//! run. A rebuild constructs the new index off to the side and swaps it in,
//! so readers only ever observe a complete index.

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::phrase::{PhraseIndex, Tokenizer};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

pub struct SharedPhraseIndex {
    current: RwLock<Arc<PhraseIndex>>,
}

impl SharedPhraseIndex {
    pub fn new(index: PhraseIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<PhraseIndex> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in `index`, returning the one it replaces.
    pub fn replace(&self, index: PhraseIndex) -> Arc<PhraseIndex> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(index))
    }

    /// Reload every term from the catalog and swap in a fresh index built
    /// with the current similarity metric. Returns the new phrase count.
    pub async fn rebuild(
        &self,
        catalog: &dyn CatalogStore,
        tokenizer: &dyn Tokenizer,
    ) -> Result<usize> {
        let started = Instant::now();
        let terms = catalog.load_terms().await?;
        let term_count = terms.len();
        let index = PhraseIndex::build(terms, tokenizer, self.snapshot().metric());
        let phrases = index.len();
        self.replace(index);

        info!(
            terms = term_count,
            phrases,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "phrase index rebuilt"
        );
        Ok(phrases)
    }
}

impl Default for SharedPhraseIndex {
    fn default() -> Self {
        Self::new(PhraseIndex::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SemanticTerm;
    use crate::phrase::{SimilarityMetric, SimpleTokenizer};

    #[test]
    fn test_old_snapshot_survives_replace() {
        let shared = SharedPhraseIndex::default();
        let before = shared.snapshot();
        assert!(before.is_empty());

        let rebuilt = PhraseIndex::build(
            vec![SemanticTerm::metric("tpv", 1, 2)],
            &SimpleTokenizer,
            SimilarityMetric::Gestalt,
        );
        let replaced = shared.replace(rebuilt);

        assert!(Arc::ptr_eq(&before, &replaced));
        assert!(before.is_empty());
        assert_eq!(shared.snapshot().len(), 1);
    }
}
