use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strsim::{jaro_winkler, normalized_levenshtein};

/// Textual similarity used to score phrase hits against the query span.
///
/// Every metric returns a score between 0.0 and 1.0 (higher = more similar),
/// and 1.0 for identical strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Ratcliff/Obershelp: `2 * matched / total` over longest matching blocks
    #[default]
    Gestalt,
    Levenshtein,
    JaroWinkler,
}

impl SimilarityMetric {
    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            SimilarityMetric::Gestalt => gestalt_ratio(a, b),
            SimilarityMetric::Levenshtein => normalized_levenshtein(a, b),
            SimilarityMetric::JaroWinkler => {
                if a.is_empty() && b.is_empty() {
                    1.0
                } else {
                    jaro_winkler(a, b)
                }
            }
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gestalt" | "ratcliff" => Ok(SimilarityMetric::Gestalt),
            "levenshtein" => Ok(SimilarityMetric::Levenshtein),
            "jaro_winkler" | "jaro-winkler" => Ok(SimilarityMetric::JaroWinkler),
            other => Err(ResolveError::Config(format!(
                "unknown similarity metric: {}",
                other
            ))),
        }
    }
}

/// Ratcliff/Obershelp similarity over characters.
pub fn gestalt_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Sum of the sizes of all matching blocks: take the longest common run,
/// then recurse into the pieces left and right of it.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (i, j, k) = longest_match(&a[a_lo..a_hi], &b[b_lo..b_hi]);
        if k == 0 {
            continue;
        }
        matched += k;
        let (i, j) = (a_lo + i, b_lo + j);
        if a_lo < i && b_lo < j {
            pending.push((a_lo, i, b_lo, j));
        }
        if i + k < a_hi && j + k < b_hi {
            pending.push((i + k, a_hi, j + k, b_hi));
        }
    }

    matched
}

/// Longest common substring as `(start_a, start_b, len)`; among equally long
/// runs the one starting earliest in `a`, then earliest in `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // run[j + 1] = length of the common run ending at a[i], b[j]
    let mut prev = vec![0usize; b.len() + 1];
    let mut run = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            run[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let k = run[j + 1];
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut prev, &mut run);
    }

    best
}
