//! Word segmentation shared by index construction and query matching.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Letters/digits, allowing single inner hyphens or underscores ("year-over-year", "gmv_usd")
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+(?:[-_][\p{L}\p{N}]+)*").unwrap();
}

pub trait Tokenizer: Send + Sync {
    /// Normalized words of `text`, in order.
    fn words(&self, text: &str) -> Vec<String>;
}

/// Lowercases and drops punctuation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn words(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        WORD.find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_punctuation_normalized() {
        let words = SimpleTokenizer.words("Show me Total TPV, in 2024 (by transaction-time)?");
        assert_eq!(
            words,
            vec!["show", "me", "total", "tpv", "in", "2024", "by", "transaction-time"]
        );
    }

    #[test]
    fn test_dangling_separators_dropped() {
        assert_eq!(SimpleTokenizer.words("  -- gmv_ _usd  "), vec!["gmv", "usd"]);
        assert!(SimpleTokenizer.words("?!").is_empty());
    }
}
