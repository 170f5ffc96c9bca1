//! Sparse token-frequency embeddings.

use super::SparseEmbedding;
use super::tokenize::word_tokens;

/// Maps text to lowercase word counts.
///
/// Needs no fitting, so the same instance serves every document and query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenFrequencyEmbedder;

impl TokenFrequencyEmbedder {
    /// Count the word tokens in `text`.
    pub fn embed(&self, text: &str) -> SparseEmbedding {
        let mut counts = SparseEmbedding::new();
        for token in word_tokens(text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        counts
    }

    /// Count the word tokens of every chunk, in order.
    pub fn embed_many(&self, chunks: &[String]) -> Vec<SparseEmbedding> {
        chunks.iter().map(|chunk| self.embed(chunk)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_repeated_tokens_case_insensitively() {
        let counts = TokenFrequencyEmbedder.embed("Dogs chase dogs. DOGS!");
        assert_eq!(counts.get("dogs"), Some(&3));
        assert_eq!(counts.get("chase"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn empty_text_is_an_empty_map() {
        assert!(TokenFrequencyEmbedder.embed("  ... ").is_empty());
    }
}
