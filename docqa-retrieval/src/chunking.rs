//! Document chunking.
//!
//! [`TextChunker`] normalizes document text and splits it into word-bounded
//! chunks. It prefers sentence boundaries and falls back to a sliding word
//! window when the text has no usable sentence punctuation:
//!
//! - **Sentences** — whole sentences are packed into a chunk until the next
//!   one would push it past `chunk_size` words. The next chunk is seeded with
//!   up to the last two sentences of the closed chunk, as many as still fit.
//! - **Word window** — windows of `chunk_size` words advancing by
//!   `chunk_size - chunk_overlap` words.
//!
//! [`validate_chunks`] is the quality gate applied afterwards.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, RetrievalError};

/// Number of trailing sentences carried into the next chunk.
const OVERLAP_SENTENCES: usize = 2;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\s.,!?;:\-()\[\]{}]")
        .expect("unreachable error: failed to compile unsafe character pattern")
});

static WHITESPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+").expect("unreachable error: failed to compile whitespace pattern")
});

/// Normalize text for chunking.
///
/// Characters outside word characters, whitespace and `. , ! ? ; : - ( ) [ ] { }`
/// become spaces, whitespace runs collapse to a single space, and the result
/// is trimmed. Applying it twice gives the same result as applying it once.
pub fn clean_text(text: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(text, " ");
    WHITESPACE_RUNS.replace_all(&replaced, " ").trim().to_string()
}

/// Split text into sentences at `.`, `!` or `?` followed by whitespace.
///
/// The terminal punctuation stays with its sentence; empty pieces are skipped.
pub fn split_into_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(next_i, next_c)) = chars.peek() else {
            continue;
        };
        if next_c.is_whitespace() {
            let sentence = text[start..next_i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = next_i;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// How a document was split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// The text was empty after normalization.
    Empty,
    /// Sentence-aware packing.
    Sentences,
    /// Fixed-size sliding word windows.
    WordWindow,
}

/// Splits normalized document text into overlapping word-bounded chunks.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_retrieval::TextChunker;
///
/// let chunker = TextChunker::new(500, 50)?;
/// let chunks = chunker.chunk(&document_text);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Create a new `TextChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` — maximum number of words per chunk
    /// * `chunk_overlap` — number of words shared by consecutive word windows
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_overlap >= chunk_size {
            return Err(RetrievalError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Maximum words per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Word overlap between consecutive word windows.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks.
    ///
    /// Returns an empty `Vec` for empty or whitespace-only text.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        self.chunk_with_strategy(text).0
    }

    /// Split `text` into chunks and report which strategy was used.
    pub fn chunk_with_strategy(&self, text: &str) -> (Vec<String>, ChunkStrategy) {
        let normalized = clean_text(text);
        if normalized.is_empty() {
            warn!(input_len = text.len(), "empty text provided for chunking");
            return (Vec::new(), ChunkStrategy::Empty);
        }

        let sentences = split_into_sentences(&normalized);
        if sentences.len() <= 1 {
            let chunks = self.chunk_by_words(&normalized);
            info!(chunk_count = chunks.len(), "created word-window chunks");
            return (chunks, ChunkStrategy::WordWindow);
        }

        let chunks = self.chunk_by_sentences(&sentences);
        info!(
            chunk_count = chunks.len(),
            sentence_count = sentences.len(),
            "created sentence chunks"
        );
        (chunks, ChunkStrategy::Sentences)
    }

    fn chunk_by_sentences(&self, sentences: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_words = 0;

        for &sentence in sentences {
            let sentence_words = word_count(sentence);

            if current_words + sentence_words > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(" "));

                // Seed with the closed chunk's tail, shedding leading sentences
                // until the seed plus the new sentence fits again.
                let mut seed = current[current.len().saturating_sub(OVERLAP_SENTENCES)..].to_vec();
                let mut seed_words: usize = seed.iter().map(|s| word_count(s)).sum();
                while !seed.is_empty() && seed_words + sentence_words > self.chunk_size {
                    seed_words -= word_count(seed.remove(0));
                }

                debug!(overlap_sentences = seed.len(), "starting new chunk");
                current = seed;
                current.push(sentence);
                current_words = seed_words + sentence_words;
            } else {
                current.push(sentence);
                current_words += sentence_words;
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }

    fn chunk_by_words(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < words.len() {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(words[start..end].join(" "));
            if end == words.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Split `text` into chunks of at most `chunk_size` words.
///
/// # Errors
///
/// Returns [`RetrievalError::Config`] if `chunk_overlap >= chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    Ok(TextChunker::new(chunk_size, chunk_overlap)?.chunk(text))
}

/// Chunks that passed [`validate_chunks`], plus the positions that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedChunks {
    /// Chunks kept, in original order.
    pub chunks: Vec<String>,
    /// Original positions of the dropped chunks.
    pub dropped: Vec<usize>,
}

/// Drop chunks whose trimmed length is at most `min_chars` characters.
pub fn validate_chunks(chunks: Vec<String>, min_chars: usize) -> ValidatedChunks {
    let total = chunks.len();
    let mut validated = ValidatedChunks::default();

    for (position, chunk) in chunks.into_iter().enumerate() {
        if chunk.trim().chars().count() > min_chars {
            validated.chunks.push(chunk);
        } else {
            warn!(position, "removed chunk: too short or empty");
            validated.dropped.push(position);
        }
    }

    info!(kept = validated.chunks.len(), total, "validated chunks");
    validated
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANIMALS: &str = "Cats are mammals. Dogs are mammals too. Fish are not mammals.";

    #[test]
    fn clean_text_collapses_whitespace_and_strips_symbols() {
        assert_eq!(clean_text("  hello\n\n\tworld  "), "hello world");
        assert_eq!(clean_text("price: $5 * 2 = 10"), "price: 5 2 10");
        assert_eq!(clean_text("keep (these) [marks] {ok}; yes!"), "keep (these) [marks] {ok}; yes!");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let once = clean_text("a\u{2014}b  c @ d.\n e?");
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn splits_sentences_on_terminal_punctuation() {
        assert_eq!(
            split_into_sentences("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(split_into_sentences("v1.2 is out."), vec!["v1.2 is out."]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = TextChunker::new(10, 2).unwrap();
        assert!(chunker.chunk("").is_empty());
        let (chunks, strategy) = chunker.chunk_with_strategy("   \n\t ");
        assert!(chunks.is_empty());
        assert_eq!(strategy, ChunkStrategy::Empty);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(TextChunker::new(5, 5).is_err());
        assert!(chunk_text("text", 3, 7).is_err());
    }

    #[test]
    fn animals_at_six_words_keep_sentence_boundaries() {
        // No two sentences fit in six words, so the overlap seed is shed.
        let (chunks, strategy) = TextChunker::new(6, 2).unwrap().chunk_with_strategy(ANIMALS);
        assert_eq!(strategy, ChunkStrategy::Sentences);
        assert_eq!(
            chunks,
            vec!["Cats are mammals.", "Dogs are mammals too.", "Fish are not mammals."]
        );
    }

    #[test]
    fn animals_at_eight_words_overlap_by_one_sentence() {
        let chunks = chunk_text(ANIMALS, 8, 2).unwrap();
        assert_eq!(
            chunks,
            vec![
                "Cats are mammals. Dogs are mammals too.",
                "Dogs are mammals too. Fish are not mammals.",
            ]
        );
    }

    #[test]
    fn overlap_seed_is_last_two_sentences_when_they_fit() {
        let text = "A b. C d. E f. G h. I j. K l.";
        let chunks = chunk_text(text, 10, 2).unwrap();
        assert_eq!(chunks, vec!["A b. C d. E f. G h. I j.", "G h. I j. K l."]);
    }

    #[test]
    fn overlap_carries_at_most_two_sentences() {
        let text = "A b. C d. E f. G h. I j.";
        let chunks = chunk_text(text, 6, 1).unwrap();
        assert_eq!(chunks, vec!["A b. C d. E f.", "C d. E f. G h.", "E f. G h. I j."]);
    }

    #[test]
    fn oversized_sentence_stands_alone() {
        let text = "Short one. This sentence has far too many words to fit. Tail here.";
        let chunks = chunk_text(text, 4, 1).unwrap();
        assert_eq!(
            chunks,
            vec!["Short one.", "This sentence has far too many words to fit.", "Tail here."]
        );
    }

    #[test]
    fn falls_back_to_word_windows_without_sentences() {
        let text = "one two three four five six seven eight nine ten";
        let (chunks, strategy) = TextChunker::new(4, 1).unwrap().chunk_with_strategy(text);
        assert_eq!(strategy, ChunkStrategy::WordWindow);
        assert_eq!(
            chunks,
            vec!["one two three four", "four five six seven", "seven eight nine ten"]
        );
    }

    #[test]
    fn short_single_sentence_is_one_chunk() {
        assert_eq!(chunk_text("Just one sentence.", 10, 2).unwrap(), vec!["Just one sentence."]);
    }

    #[test]
    fn rechunking_normalized_text_is_stable() {
        let text = "Alpha   beta.\nGamma delta epsilon!  Zeta eta? Theta.";
        let chunker = TextChunker::new(4, 1).unwrap();
        assert_eq!(chunker.chunk(text), chunker.chunk(&clean_text(text)));
    }

    #[test]
    fn validate_chunks_reports_dropped_positions() {
        let chunks = vec![
            "long enough chunk".to_string(),
            "   tiny   ".to_string(),
            String::new(),
            "exactly10!".to_string(),
            "eleven char".to_string(),
        ];
        let validated = validate_chunks(chunks, 10);
        assert_eq!(validated.chunks, vec!["long enough chunk", "eleven char"]);
        assert_eq!(validated.dropped, vec![1, 2, 3]);
    }
}
