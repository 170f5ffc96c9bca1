//! Word tokenization shared by the sparse and TF-IDF embedders.

use std::sync::LazyLock;

use regex::Regex;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\w+\b").expect("unreachable error: failed to compile word pattern")
});

static TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\w\w+\b").expect("unreachable error: failed to compile term pattern")
});

/// English stop words ignored by the TF-IDF vocabulary.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "almost", "also", "am", "an",
    "and", "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing",
    "done", "down", "during", "each", "either", "else", "enough", "etc", "even", "ever",
    "every", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her",
    "here", "hers", "herself", "him", "himself", "his", "how", "however", "i", "ie", "if", "in",
    "into", "is", "it", "its", "itself", "just", "least", "less", "may", "me", "might", "more",
    "most", "much", "must", "my", "myself", "neither", "no", "nor", "not", "now", "of", "off",
    "often", "on", "once", "only", "or", "other", "otherwise", "our", "ours", "ourselves",
    "out", "over", "own", "per", "perhaps", "rather", "same", "she", "should", "since", "so",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "therefore", "these", "they", "this", "those", "though", "through", "thus", "to",
    "together", "too", "under", "until", "up", "upon", "us", "very", "via", "was", "we",
    "well", "were", "what", "whatever", "when", "where", "whether", "which", "while", "who",
    "whom", "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
    "yours", "yourself", "yourselves",
];

/// Lowercase word tokens of any length.
pub fn word_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Lowercase terms of at least two characters, excluding English stop words.
pub fn index_terms(text: &str) -> impl Iterator<Item = String> + '_ {
    TERM.find_iter(text).map(|m| m.as_str().to_lowercase()).filter(|t| !is_stop_word(t))
}

fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.binary_search(&term).is_ok()
}
