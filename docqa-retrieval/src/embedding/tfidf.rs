//! TF-IDF embeddings fitted over one document's chunks.
//!
//! [`TfIdfEmbedder::fit`] builds a vocabulary and inverse document
//! frequencies from the chunk set of a single document and returns a
//! [`FittedTfIdf`]. Rows are raw term counts scaled by IDF and L2-normalized,
//! so cosine similarity and squared-L2 distance rank identically.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::tokenize::index_terms;

/// Smoothed inverse document frequency.
///
/// `ln((1 + n) / (1 + df)) + 1`, which stays positive for terms present in
/// every chunk.
#[inline]
pub fn smoothed_idf(total_documents: usize, doc_frequency: usize) -> f32 {
    let n = total_documents as f32;
    let df = doc_frequency as f32;
    ((1.0 + n) / (1.0 + df)).ln() + 1.0
}

/// Unfitted TF-IDF settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfIdfEmbedder {
    max_features: usize,
}

impl Default for TfIdfEmbedder {
    fn default() -> Self {
        Self { max_features: 1000 }
    }
}

impl TfIdfEmbedder {
    /// Create an embedder keeping at most `max_features` terms.
    pub fn new(max_features: usize) -> Self {
        Self { max_features }
    }

    /// Vocabulary cap.
    pub fn max_features(&self) -> usize {
        self.max_features
    }

    /// Fit vocabulary and IDF weights over `chunks`.
    ///
    /// The most frequent `max_features` terms across the whole chunk set are
    /// kept, ties broken alphabetically. Vector columns follow alphabetical
    /// term order.
    pub fn fit(&self, chunks: &[String]) -> FittedTfIdf {
        let mut corpus_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_frequency: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            let mut seen = HashSet::new();
            for term in index_terms(chunk) {
                *corpus_counts.entry(term.clone()).or_insert(0) += 1;
                if seen.insert(term.clone()) {
                    *doc_frequency.entry(term).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = corpus_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);

        let kept: BTreeMap<String, f32> = ranked
            .into_iter()
            .map(|(term, _)| {
                let df = doc_frequency.get(&term).copied().unwrap_or(0);
                let idf = smoothed_idf(chunks.len(), df);
                (term, idf)
            })
            .collect();

        let mut vocabulary = HashMap::with_capacity(kept.len());
        let mut idf = Vec::with_capacity(kept.len());
        for (column, (term, weight)) in kept.into_iter().enumerate() {
            vocabulary.insert(term, column);
            idf.push(weight);
        }

        debug!(vocabulary_size = idf.len(), documents = chunks.len(), "fitted tf-idf");
        FittedTfIdf { vocabulary, idf }
    }
}

/// TF-IDF weights scoped to one document's chunk set.
///
/// Never reuse a fitted model for another document: its vocabulary and
/// weights only describe the chunks it was fitted on.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedTfIdf {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl FittedTfIdf {
    /// Number of vector dimensions (vocabulary size).
    pub fn dimensions(&self) -> usize {
        self.idf.len()
    }

    /// Column index of `term`, if it is in the vocabulary.
    pub fn column(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    /// Map `text` to an L2-normalized TF-IDF vector.
    ///
    /// Terms outside the vocabulary are ignored; text with no known terms
    /// maps to the zero vector.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut row = vec![0.0f32; self.idf.len()];
        for term in index_terms(text) {
            if let Some(&column) = self.vocabulary.get(&term) {
                row[column] += 1.0;
            }
        }
        for (value, weight) in row.iter_mut().zip(&self.idf) {
            *value *= weight;
        }

        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|x| *x /= norm);
        }
        row
    }

    /// Transform every chunk, in order.
    pub fn transform_many(&self, chunks: &[String]) -> Vec<Vec<f32>> {
        chunks.iter().map(|chunk| self.transform(chunk)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn idf_is_one_for_terms_in_every_document() {
        assert!((smoothed_idf(4, 4) - 1.0).abs() < 1e-6);
        assert!(smoothed_idf(4, 1) > smoothed_idf(4, 3));
    }

    #[test]
    fn vocabulary_is_alphabetical_without_stop_words() {
        let fitted = TfIdfEmbedder::default().fit(&chunks(&["zebra apple", "the apple mango"]));
        assert_eq!(fitted.dimensions(), 3);
        assert_eq!(fitted.column("apple"), Some(0));
        assert_eq!(fitted.column("mango"), Some(1));
        assert_eq!(fitted.column("zebra"), Some(2));
        assert_eq!(fitted.column("the"), None);
    }

    #[test]
    fn max_features_keeps_most_frequent_terms() {
        let fitted =
            TfIdfEmbedder::new(2).fit(&chunks(&["policy policy grace", "policy grace waiting"]));
        assert_eq!(fitted.dimensions(), 2);
        assert!(fitted.column("policy").is_some());
        assert!(fitted.column("grace").is_some());
        assert!(fitted.column("waiting").is_none());
    }

    #[test]
    fn rows_are_unit_length_and_weight_rare_terms_higher() {
        let fitted = TfIdfEmbedder::default().fit(&chunks(&["common rare", "common other"]));
        let row = fitted.transform("common rare");
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let common = row[fitted.column("common").unwrap()];
        let rare = row[fitted.column("rare").unwrap()];
        assert!(rare > common);
    }

    #[test]
    fn unknown_terms_map_to_zero_vector() {
        let fitted = TfIdfEmbedder::default().fit(&chunks(&["grace period"]));
        assert!(fitted.transform("completely unrelated").iter().all(|x| *x == 0.0));
    }
}
