//! Per-document similarity index.
//!
//! [`SimilarityIndex`] packages one document's chunk embeddings with their
//! positions and ranks them against a query. The scoring rule follows the
//! embedding kind and is fixed for the life of the index:
//!
//! | Variant    | Embeddings   | Score                               |
//! |------------|--------------|-------------------------------------|
//! | `Cosine`   | dense        | cosine similarity, 0 for zero norms |
//! | `Overlap`  | sparse       | number of shared tokens             |
//! | `ExactL2`  | dense        | negated squared Euclidean distance  |
//!
//! `ExactL2` agrees with `Cosine` only when every vector is unit length.
//! TF-IDF rows and the bundled BERT encoder's outputs are; arbitrary
//! [`SentenceEncoder`](crate::SentenceEncoder) outputs may not be.
//!
//! Ties always rank the lower chunk position first.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::IndexKind;
use crate::embedding::{Embedding, SparseEmbedding};
use crate::error::{Result, RetrievalError};

/// One ranked chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Position of the chunk in the document's chunk sequence.
    pub position: usize,
    /// Similarity score (higher is more relevant).
    pub score: f32,
}

/// The ranked result of one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// At most `k` hits, best first.
    pub hits: Vec<SearchHit>,
    /// Positions whose score could not be computed. They are reported with
    /// score 0 and rank after every chunk that was scored.
    pub failed_positions: Vec<usize>,
    /// True when ranking failed outright and the first `k` chunks were
    /// returned in document order instead.
    pub degraded: bool,
}

impl SearchOutcome {
    /// Chunk positions in ranked order.
    pub fn positions(&self) -> Vec<usize> {
        self.hits.iter().map(|hit| hit.position).collect()
    }

    fn first_k(len: usize, k: usize) -> Self {
        Self {
            hits: (0..len.min(k)).map(|position| SearchHit { position, score: 0.0 }).collect(),
            failed_positions: Vec::new(),
            degraded: true,
        }
    }
}

/// An exhaustive index over one document's chunk embeddings.
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityIndex {
    /// Dense vectors ranked by cosine similarity.
    Cosine {
        /// One vector per chunk.
        vectors: Vec<Vec<f32>>,
        /// Dimensionality of the first vector.
        dimensions: usize,
    },
    /// Sparse token maps ranked by shared-token count.
    Overlap {
        /// One map per chunk.
        maps: Vec<SparseEmbedding>,
    },
    /// Dense vectors ranked by squared Euclidean distance.
    ExactL2 {
        /// Row-major storage, `dimensions` values per chunk.
        data: Vec<f32>,
        /// Dimensionality shared by every vector.
        dimensions: usize,
        /// Number of stored vectors.
        len: usize,
    },
}

impl SimilarityIndex {
    /// Package `embeddings` for search.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Index`] if the embeddings mix dense and
    /// sparse kinds, if [`IndexKind::ExactL2`] is asked to hold sparse maps,
    /// or if exact-L2 vectors disagree on dimensionality.
    pub fn build(embeddings: Vec<Embedding>, kind: IndexKind) -> Result<Self> {
        let dense = embeddings.first().map(Embedding::is_dense).unwrap_or(true);
        if embeddings.iter().any(|e| e.is_dense() != dense) {
            return Err(RetrievalError::Index(
                "cannot index a mix of dense and sparse embeddings".to_string(),
            ));
        }

        let index = match (kind, dense) {
            (IndexKind::Brute, true) => {
                let vectors: Vec<Vec<f32>> = embeddings.into_iter().filter_map(into_dense).collect();
                let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
                Self::Cosine { vectors, dimensions }
            }
            (IndexKind::Brute, false) => {
                Self::Overlap { maps: embeddings.into_iter().filter_map(into_sparse).collect() }
            }
            (IndexKind::ExactL2, true) => {
                let vectors: Vec<Vec<f32>> = embeddings.into_iter().filter_map(into_dense).collect();
                let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
                if let Some(position) = vectors.iter().position(|v| v.len() != dimensions) {
                    return Err(RetrievalError::Index(format!(
                        "vector {position} has {} dimensions, expected {dimensions}",
                        vectors[position].len()
                    )));
                }
                let len = vectors.len();
                Self::ExactL2 { data: vectors.concat(), dimensions, len }
            }
            (IndexKind::ExactL2, false) => {
                return Err(RetrievalError::Index(
                    "the exact L2 index requires dense vectors".to_string(),
                ));
            }
        };

        debug!(len = index.len(), kind = ?kind, "built similarity index");
        Ok(index)
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        match self {
            Self::Cosine { vectors, .. } => vectors.len(),
            Self::Overlap { maps } => maps.len(),
            Self::ExactL2 { len, .. } => *len,
        }
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the `k` chunks most similar to `query`.
    ///
    /// Yields exactly `min(k, len)` distinct positions. A chunk that cannot
    /// be scored ranks last and is reported with score 0. A query the index cannot compare with
    /// at all (wrong kind or dimensionality) yields the first `k` chunks in
    /// document order with [`SearchOutcome::degraded`] set.
    pub fn search(&self, query: &Embedding, k: usize) -> SearchOutcome {
        match self.score_all(query) {
            Ok((scored, failed_positions)) => {
                let mut unscored = vec![false; scored.len()];
                for &position in &failed_positions {
                    unscored[position] = true;
                }
                let mut hits: Vec<SearchHit> = scored
                    .into_iter()
                    .enumerate()
                    .map(|(position, score)| SearchHit { position, score })
                    .collect();
                // Unscored chunks rank below every scored one. `sort_by` is
                // stable, so equal scores keep document order.
                hits.sort_by(|a, b| {
                    unscored[a.position].cmp(&unscored[b.position]).then_with(|| {
                        b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
                    })
                });
                hits.truncate(k);
                SearchOutcome { hits, failed_positions, degraded: false }
            }
            Err(e) => {
                warn!(error = %e, "search failed, returning leading chunks");
                SearchOutcome::first_k(self.len(), k)
            }
        }
    }

    fn score_all(&self, query: &Embedding) -> Result<(Vec<f32>, Vec<usize>)> {
        let mut failed = Vec::new();
        let mut record = |position: usize, score: Result<f32>| match score {
            Ok(score) if score.is_finite() => score,
            Ok(score) => {
                warn!(position, score, "non-finite similarity, scoring as 0");
                failed.push(position);
                0.0
            }
            Err(e) => {
                warn!(position, error = %e, "failed to score chunk, scoring as 0");
                failed.push(position);
                0.0
            }
        };

        let scores: Vec<f32> = match (self, query) {
            (Self::Cosine { vectors, dimensions }, Embedding::Dense(q)) => {
                check_dimensions(q, *dimensions, vectors.is_empty())?;
                vectors
                    .iter()
                    .enumerate()
                    .map(|(position, v)| record(position, cosine_similarity(v, q)))
                    .collect()
            }
            (Self::Overlap { maps }, Embedding::Sparse(q)) => {
                maps.iter().map(|m| overlap_score(m, q)).collect()
            }
            (Self::ExactL2 { data, dimensions, len }, Embedding::Dense(q)) => {
                check_dimensions(q, *dimensions, *len == 0)?;
                if *dimensions == 0 {
                    vec![0.0; *len]
                } else {
                    data.chunks_exact(*dimensions)
                        .enumerate()
                        .map(|(position, v)| record(position, Ok(-squared_l2(v, q))))
                        .collect()
                }
            }
            _ => {
                return Err(RetrievalError::Index(format!(
                    "query embedding kind does not match a {} index",
                    self.kind_name()
                )));
            }
        };
        Ok((scores, failed))
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Cosine { .. } => "cosine",
            Self::Overlap { .. } => "overlap",
            Self::ExactL2 { .. } => "exact L2",
        }
    }
}

fn into_dense(embedding: Embedding) -> Option<Vec<f32>> {
    match embedding {
        Embedding::Dense(v) => Some(v),
        Embedding::Sparse(_) => None,
    }
}

fn into_sparse(embedding: Embedding) -> Option<SparseEmbedding> {
    match embedding {
        Embedding::Sparse(m) => Some(m),
        Embedding::Dense(_) => None,
    }
}

fn check_dimensions(query: &[f32], dimensions: usize, empty: bool) -> Result<()> {
    if !empty && query.len() != dimensions {
        return Err(RetrievalError::Index(format!(
            "query has {} dimensions, index has {dimensions}",
            query.len()
        )));
    }
    Ok(())
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
///
/// # Errors
///
/// Returns [`RetrievalError::Index`] if the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RetrievalError::Index(format!(
            "vector length mismatch: {} != {}",
            a.len(),
            b.len()
        )));
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

/// Number of tokens present in both maps.
pub fn overlap_score(a: &SparseEmbedding, b: &SparseEmbedding) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.keys().filter(|token| large.contains_key(*token)).count() as f32
}

/// Squared Euclidean distance of two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Package `embeddings` into a [`SimilarityIndex`] of the given kind.
///
/// # Errors
///
/// See [`SimilarityIndex::build`].
pub fn build_index(embeddings: Vec<Embedding>, kind: IndexKind) -> Result<SimilarityIndex> {
    SimilarityIndex::build(embeddings, kind)
}

/// Return the `k` chunks of `chunks` most similar to `query`, best first.
///
/// `chunks` must be the sequence the index was built from. The result has
/// `min(k, chunks.len())` entries with no repeated chunk.
pub fn retrieve_top_k(
    index: &SimilarityIndex,
    query: &Embedding,
    chunks: &[String],
    k: usize,
) -> Vec<String> {
    if index.len() != chunks.len() {
        warn!(index_len = index.len(), chunks = chunks.len(), "index and chunk list differ");
    }
    index
        .search(query, k.min(chunks.len()))
        .hits
        .iter()
        .filter_map(|hit| chunks.get(hit.position).cloned())
        .collect()
}
