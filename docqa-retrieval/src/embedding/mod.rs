//! Text representations for similarity comparison.
//!
//! [`Embedder`] is the configuration-selected entry point. It embeds a
//! document's chunks in one pass and hands back a [`QueryEmbedder`] bound to
//! the same variant (and, for TF-IDF, to the same fitted weights), so a
//! document's chunks and its questions can never be embedded differently.
//!
//! Variants:
//!
//! - [`TokenFrequencyEmbedder`] — sparse word counts
//! - [`TfIdfEmbedder`] — TF-IDF vectors fitted per document
//! - [`DenseEmbedder`] — a pretrained [`SentenceEncoder`] reached through a
//!   [`ModelHandle`], degrading to token frequency when the model is missing

#[cfg(feature = "candle")]
pub mod candle;
pub mod dense;
pub mod frequency;
pub mod tfidf;
pub mod tokenize;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{EmbedderKind, RetrievalConfig};
use crate::error::{Result, RetrievalError};

pub use dense::{DenseEmbedder, ModelHandle, SentenceEncoder};
pub use frequency::TokenFrequencyEmbedder;
pub use tfidf::{FittedTfIdf, TfIdfEmbedder};

/// Token → count map produced by the sparse variant.
pub type SparseEmbedding = BTreeMap<String, u32>;

/// A comparable representation of a chunk or a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Embedding {
    /// A fixed-dimension vector.
    Dense(Vec<f32>),
    /// A sparse token-frequency map.
    Sparse(SparseEmbedding),
}

impl Embedding {
    /// Whether this is a dense vector.
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    /// Vector dimensionality, or the number of distinct tokens for sparse maps.
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(vector) => vector.len(),
            Self::Sparse(map) => map.len(),
        }
    }

    /// Whether the embedding carries no components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened while embedding one document's chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingReport {
    /// The variant the configuration asked for.
    pub requested: EmbedderKind,
    /// The variant actually used for every chunk and question.
    pub effective: EmbedderKind,
    /// Positions of chunks that received a neutral embedding.
    pub failed_chunks: Vec<usize>,
}

impl EmbeddingReport {
    fn clean(kind: EmbedderKind) -> Self {
        Self { requested: kind, effective: kind, failed_chunks: Vec::new() }
    }

    /// Whether the pipeline fell back from the requested variant.
    pub fn degraded(&self) -> bool {
        self.requested != self.effective
    }
}

/// The chunk embeddings of one document plus the matching query embedder.
#[derive(Debug)]
pub struct EmbeddedChunks {
    /// One embedding per input chunk, in order.
    pub embeddings: Vec<Embedding>,
    /// Embeds questions for this document only.
    pub query_embedder: QueryEmbedder,
    /// Degradation details.
    pub report: EmbeddingReport,
}

/// The configuration-selected embedding variant.
///
/// Cheap to clone; one instance can serve every request of a process.
#[derive(Debug, Clone)]
pub enum Embedder {
    /// Sparse word counts.
    TokenFrequency(TokenFrequencyEmbedder),
    /// Per-document TF-IDF.
    TfIdf(TfIdfEmbedder),
    /// Pretrained sentence encoder.
    Dense(DenseEmbedder),
}

impl Embedder {
    /// Select the variant named by `config`.
    ///
    /// `model` is only consulted for [`EmbedderKind::Dense`]; pass
    /// [`ModelHandle::unavailable`] when the process has no encoder.
    pub fn from_config(config: &RetrievalConfig, model: Arc<ModelHandle>) -> Self {
        match config.embedder {
            EmbedderKind::TokenFrequency => Self::TokenFrequency(TokenFrequencyEmbedder),
            EmbedderKind::TfIdf => Self::TfIdf(TfIdfEmbedder::new(config.tfidf_max_features)),
            EmbedderKind::Dense => Self::Dense(DenseEmbedder::new(model, config.max_embed_chars)),
        }
    }

    /// The configured variant.
    pub fn kind(&self) -> EmbedderKind {
        match self {
            Self::TokenFrequency(_) => EmbedderKind::TokenFrequency,
            Self::TfIdf(_) => EmbedderKind::TfIdf,
            Self::Dense(_) => EmbedderKind::Dense,
        }
    }

    /// Embed every chunk of one document.
    ///
    /// Never fails: a missing dense model degrades the whole document to
    /// token frequency, and a chunk the encoder rejects gets a zero vector.
    /// Both are recorded in the returned [`EmbeddingReport`].
    pub fn embed_chunks(&self, chunks: &[String]) -> EmbeddedChunks {
        let embedded = match self {
            Self::TokenFrequency(embedder) => sparse_chunks(*embedder, chunks, self.kind()),
            Self::TfIdf(embedder) => {
                let fitted = embedder.fit(chunks);
                let embeddings =
                    fitted.transform_many(chunks).into_iter().map(Embedding::Dense).collect();
                EmbeddedChunks {
                    embeddings,
                    query_embedder: QueryEmbedder::TfIdf(fitted),
                    report: EmbeddingReport::clean(EmbedderKind::TfIdf),
                }
            }
            Self::Dense(dense) => match dense.encoder() {
                Some(encoder) => {
                    let (vectors, failed_chunks) =
                        dense::encode_chunks(encoder.as_ref(), chunks, dense.max_chars());
                    EmbeddedChunks {
                        embeddings: vectors.into_iter().map(Embedding::Dense).collect(),
                        query_embedder: QueryEmbedder::Dense {
                            encoder,
                            max_chars: dense.max_chars(),
                        },
                        report: EmbeddingReport {
                            requested: EmbedderKind::Dense,
                            effective: EmbedderKind::Dense,
                            failed_chunks,
                        },
                    }
                }
                None => {
                    warn!("dense encoder unavailable, falling back to token frequency");
                    sparse_chunks(TokenFrequencyEmbedder, chunks, EmbedderKind::Dense)
                }
            },
        };

        info!(
            chunk_count = embedded.embeddings.len(),
            variant = ?embedded.report.effective,
            failed = embedded.report.failed_chunks.len(),
            "embedded chunks"
        );
        embedded
    }
}

fn sparse_chunks(
    embedder: TokenFrequencyEmbedder,
    chunks: &[String],
    requested: EmbedderKind,
) -> EmbeddedChunks {
    EmbeddedChunks {
        embeddings: embedder.embed_many(chunks).into_iter().map(Embedding::Sparse).collect(),
        query_embedder: QueryEmbedder::TokenFrequency(embedder),
        report: EmbeddingReport {
            requested,
            effective: EmbedderKind::TokenFrequency,
            failed_chunks: Vec::new(),
        },
    }
}

/// Embeds questions with the variant a document's chunks were embedded with.
pub enum QueryEmbedder {
    /// Sparse word counts.
    TokenFrequency(TokenFrequencyEmbedder),
    /// TF-IDF weights fitted on the document's chunks.
    TfIdf(FittedTfIdf),
    /// The loaded sentence encoder.
    Dense {
        /// Shared encoder.
        encoder: Arc<dyn SentenceEncoder>,
        /// Input truncation length in characters.
        max_chars: usize,
    },
}

impl std::fmt::Debug for QueryEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenFrequency(_) => f.write_str("QueryEmbedder::TokenFrequency"),
            Self::TfIdf(fitted) => f
                .debug_struct("QueryEmbedder::TfIdf")
                .field("dimensions", &fitted.dimensions())
                .finish(),
            Self::Dense { encoder, max_chars } => f
                .debug_struct("QueryEmbedder::Dense")
                .field("dimensions", &encoder.dimensions())
                .field("max_chars", max_chars)
                .finish(),
        }
    }
}

impl QueryEmbedder {
    /// The variant in use.
    pub fn kind(&self) -> EmbedderKind {
        match self {
            Self::TokenFrequency(_) => EmbedderKind::TokenFrequency,
            Self::TfIdf(_) => EmbedderKind::TfIdf,
            Self::Dense { .. } => EmbedderKind::Dense,
        }
    }

    /// Embed one question.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Embedding`] if the dense encoder fails or
    /// returns a vector of the wrong size. The sparse variants cannot fail.
    pub fn embed_query(&self, text: &str) -> Result<Embedding> {
        match self {
            Self::TokenFrequency(embedder) => Ok(Embedding::Sparse(embedder.embed(text))),
            Self::TfIdf(fitted) => Ok(Embedding::Dense(fitted.transform(text))),
            Self::Dense { encoder, max_chars } => {
                let vector = encoder.encode(dense::truncate_chars(text, *max_chars))?;
                if vector.len() != encoder.dimensions() {
                    return Err(RetrievalError::Embedding {
                        variant: "dense".to_string(),
                        message: format!(
                            "encoder returned {} dimensions, expected {}",
                            vector.len(),
                            encoder.dimensions()
                        ),
                    });
                }
                Ok(Embedding::Dense(vector))
            }
        }
    }
}
