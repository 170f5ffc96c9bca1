//! Configuration for the retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Which embedding variant the pipeline uses for a document.
///
/// The variant is chosen once at process start and every embedding compared
/// within one document comes from it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Lowercase word counts, compared by key overlap.
    TokenFrequency,
    /// TF-IDF vectors fitted over the document's own chunks.
    #[default]
    TfIdf,
    /// A pretrained sentence encoder, falling back to token frequency when
    /// the model is unavailable.
    Dense,
}

impl EmbedderKind {
    /// Whether this variant produces fixed-dimension dense vectors.
    pub fn is_dense_vector(self) -> bool {
        matches!(self, Self::TfIdf | Self::Dense)
    }
}

/// Which search strategy the similarity index uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Score every chunk with the variant's similarity rule.
    #[default]
    Brute,
    /// Exhaustive squared-L2 nearest neighbours over dense vectors.
    ExactL2,
}

/// Configuration parameters for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum chunk size in words.
    pub chunk_size: usize,
    /// Word overlap used by the fixed-window fallback chunker.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Chunks whose trimmed length is at most this many characters are dropped.
    pub min_chunk_chars: usize,
    /// Embedding variant.
    pub embedder: EmbedderKind,
    /// Index search strategy.
    pub index: IndexKind,
    /// Vocabulary cap for the TF-IDF variant.
    pub tfidf_max_features: usize,
    /// Inputs to the dense encoder are truncated to this many characters.
    pub max_embed_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 3,
            min_chunk_chars: 10,
            embedder: EmbedderKind::default(),
            index: IndexKind::default(),
            tfidf_max_features: 1000,
            max_embed_chars: 2000,
        }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// Configurations deserialized from files bypass the builder, so callers
    /// loading them should validate before use.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `tfidf_max_features == 0` or `max_embed_chars == 0`
    /// - `index` is [`IndexKind::ExactL2`] with a sparse embedder
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RetrievalError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be greater than zero".to_string()));
        }
        if self.tfidf_max_features == 0 {
            return Err(RetrievalError::Config(
                "tfidf_max_features must be greater than zero".to_string(),
            ));
        }
        if self.max_embed_chars == 0 {
            return Err(RetrievalError::Config(
                "max_embed_chars must be greater than zero".to_string(),
            ));
        }
        if self.index == IndexKind::ExactL2 && !self.embedder.is_dense_vector() {
            return Err(RetrievalError::Config(format!(
                "the exact L2 index requires dense vectors, but embedder is {:?}",
                self.embedder
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Set the maximum chunk size in words.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the word overlap for the fixed-window fallback.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum meaningful chunk length in characters.
    pub fn min_chunk_chars(mut self, chars: usize) -> Self {
        self.config.min_chunk_chars = chars;
        self
    }

    /// Set the embedding variant.
    pub fn embedder(mut self, kind: EmbedderKind) -> Self {
        self.config.embedder = kind;
        self
    }

    /// Set the index search strategy.
    pub fn index(mut self, kind: IndexKind) -> Self {
        self.config.index = kind;
        self
    }

    /// Set the TF-IDF vocabulary cap.
    pub fn tfidf_max_features(mut self, max: usize) -> Self {
        self.config.tfidf_max_features = max;
        self
    }

    /// Set the dense encoder input truncation length in characters.
    pub fn max_embed_chars(mut self, chars: usize) -> Self {
        self.config.max_embed_chars = chars;
        self
    }

    /// Build the [`RetrievalConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RetrievalConfig::validate`].
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
