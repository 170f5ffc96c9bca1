//! # docqa-retrieval
//!
//! Per-request retrieval for document question answering.
//!
//! ## Overview
//!
//! This crate turns one document's text into ranked context for a list of
//! questions. It performs no I/O: the text comes from a document loader and
//! the contexts go to an answer generator, both owned by the caller.
//!
//! - [`TextChunker`] — sentence-aware chunking with a word-window fallback
//! - [`Embedder`] — token frequency, per-document TF-IDF, or a dense
//!   [`SentenceEncoder`] behind a lazily loaded [`ModelHandle`]
//! - [`SimilarityIndex`] — exhaustive cosine, token-overlap or squared-L2
//!   ranking with stable ties
//! - [`Retriever`] — chunk → validate → embed → index, then per-question
//!   retrieval
//!
//! Data-dependent problems degrade rather than fail and are surfaced through
//! [`EmbeddingReport`], [`SearchOutcome`] and [`RetrievalReport`]. Only an
//! invalid configuration or a document with no usable content is an error.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docqa_retrieval::{EmbedderKind, RetrievalConfig, Retriever};
//!
//! let config = RetrievalConfig::builder()
//!     .chunk_size(200)
//!     .chunk_overlap(20)
//!     .embedder(EmbedderKind::TfIdf)
//!     .build()?;
//!
//! let document = Retriever::new(config)?.prepare(&text)?;
//! let context = document.retrieve("What is the grace period?")?;
//! ```
//!
//! ## Features
//!
//! - `candle` — a local BERT sentence encoder ([`embedding::candle`])

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod retriever;

pub use chunking::{
    ChunkStrategy, TextChunker, ValidatedChunks, chunk_text, clean_text, split_into_sentences,
    validate_chunks,
};
pub use config::{EmbedderKind, IndexKind, RetrievalConfig, RetrievalConfigBuilder};
pub use embedding::{
    DenseEmbedder, EmbeddedChunks, Embedder, Embedding, EmbeddingReport, FittedTfIdf,
    ModelHandle, QueryEmbedder, SentenceEncoder, SparseEmbedding, TfIdfEmbedder,
    TokenFrequencyEmbedder,
};
pub use error::{Result, RetrievalError};
pub use index::{SearchHit, SearchOutcome, SimilarityIndex, build_index, retrieve_top_k};
pub use retriever::{
    PreparedDocument, QuestionOutcome, RetrievalReport, RetrievedContext, Retriever,
};
