//! Retrieval orchestrator.
//!
//! A [`Retriever`] is built once per process from a [`RetrievalConfig`].
//! [`Retriever::prepare`] runs the per-document work (chunk → validate →
//! embed → index) and returns a [`PreparedDocument`] that answers any number
//! of questions about that document:
//!
//! ```rust,ignore
//! use docqa_retrieval::{Retriever, RetrievalConfig};
//!
//! let retriever = Retriever::new(RetrievalConfig::default())?;
//! let document = retriever.prepare(&text)?;
//! for outcome in document.retrieve_all(&questions) {
//!     println!("{}", outcome.context().unwrap_or_default());
//! }
//! ```
//!
//! Nothing in a [`PreparedDocument`] is shared with other documents; drop it
//! when the request ends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunking::{ChunkStrategy, TextChunker, validate_chunks};
use crate::config::RetrievalConfig;
use crate::embedding::{Embedder, EmbeddingReport, ModelHandle, QueryEmbedder};
use crate::error::{Result, RetrievalError};
use crate::index::{SearchOutcome, SimilarityIndex};

/// Runs the retrieval pipeline with one fixed configuration.
#[derive(Debug, Clone)]
pub struct Retriever {
    config: RetrievalConfig,
    chunker: TextChunker,
    embedder: Embedder,
}

impl Retriever {
    /// Create a retriever with no dense encoder.
    ///
    /// A configuration asking for [`EmbedderKind::Dense`](crate::EmbedderKind)
    /// then degrades to token frequency on every document.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if `config` is invalid.
    pub fn new(config: RetrievalConfig) -> Result<Self> {
        Self::with_model(config, Arc::new(ModelHandle::unavailable()))
    }

    /// Create a retriever sharing the process-wide `model` handle.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if `config` is invalid.
    pub fn with_model(config: RetrievalConfig, model: Arc<ModelHandle>) -> Result<Self> {
        config.validate()?;
        let chunker = TextChunker::new(config.chunk_size, config.chunk_overlap)?;
        let embedder = Embedder::from_config(&config, model);
        Ok(Self { config, chunker, embedder })
    }

    /// The configuration in use.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Chunk, validate, embed and index one document.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::EmptyDocument`] if no chunk survives
    /// validation, or [`RetrievalError::Index`] if the index cannot be built.
    pub fn prepare(&self, text: &str) -> Result<PreparedDocument> {
        let (raw, strategy) = self.chunker.chunk_with_strategy(text);
        let validated = validate_chunks(raw, self.config.min_chunk_chars);
        if validated.chunks.is_empty() {
            warn!(dropped = validated.dropped.len(), "document produced no usable chunks");
            return Err(RetrievalError::EmptyDocument);
        }

        let embedded = self.embedder.embed_chunks(&validated.chunks);
        if embedded.report.degraded() {
            warn!(
                requested = ?embedded.report.requested,
                effective = ?embedded.report.effective,
                "embedding degraded for this document"
            );
        }
        let index = SimilarityIndex::build(embedded.embeddings, self.config.index)?;

        let report = RetrievalReport {
            strategy,
            chunk_count: validated.chunks.len(),
            dropped_chunks: validated.dropped,
            embedding: embedded.report,
        };
        info!(
            chunk_count = report.chunk_count,
            dropped = report.dropped_chunks.len(),
            strategy = ?report.strategy,
            "prepared document"
        );

        Ok(PreparedDocument {
            chunks: validated.chunks,
            index,
            query_embedder: embedded.query_embedder,
            top_k: self.config.top_k,
            report,
        })
    }
}

/// What happened while preparing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalReport {
    /// How the text was split.
    pub strategy: ChunkStrategy,
    /// Number of chunks kept after validation.
    pub chunk_count: usize,
    /// Pre-validation positions of the chunks that were dropped.
    pub dropped_chunks: Vec<usize>,
    /// Embedding variant actually used, and any degraded chunks.
    pub embedding: EmbeddingReport,
}

/// A document ready to answer questions.
#[derive(Debug)]
pub struct PreparedDocument {
    chunks: Vec<String>,
    index: SimilarityIndex,
    query_embedder: QueryEmbedder,
    top_k: usize,
    report: RetrievalReport,
}

impl PreparedDocument {
    /// The validated chunks, in document order.
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// The similarity index over [`chunks`](Self::chunks).
    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Preparation details.
    pub fn report(&self) -> &RetrievalReport {
        &self.report
    }

    /// Rank the chunks for `question` and join the best `top_k` into a
    /// context string.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Embedding`] if the question cannot be
    /// embedded. Scoring problems never fail; they are reported through
    /// [`RetrievedContext::search_degraded`].
    pub fn retrieve(&self, question: &str) -> Result<RetrievedContext> {
        let query = self.query_embedder.embed_query(question)?;
        let SearchOutcome { hits, failed_positions, degraded } =
            self.index.search(&query, self.top_k);
        if !failed_positions.is_empty() {
            warn!(failed = failed_positions.len(), "some chunks could not be scored");
        }

        let positions: Vec<usize> = hits.iter().map(|hit| hit.position).collect();
        let chunks: Vec<String> =
            positions.iter().filter_map(|&p| self.chunks.get(p).cloned()).collect();
        let context = chunks.join(" ");

        Ok(RetrievedContext { chunks, positions, context, search_degraded: degraded })
    }

    /// Retrieve context for every question, in order.
    ///
    /// A question that fails yields [`QuestionOutcome::Failed`] and the
    /// remaining questions still run.
    pub fn retrieve_all<S: AsRef<str>>(&self, questions: &[S]) -> Vec<QuestionOutcome> {
        questions
            .iter()
            .enumerate()
            .map(|(i, question)| match self.retrieve(question.as_ref()) {
                Ok(context) => QuestionOutcome::Retrieved(context),
                Err(e) => {
                    warn!(question = i, error = %e, "retrieval failed for question");
                    QuestionOutcome::Failed { reason: e.to_string() }
                }
            })
            .collect()
    }
}

/// The context retrieved for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// Retrieved chunks, best first.
    pub chunks: Vec<String>,
    /// Chunk positions, aligned with `chunks`.
    pub positions: Vec<usize>,
    /// `chunks` joined with single spaces.
    pub context: String,
    /// True when ranking failed and leading chunks were used instead.
    pub search_degraded: bool,
}

/// Per-question result of [`PreparedDocument::retrieve_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuestionOutcome {
    /// Context was retrieved.
    Retrieved(RetrievedContext),
    /// Retrieval failed for this question only.
    Failed {
        /// Why retrieval failed.
        reason: String,
    },
}

impl QuestionOutcome {
    /// The joined context, if retrieval succeeded.
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Retrieved(retrieved) => Some(&retrieved.context),
            Self::Failed { .. } => None,
        }
    }

    /// Whether this question failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether ranking fell back to document order.
    pub fn search_degraded(&self) -> bool {
        matches!(self, Self::Retrieved(r) if r.search_degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedderKind, IndexKind};
    use crate::embedding::SentenceEncoder;

    const POLICY: &str = "The grace period for premium payment is thirty days. \
        Pre-existing diseases are covered after a waiting period of thirty six months. \
        Maternity expenses are covered after the policy has been active for two years. \
        Cataract surgery has a waiting period of two years.";

    fn retriever(embedder: EmbedderKind) -> Retriever {
        let config = RetrievalConfig::builder()
            .chunk_size(12)
            .chunk_overlap(2)
            .top_k(1)
            .embedder(embedder)
            .build()
            .unwrap();
        Retriever::new(config).unwrap()
    }

    struct BrokenEncoder;

    impl SentenceEncoder for BrokenEncoder {
        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RetrievalError::Embedding { variant: "test".into(), message: "offline".into() })
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let config = RetrievalConfig { top_k: 0, ..RetrievalConfig::default() };
        assert!(matches!(Retriever::new(config), Err(RetrievalError::Config(_))));
    }

    #[test]
    fn empty_document_has_no_content() {
        let err = retriever(EmbedderKind::TfIdf).prepare("   ").unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyDocument));
    }

    #[test]
    fn document_of_only_short_chunks_has_no_content() {
        let err = retriever(EmbedderKind::TfIdf).prepare("Hi. Yo.").unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyDocument));
    }

    #[test]
    fn retrieves_relevant_chunk_for_each_variant() {
        for kind in [EmbedderKind::TokenFrequency, EmbedderKind::TfIdf] {
            let document = retriever(kind).prepare(POLICY).unwrap();
            let context = document.retrieve("What is the grace period for premium payment?").unwrap();
            assert!(context.context.contains("grace period"), "{kind:?}: {}", context.context);
            assert!(!context.search_degraded);
        }
    }

    #[test]
    fn exact_l2_agrees_with_cosine_on_tfidf_rows() {
        let cosine = retriever(EmbedderKind::TfIdf).prepare(POLICY).unwrap();
        let config = RetrievalConfig::builder()
            .chunk_size(12)
            .chunk_overlap(2)
            .top_k(2)
            .index(IndexKind::ExactL2)
            .build()
            .unwrap();
        let exact = Retriever::new(config).unwrap().prepare(POLICY).unwrap();

        let question = "Is cataract surgery covered?";
        let best = cosine.retrieve(question).unwrap().positions[0];
        assert_eq!(exact.retrieve(question).unwrap().positions[0], best);
    }

    #[test]
    fn dense_without_model_is_reported_as_degraded() {
        let document = retriever(EmbedderKind::Dense).prepare(POLICY).unwrap();
        assert!(document.report().embedding.degraded());
        assert_eq!(document.report().embedding.effective, EmbedderKind::TokenFrequency);
        assert!(document.retrieve("maternity").unwrap().context.contains("Maternity"));
    }

    #[test]
    fn unembeddable_questions_fail_individually() {
        let config = RetrievalConfig::builder()
            .chunk_size(12)
            .chunk_overlap(2)
            .embedder(EmbedderKind::Dense)
            .build()
            .unwrap();
        let handle = Arc::new(ModelHandle::ready(Arc::new(BrokenEncoder)));
        let document = Retriever::with_model(config, handle).unwrap().prepare(POLICY).unwrap();

        // Every chunk failed and got a zero vector, but the document is usable.
        assert_eq!(
            document.report().embedding.failed_chunks.len(),
            document.chunks().len()
        );
        let outcomes = document.retrieve_all(&["grace period", "waiting period"]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(QuestionOutcome::is_failed));
    }

    #[test]
    fn dropped_chunks_are_reported() {
        let config =
            RetrievalConfig::builder().chunk_size(3).chunk_overlap(1).min_chunk_chars(10).build().unwrap();
        let document =
            Retriever::new(config).unwrap().prepare("Ok. The long sentence here. Fine.").unwrap();
        assert_eq!(document.chunks(), &["The long sentence here."]);
        assert_eq!(document.report().dropped_chunks, vec![0, 2]);
    }

    #[test]
    fn context_joins_chunks_in_ranked_order() {
        let config = RetrievalConfig::builder()
            .chunk_size(4)
            .chunk_overlap(2)
            .top_k(2)
            .min_chunk_chars(5)
            .embedder(EmbedderKind::TokenFrequency)
            .build()
            .unwrap();
        let document = Retriever::new(config)
            .unwrap()
            .prepare("Rocks are not alive. Cats are mammals. Mammals are warm.")
            .unwrap();
        let context = document.retrieve("cats mammals").unwrap();
        assert_eq!(context.positions, vec![1, 2]);
        assert_eq!(context.context, "Cats are mammals. Mammals are warm.");
    }
}
