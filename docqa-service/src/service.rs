//! Question-answering service.
//!
//! [`QaService`] runs one request end to end: load the document, prepare it
//! for retrieval, then retrieve context and generate an answer for each
//! question in order.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_service::{QaRequest, QaService, ServiceConfig, SourceLoader};
//!
//! let config = ServiceConfig::from_env()?;
//! let service = QaService::builder()
//!     .loader(Arc::new(SourceLoader::from_config(&config)?))
//!     .generator(Arc::new(GeminiAnswerGenerator::new(config.generator.clone())?))
//!     .config(config)
//!     .build()?;
//!
//! let response = service.answer(QaRequest::new(url, questions)).await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use docqa_retrieval::{EmbedderKind, QuestionOutcome, RetrievalError, Retriever};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::generator::AnswerGenerator;
use crate::loader::DocumentLoader;

/// Prefix of the placeholder answer for a question that failed.
pub const UNANSWERED_PREFIX: &str = "Unable to answer: ";

/// A document and the questions to answer about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaRequest {
    /// Document URL or local path.
    pub documents: String,
    /// Questions, answered in order.
    pub questions: Vec<String>,
}

impl QaRequest {
    /// Create a request.
    pub fn new(documents: impl Into<String>, questions: Vec<String>) -> Self {
        Self { documents: documents.into(), questions }
    }
}

/// Answers aligned with the request's questions, plus processing details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResponse {
    /// One answer per question, in request order.
    pub answers: Vec<String>,
    /// How the request was processed.
    pub metadata: ResponseMetadata,
}

/// Processing details for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Wall-clock time spent on the request.
    pub processing_time_ms: u64,
    /// Chunks indexed after validation.
    pub chunk_count: usize,
    /// Chunks dropped by validation.
    pub dropped_chunks: usize,
    /// Embedding variant actually used.
    pub embedding_variant: EmbedderKind,
    /// Whether the configured variant was unavailable.
    pub degraded_embedding: bool,
    /// Questions whose ranking fell back to document order.
    pub search_fallbacks: usize,
    /// Questions answered with a placeholder.
    pub failed_questions: usize,
}

/// Runs document question answering.
///
/// Construct one via [`QaService::builder()`]. A service is immutable and
/// can serve concurrent requests; nothing from one request outlives it.
pub struct QaService {
    loader: Arc<dyn DocumentLoader>,
    generator: Arc<dyn AnswerGenerator>,
    retriever: Retriever,
    max_questions: usize,
}

impl QaService {
    /// Create a new [`QaServiceBuilder`].
    pub fn builder() -> QaServiceBuilder {
        QaServiceBuilder::default()
    }

    /// The retriever in use.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer every question in `request`.
    ///
    /// A question whose retrieval or generation fails is answered with a
    /// placeholder starting with [`UNANSWERED_PREFIX`]; the others proceed.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Config`] if there are no questions
    /// - [`ServiceError::TooManyQuestions`] if there are more than allowed
    /// - [`ServiceError::DocumentLoad`] if the document cannot be loaded
    /// - [`ServiceError::NoContent`] if the document has no usable chunks
    pub async fn answer(&self, request: QaRequest) -> Result<QaResponse> {
        let started = Instant::now();
        self.check_questions(&request.questions)?;

        let text = self.loader.load(&request.documents).await.map_err(|e| {
            warn!(source = %request.documents, error = %e, "failed to load document");
            ServiceError::from(e)
        })?;

        // Chunking, embedding and query encoding are CPU-bound and may load
        // the dense model.
        let retriever = self.retriever.clone();
        let questions = request.questions.clone();
        let (report, outcomes) = tokio::task::spawn_blocking(move || {
            let document = retriever.prepare(&text)?;
            let outcomes = document.retrieve_all(&questions);
            Ok::<_, RetrievalError>((document.report().clone(), outcomes))
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))?
        .map_err(|e| match e {
            RetrievalError::EmptyDocument => ServiceError::NoContent,
            other => ServiceError::Retrieval(other),
        })?;

        let search_fallbacks = outcomes.iter().filter(|o| o.search_degraded()).count();

        let mut answers = Vec::with_capacity(request.questions.len());
        let mut failed_questions = 0;
        for (i, (question, outcome)) in request.questions.iter().zip(outcomes).enumerate() {
            let answer = match outcome {
                QuestionOutcome::Retrieved(retrieved) => {
                    self.generator.generate(question, &retrieved.context).await.map_err(|e| {
                        warn!(question = i, error = %e, "answer generation failed");
                        e.to_string()
                    })
                }
                QuestionOutcome::Failed { reason } => Err(reason),
            };
            answers.push(answer.unwrap_or_else(|reason| {
                failed_questions += 1;
                format!("{UNANSWERED_PREFIX}{reason}")
            }));
        }

        let metadata = ResponseMetadata {
            processing_time_ms: started.elapsed().as_millis() as u64,
            chunk_count: report.chunk_count,
            dropped_chunks: report.dropped_chunks.len(),
            embedding_variant: report.embedding.effective,
            degraded_embedding: report.embedding.degraded(),
            search_fallbacks,
            failed_questions,
        };
        info!(
            questions = answers.len(),
            failed_questions,
            processing_time_ms = metadata.processing_time_ms,
            "answered request"
        );

        Ok(QaResponse { answers, metadata })
    }

    fn check_questions(&self, questions: &[String]) -> Result<()> {
        if questions.is_empty() {
            return Err(ServiceError::Config("at least one question is required".to_string()));
        }
        if questions.len() > self.max_questions {
            return Err(ServiceError::TooManyQuestions {
                max: self.max_questions,
                got: questions.len(),
            });
        }
        Ok(())
    }
}

/// Builder for constructing a [`QaService`].
///
/// `loader` and `generator` are required. Without an explicit `retriever`
/// one is built from `config.retrieval` with no dense encoder.
#[derive(Default)]
pub struct QaServiceBuilder {
    loader: Option<Arc<dyn DocumentLoader>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    retriever: Option<Retriever>,
    config: Option<ServiceConfig>,
}

impl QaServiceBuilder {
    /// Set the document loader.
    pub fn loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the retriever, for example one sharing a dense model handle.
    pub fn retriever(mut self, retriever: Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Set the service configuration.
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the [`QaService`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if a required field is missing or
    /// the configuration is invalid.
    pub fn build(self) -> Result<QaService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let loader =
            self.loader.ok_or_else(|| ServiceError::Config("loader is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| ServiceError::Config("generator is required".to_string()))?;
        let retriever = match self.retriever {
            Some(retriever) => retriever,
            None => Retriever::new(config.retrieval.clone())?,
        };

        Ok(QaService { loader, generator, retriever, max_questions: config.max_questions })
    }
}
