//! # docqa-service
//!
//! Document question answering on top of [`docqa_retrieval`].
//!
//! - [`DocumentLoader`] — fetch a document over HTTP(S) or from disk and
//!   extract its text (PDF, DOCX, text, JSON, email)
//! - [`AnswerGenerator`] — answer a question from retrieved context, with a
//!   Gemini implementation that retries transient failures
//! - [`QaService`] — load → prepare → retrieve → generate for a whole request
//!
//! The `docqa` binary wraps [`QaService`] for the command line.

pub mod config;
pub mod error;
pub mod extract;
pub mod generator;
pub mod loader;
pub mod retry;
pub mod service;

pub use config::{GeneratorConfig, ServiceConfig, parse_embedder};
pub use error::{LoadError, Result, ServiceError};
pub use extract::{DocumentFormat, extract_text};
pub use generator::{
    APOLOGY, AnswerGenerator, ContextEchoGenerator, GeminiAnswerGenerator, build_prompt,
};
pub use loader::{DocumentLoader, FileDocumentLoader, HttpDocumentLoader, SourceLoader};
pub use retry::RetryPolicy;
pub use service::{
    QaRequest, QaResponse, QaService, QaServiceBuilder, ResponseMetadata, UNANSWERED_PREFIX,
};
