//! Error types for the `docqa-service` crate.

use docqa_retrieval::RetrievalError;
use thiserror::Error;

use crate::extract::DocumentFormat;

/// Errors raised while fetching a document or extracting its text.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source is not a supported URL or path.
    #[error("Invalid document source: {0}")]
    InvalidUrl(String),

    /// The download failed or the server returned an error status.
    #[error("Download failed: {0}")]
    Http(String),

    /// The document exceeds the configured size limit.
    #[error("Document too large: {size} bytes (max {max})")]
    TooLarge {
        /// Reported or actual size in bytes.
        size: u64,
        /// Configured limit in bytes.
        max: u64,
    },

    /// The document could not be parsed as its detected format.
    #[error("Failed to parse {format} document: {message}")]
    Corrupt {
        /// The detected format.
        format: DocumentFormat,
        /// A description of the failure.
        message: String,
    },

    /// Extraction produced no text.
    #[error("No text content extracted from document")]
    Empty,

    /// A local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while answering a request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The document could not be loaded.
    #[error("Document load error: {0}")]
    DocumentLoad(#[from] LoadError),

    /// The document has no content to answer from.
    #[error("Document has no usable content")]
    NoContent,

    /// The answer generator failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// A configuration or request validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error propagated from the retrieval pipeline.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// A blocking retrieval task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),

    /// The request carries more questions than allowed.
    #[error("Too many questions: {got} (max {max})")]
    TooManyQuestions {
        /// Configured limit.
        max: usize,
        /// Number of questions received.
        got: usize,
    },
}

/// A convenience result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
