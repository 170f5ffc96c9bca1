//! Error types for the `docqa-retrieval` crate.

use thiserror::Error;

/// Errors that can occur while preparing or querying a document.
///
/// Most data-dependent failures inside the pipeline degrade instead of
/// surfacing here; see [`EmbeddingReport`](crate::EmbeddingReport) and
/// [`SearchOutcome`](crate::SearchOutcome).
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An embedding variant could not produce a representation.
    #[error("Embedding error ({variant}): {message}")]
    Embedding {
        /// The embedding variant that produced the error.
        variant: String,
        /// A description of the failure.
        message: String,
    },

    /// The similarity index could not be built or searched.
    #[error("Index error: {0}")]
    Index(String),

    /// The document produced no usable chunks.
    #[error("Document has no content to retrieve from")]
    EmptyDocument,

    /// The dense encoder model could not be loaded.
    #[error("Model load error: {0}")]
    ModelLoad(String),
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
