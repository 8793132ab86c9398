//! Error types for the `docqa-rag` crate.

use thiserror::Error;

/// Errors that can occur while building the index or answering a question.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A question was asked before any index was built.
    #[error("No vector index or documents available")]
    NotIndexed,

    /// The embedding service failed.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether a retry may succeed (timeouts, 429, 5xx).
        transient: bool,
    },

    /// The re-ranking service failed.
    #[error("Reranker error ({reranker}): {message}")]
    RerankerError {
        /// The reranker that produced the error.
        reranker: String,
        /// A description of the failure.
        message: String,
        /// Whether a retry may succeed (timeouts, 429, 5xx).
        transient: bool,
    },

    /// The answer generator failed.
    #[error("Generation error ({model}): {message}")]
    GenerationError {
        /// The model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
        /// Whether a retry may succeed (timeouts, 429, 5xx).
        transient: bool,
    },

    /// Document content or derived data is unusable (empty text, count or
    /// dimension mismatch).
    #[error("Data error ({document}): {message}")]
    DataError {
        /// The document the failure belongs to, or `"index"` for index-wide failures.
        document: String,
        /// A description of the failure.
        message: String,
    },

    /// The caller supplied an unusable argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing the index snapshot failed.
    #[error("Snapshot error ({path}): {message}")]
    SnapshotError {
        /// The snapshot path.
        path: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    /// Build a [`RagError::DataError`] for the named document.
    pub fn data(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataError { document: document.into(), message: message.into() }
    }

    /// Whether a bounded retry of the failed call may succeed.
    ///
    /// Only external-service failures can be transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingError { transient, .. }
            | Self::RerankerError { transient, .. }
            | Self::GenerationError { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this error came from an external collaborator.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingError { .. } | Self::RerankerError { .. } | Self::GenerationError { .. }
        )
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
