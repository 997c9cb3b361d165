//! Error types for coreflink.

use thiserror::Error;

/// Result type for coreflink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for coreflink operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A cached artifact required by the selected mode does not exist.
    #[error("No cached {artifact} for document '{doc_id}'")]
    NotFound {
        /// Document whose artifact is missing.
        doc_id: String,
        /// Which artifact was requested (raw scores, linkage, span order).
        artifact: &'static str,
    },

    /// Input violates a structural constraint (span bounds, score width, doc id).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An internal invariant was broken.
    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of a cached artifact failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse error in bracket text or a scored-triad record.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration or argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The document source kept returning the empty sentinel.
    #[error("Document source produced no data after {0} consecutive fetches")]
    SourceStalled(usize),
}

impl Error {
    /// Create a cache-miss error.
    pub fn not_found(doc_id: impl Into<String>, artifact: &'static str) -> Self {
        Error::NotFound {
            doc_id: doc_id.into(),
            artifact,
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Whether this error only invalidates the current document.
    ///
    /// Everything else (IO, serialization, broken invariants) invalidates the
    /// whole batch: a partially written result set is worse than none.
    #[must_use]
    pub fn is_document_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::Validation(_) | Error::Parse(_)
        )
    }
}
