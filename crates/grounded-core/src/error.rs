//! Error taxonomy for grounded.
//!
//! A single [`RagError`] carries an [`ErrorKind`] plus an optional document
//! id. Callers dispatch on the kind; the message and source chain are for
//! humans and logs.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a [`RagError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Blank question, blank chunk text, empty document.
    EmptyInput,
    /// A request parameter outside its allowed range.
    InvalidInput,
    /// Input exceeds a hard safety ceiling.
    SizeLimit,
    /// Text could not be extracted from the uploaded bytes.
    Extraction,
    /// Chunking produced no usable output.
    Chunking,
    /// Embedding provider failed after all retries.
    EmbeddingFailure,
    /// Vector index operation failed.
    VectorStoreFailure,
    /// Generation provider call failed.
    GenerationFailure,
    /// Relational storage failed or returned inconsistent data.
    Storage,
    /// A retry backoff was interrupted by shutdown.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmptyInput => "empty input",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::SizeLimit => "size limit exceeded",
            ErrorKind::Extraction => "extraction failed",
            ErrorKind::Chunking => "chunking failed",
            ErrorKind::EmbeddingFailure => "embedding failed",
            ErrorKind::VectorStoreFailure => "vector store failed",
            ErrorKind::GenerationFailure => "generation failed",
            ErrorKind::Storage => "storage error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Input validation errors are reported immediately and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::EmptyInput | ErrorKind::InvalidInput | ErrorKind::SizeLimit
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one error type produced by the ingestion and query pipelines.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct RagError {
    kind: ErrorKind,
    document_id: Option<String>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl RagError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            document_id: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn empty_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyInput, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn size_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SizeLimit, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extraction, message)
    }

    pub fn chunking(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Chunking, message)
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmbeddingFailure, message)
    }

    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VectorStoreFailure, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GenerationFailure, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Attach the id of the document this error concerns.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `true` for embedding failures, including interrupted retries.
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::EmbeddingFailure | ErrorKind::Cancelled
        )
    }
}
