//! Error types for the `kb-rag` crate.

use thiserror::Error;

/// Errors that can occur in knowledge-base retrieval operations.
#[derive(Debug, Error)]
pub enum KbError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector search backend.
    #[error("Search backend error ({backend}): {message}")]
    SearchBackend {
        /// The search backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector field name that the index does not carry.
    #[error("Invalid vector name: {0}")]
    UnknownVectorField(String),

    /// A search mode other than `vector`, `hybrid` or `semantic_hybrid`.
    #[error("Unsupported search mode: {0} (expected one of vector, hybrid, semantic_hybrid)")]
    UnsupportedSearchMode(String),

    /// A document field outside the knowledge-base schema.
    #[error("Unknown document field: {0}")]
    UnknownField(String),

    /// An error occurred in the document database.
    #[error("Document store error ({backend}): {message}")]
    DocumentStore {
        /// The database backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in blob storage.
    #[error("Blob store error ({backend}): {message}")]
    BlobStore {
        /// The blob backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The tokenizer failed to encode or decode.
    #[error("Tokenizer error ({model}): {message}")]
    Tokenizer {
        /// The model whose tokenizer failed.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// The completion backend failed.
    #[error("Completion error ({provider}): {message}")]
    Completion {
        /// The completion provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The image analysis / image embedding backend failed.
    #[error("Vision error ({provider}): {message}")]
    Vision {
        /// The vision provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error in retrieval or answer orchestration.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// A convenience result type for knowledge-base operations.
pub type Result<T> = std::result::Result<T, KbError>;
