//! Error types for docflow.

use thiserror::Error;

/// Result type alias using docflow's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// A payload or transition registration broke the job contract.
    ///
    /// These are programming errors: they are never retried and never
    /// recorded as a job-level failure.
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Job execution error
    #[error("Job error: {0}")]
    Job(String),

    /// The job execution service refused a submission
    #[error("Submit error: {0}")]
    Submit(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for contract violations: surface immediately, never retry.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
