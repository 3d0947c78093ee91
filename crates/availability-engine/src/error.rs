//! Error types for availability-engine operations.

use thiserror::Error;

use crate::model::BlockId;

/// Failures raised by a persistence backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// The backend could not be reached or refused the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a row that no longer exists.
    #[error("Block {0} does not exist")]
    MissingRow(BlockId),

    /// The backend rejected the row (constraint violation, bad payload).
    #[error("Rejected write: {0}")]
    Rejected(String),
}

/// Errors surfaced by the public service operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or logically inconsistent input. Nothing was persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The targeted block does not exist.
    #[error("Availability block {0} not found")]
    NotFound(BlockId),

    /// A recurring batch persisted zero occurrences.
    #[error("Failed to create any of {planned} planned occurrences: {}", .failures.join("; "))]
    Generation { planned: u32, failures: Vec<String> },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Event delivery failed. Logged by the service, never returned to callers.
    #[error("Event publish error: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
