//! Error types for scanrelay-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A writer panicked while holding the store lock
    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Aggregation bucket key was empty
    #[error("Invalid bucket key: {key:?}")]
    InvalidBucketKey { key: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::Poisoned(err.to_string())
    }
}
