//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend read/write failure, or a plugin veto of a write or delete
    #[error("Storage error: {0}")]
    Storage(String),

    /// Value or entry could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid construction options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A user-supplied factory failed to produce a value
    #[error("Factory error: {0}")]
    Factory(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
