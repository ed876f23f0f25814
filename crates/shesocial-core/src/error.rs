//! Error types for shesocial-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::sync::RemoteError;

/// Result type alias using shesocial-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shesocial-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document or queue item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller is not allowed to perform the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote API failure surfaced outside of a sync cycle
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid runtime configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether this error originates in the local persistence layer.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LibSql(_) | Self::Io(_))
    }
}
