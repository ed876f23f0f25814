use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shesocial_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Search query cannot be empty")]
    EmptySearchQuery,
    #[error("Document ID cannot be empty")]
    EmptyDocumentId,
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    #[error("Fields must be a JSON object: {0}")]
    InvalidFields(String),
    #[error("Invalid time `{0}`: expected Unix milliseconds or RFC 3339")]
    InvalidTime(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set SHESOCIAL_API_URL (or pass --api-url) and SHESOCIAL_TOKEN (or pass --token)."
    )]
    SyncNotConfigured,
}

impl From<shesocial_core::config::ConfigError> for CliError {
    fn from(error: shesocial_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
