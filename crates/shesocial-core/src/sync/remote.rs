//! Remote API abstraction used by the push and pull engines.

use std::future::Future;

use thiserror::Error;

use super::queue::FailureKind;
use crate::models::{Collection, Document, DocumentId, PullResponse};

/// Status codes that mean the request itself is wrong and must not be retried
const TERMINAL_STATUSES: [u16; 5] = [400, 401, 403, 404, 422];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Remote API error: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response payload: {0}")]
    Decode(String),
    #[error("Not authenticated")]
    NotAuthenticated,
}

impl RemoteError {
    /// Whether the failed request may be replayed later.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Status { status, .. } if TERMINAL_STATUSES.contains(status) => {
                FailureKind::Terminal
            }
            Self::Network(_) | Self::Status { .. } | Self::Decode(_) | Self::NotAuthenticated => {
                FailureKind::Retryable
            }
        }
    }

    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Server endpoints the sync engine talks to.
///
/// Write calls return the server's canonical copy when it sends one back.
pub trait RemoteApi: Send + Sync {
    /// Whether a session token is currently held
    fn is_authenticated(&self) -> bool;

    /// `POST /{collection}`
    fn create(
        &self,
        collection: Collection,
        document: &Document,
    ) -> impl Future<Output = Result<Option<Document>, RemoteError>> + Send;

    /// `PUT /{collection}/{id}`
    fn replace(
        &self,
        collection: Collection,
        document: &Document,
    ) -> impl Future<Output = Result<Option<Document>, RemoteError>> + Send;

    /// `DELETE /{collection}/{id}`
    fn delete(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `GET /{collection}/sync/{since}`
    fn pull(
        &self,
        collection: Collection,
        since: i64,
    ) -> impl Future<Output = Result<PullResponse, RemoteError>> + Send;

    /// Exchange the refresh credential for a new access token
    fn refresh_session(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Drop all credentials; the member has to sign in again
    fn end_session(&self);

    /// Lightweight reachability check
    fn probe(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Run `call`, and on a 401 refresh the session and run it exactly once more.
///
/// A failed refresh or a second 401 ends the session.
pub async fn with_session_retry<R, T, F, Fut>(remote: &R, mut call: F) -> Result<T, RemoteError>
where
    R: RemoteApi,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let error = match call().await {
        Err(error) if error.is_auth_expired() => error,
        other => return other,
    };

    tracing::info!("Access token rejected, refreshing session");
    if let Err(refresh_error) = remote.refresh_session().await {
        tracing::warn!(error = %refresh_error, "Session refresh failed, signing out");
        remote.end_session();
        return Err(error);
    }

    let retried = call().await;
    if matches!(&retried, Err(retry_error) if retry_error.is_auth_expired()) {
        tracing::warn!("Request rejected again after refresh, signing out");
        remote.end_session();
    }
    retried
}
