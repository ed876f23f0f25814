//! Offline sync engine: queue policy, push and pull engines, conflict
//! handling, and the background service that drives them.

mod http;
mod merge;
mod pull;
mod push;
mod queue;
mod remote;
mod resolver;
mod service;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use http::{HttpRemoteApi, Session};
pub use merge::{merge_documents, MergeShape, MERGE_WINDOW_MS};
pub use pull::{PullEngine, PullOutcome};
pub use push::{CycleOutcome, CycleReport, PushEngine, SkipReason};
pub use queue::{
    apply_outcome, backoff_delay_ms, is_eligible, select_batch, FailureKind, Outcome,
    QueueTransition, RemovalReason,
};
pub use remote::{with_session_retry, RemoteApi, RemoteError};
pub use resolver::{ConflictResolver, ResolutionOutcome};
pub use service::{SyncHandle, SyncReport, SyncService};
pub use status::{
    error_rate, NetworkQuality, NetworkState, SyncMetrics, SyncMetricsSnapshot, SyncStatus,
};
