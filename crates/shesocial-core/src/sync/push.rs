//! Push engine: drains the sync queue against the remote API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::remote::{with_session_retry, RemoteApi, RemoteError};
use super::status::{NetworkState, SyncMetrics};
use super::queue::{FailureKind, QueueTransition};
use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::Result;
use crate::models::{Document, Operation, QueueItem};
use crate::services::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    Unauthenticated,
    AlreadyRunning,
}

/// Counts for one push cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed but kept for another attempt
    pub retried: usize,
    /// Failed and removed from the queue
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    NotStarted(SkipReason),
    Completed(CycleReport),
}

pub struct PushEngine<R> {
    store: LocalStore,
    remote: Arc<R>,
    network: NetworkState,
    metrics: Arc<SyncMetrics>,
    batch_size: usize,
    running: AtomicBool,
}

/// Clears the running flag when the cycle ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: RemoteApi> PushEngine<R> {
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        network: NetworkState,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            remote,
            network,
            metrics,
            batch_size: DEFAULT_BATCH_SIZE,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Push one batch of eligible queue items.
    ///
    /// Only one cycle runs at a time; overlapping calls return
    /// `NotStarted(AlreadyRunning)` immediately. Remote failures become queue
    /// state; only local persistence errors are returned. When eligible items
    /// remain after the batch, another cycle is requested through the trigger.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if !self.network.is_online() {
            return Ok(CycleOutcome::NotStarted(SkipReason::Offline));
        }
        if !self.remote.is_authenticated() {
            return Ok(CycleOutcome::NotStarted(SkipReason::Unauthenticated));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(CycleOutcome::NotStarted(SkipReason::AlreadyRunning));
        }
        let _guard = RunningGuard(&self.running);

        let mut report = CycleReport::default();
        let batch = self.store.select_batch(self.batch_size).await?;

        for selected in batch {
            // an earlier item in this batch may have moved this one to a server id
            let Some(item) = self.store.queue_item(selected.id).await? else {
                continue;
            };
            report.attempted += 1;
            match self.push_item(&item).await {
                Ok(canonical) => {
                    self.store.apply_canonical(&item, canonical).await?;
                    self.metrics.record_success(self.store.now());
                    report.succeeded += 1;
                }
                Err(error) => {
                    self.metrics.record_failure();
                    let kind = error.kind();
                    if kind == FailureKind::Terminal {
                        tracing::warn!(
                            id = item.id,
                            collection = %item.collection,
                            operation = %item.operation,
                            %error,
                            "Server rejected queued mutation"
                        );
                    }
                    let transition = self
                        .store
                        .mark_failed(item, kind, &error.to_string())
                        .await?;
                    match transition {
                        QueueTransition::Retry(_) => report.retried += 1,
                        QueueTransition::Removed(_) => report.dropped += 1,
                    }
                }
            }

            if !self.remote.is_authenticated() {
                tracing::warn!("Session ended during push, stopping cycle");
                return Ok(CycleOutcome::Completed(report));
            }
        }

        if !self.store.select_batch(1).await?.is_empty() {
            tracing::debug!("Eligible items remain, requesting another push cycle");
            self.store.trigger().request();
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retried = report.retried,
                dropped = report.dropped,
                "Push cycle finished"
            );
        }
        Ok(CycleOutcome::Completed(report))
    }

    async fn push_item(&self, item: &QueueItem) -> std::result::Result<Option<Document>, RemoteError> {
        let remote = self.remote.as_ref();
        let collection = item.collection;
        let document = &item.data;
        tracing::debug!(id = item.id, %collection, operation = %item.operation, "Pushing queue item");

        match item.operation {
            Operation::Insert => {
                with_session_retry(remote, || remote.create(collection, document)).await
            }
            Operation::Update => {
                with_session_retry(remote, || remote.replace(collection, document)).await
            }
            Operation::Delete => {
                with_session_retry(remote, || remote.delete(collection, &document.id))
                    .await
                    .map(|()| None)
            }
        }
    }
}
