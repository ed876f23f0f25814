//! Background sync service tying the store, engines and connectivity together.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pull::{PullEngine, PullOutcome};
use super::push::{CycleOutcome, PushEngine, SkipReason};
use super::remote::RemoteApi;
use super::status::{NetworkQuality, NetworkState, SyncMetrics, SyncStatus};
use crate::config::SyncSettings;
use crate::error::Result;
use crate::models::Collection;
use crate::services::LocalStore;

const HOUR_MS: i64 = 60 * 60 * 1_000;

/// Result of a full push + pull pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub push: CycleOutcome,
    /// Empty when the push could not start
    pub pulls: Vec<(Collection, PullOutcome)>,
}

pub struct SyncService<R> {
    store: LocalStore,
    remote: Arc<R>,
    network: NetworkState,
    metrics: Arc<SyncMetrics>,
    push: PushEngine<R>,
    pull: PullEngine<R>,
    settings: SyncSettings,
}

impl<R: RemoteApi + 'static> SyncService<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, network: NetworkState, settings: SyncSettings) -> Self {
        let metrics = Arc::new(SyncMetrics::default());
        let push = PushEngine::new(store.clone(), remote.clone(), network.clone(), metrics.clone())
            .with_batch_size(settings.batch_size);
        let pull = PullEngine::new(
            store.clone(),
            remote.clone(),
            settings.readable_collections.clone(),
        );
        Self {
            store,
            remote,
            network,
            metrics,
            push,
            pull,
            settings,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn network(&self) -> &NetworkState {
        &self.network
    }

    pub fn set_online(&self, online: bool) {
        if self.network.set_online(online) {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn set_readable_collections(&self, collections: BTreeSet<Collection>) {
        self.pull.set_readable(collections);
    }

    /// Push pending mutations without pulling.
    pub async fn push_now(&self) -> Result<CycleOutcome> {
        self.push.run_cycle().await
    }

    /// Push, then pull every readable collection.
    pub async fn force_sync_now(&self) -> Result<SyncReport> {
        let push = self.push.run_cycle().await?;
        let pulls = match push {
            CycleOutcome::NotStarted(SkipReason::Offline | SkipReason::Unauthenticated) => {
                Vec::new()
            }
            CycleOutcome::NotStarted(SkipReason::AlreadyRunning) | CycleOutcome::Completed(_) => {
                self.pull.pull_all().await?
            }
        };
        Ok(SyncReport { push, pulls })
    }

    /// Pull a single collection now.
    pub async fn sync_collection(&self, collection: Collection) -> Result<PullOutcome> {
        self.pull.pull_collection(collection).await
    }

    /// Measure round-trip time to the API and record the quality.
    ///
    /// Only informs the status snapshot; connectivity is driven by `set_online`.
    pub async fn probe_network(&self) -> NetworkQuality {
        let started = Instant::now();
        let quality = match self.remote.probe().await {
            Ok(()) => NetworkQuality::from_latency(
                started.elapsed(),
                self.settings.slow_network_threshold,
            ),
            Err(error) => {
                tracing::debug!(%error, "Network probe failed");
                NetworkQuality::Unknown
            }
        };
        self.network.set_quality(quality);
        quality
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let since = self.store.now() - HOUR_MS;
        Ok(SyncStatus {
            online: self.network.is_online(),
            network_quality: self.network.quality(),
            is_syncing: self.push.is_running(),
            pending: self.store.pending_count().await?,
            errors_last_hour: self.store.errors_since(since).await?,
            failed_operations: self.store.failed_count().await?,
            metrics: self.metrics.snapshot(),
        })
    }

    /// Spawn the background loop: a full pass on every timer tick while
    /// online and on reconnect, and a push whenever the store requests one.
    pub fn start(self: Arc<Self>) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let service = self;

        let task = tokio::spawn(async move {
            let mut online = service.network.subscribe();
            let mut ticker = tokio::time::interval(service.settings.sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = service.settings.sync_interval.as_secs(),
                "Sync service started"
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if service.network.is_online() {
                            service.run_pass("timer").await;
                        }
                    }
                    () = service.store.trigger().requested() => {
                        if service.network.is_online() {
                            if let Err(error) = service.push.run_cycle().await {
                                tracing::error!(%error, "Triggered push failed");
                            }
                        }
                    }
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let is_online = *online.borrow_and_update();
                        if is_online {
                            ticker.reset();
                            service.probe_network().await;
                            service.run_pass("reconnect").await;
                        } else {
                            tracing::info!("Offline, pausing sync");
                        }
                    }
                }
            }
            tracing::info!("Sync service stopped");
        });

        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run_pass(&self, reason: &'static str) {
        match self.force_sync_now().await {
            Ok(report) => tracing::debug!(reason, ?report, "Sync pass finished"),
            Err(error) => tracing::error!(reason, %error, "Sync pass failed"),
        }
    }
}

/// Owns the background task started by `SyncService::start`
pub struct SyncHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop and wait for the in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Sync task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Fields, Priority, PullResponse};
    use crate::sync::push::CycleReport;
    use crate::sync::testing::FakeRemote;
    use crate::sync::RemoteError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    async fn setup(online: bool) -> (Arc<SyncService<FakeRemote>>, Arc<FakeRemote>) {
        let store = LocalStore::open_in_memory(Arc::new(ManualClock::new(T0)))
            .await
            .unwrap();
        let remote = Arc::new(FakeRemote::new());
        let service = SyncService::new(
            store,
            remote.clone(),
            NetworkState::new(online),
            SyncSettings::new("http://localhost:8080"),
        );
        (Arc::new(service), remote)
    }

    async fn wait_until_drained(service: &SyncService<FakeRemote>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.store().pending_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_force_sync_offline_does_nothing() {
        let (service, remote) = setup(false).await;
        let report = service.force_sync_now().await.unwrap();
        assert_eq!(report.push, CycleOutcome::NotStarted(SkipReason::Offline));
        assert!(report.pulls.is_empty());
        assert!(remote.pulls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_force_sync_pushes_then_pulls() {
        let (service, remote) = setup(true).await;
        service
            .store()
            .create(Collection::Events, Fields::new(), Priority::Medium)
            .await
            .unwrap();
        remote.set_pull_response(
            Collection::Users,
            PullResponse {
                changes: Vec::new(),
                timestamp: 42,
                conflicts: Vec::new(),
            },
        );

        let report = service.force_sync_now().await.unwrap();
        assert!(matches!(
            report.push,
            CycleOutcome::Completed(CycleReport { succeeded: 1, .. })
        ));
        assert_eq!(report.pulls.len(), 3);
        assert_eq!(
            service.store().checkpoint(Collection::Users).await.unwrap(),
            Some(42)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_snapshot() {
        let (service, remote) = setup(true).await;
        service
            .store()
            .create(Collection::Events, Fields::new(), Priority::Low)
            .await
            .unwrap();
        service
            .store()
            .create(Collection::Events, Fields::new(), Priority::High)
            .await
            .unwrap();
        remote.fail_next_write(RemoteError::Status {
            status: 400,
            message: "bad payload".into(),
        });
        remote.fail_next_write(RemoteError::Network("reset".into()));
        service.push_now().await.unwrap();

        let status = service.status().await.unwrap();
        assert!(status.online);
        assert!(!status.is_syncing);
        assert_eq!(status.pending, 1);
        assert_eq!(status.failed_operations, 1);
        assert_eq!(status.errors_last_hour, 2);
        assert_eq!(status.metrics.failures, 2);
        assert!((status.metrics.error_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_probe_sets_quality() {
        let (service, remote) = setup(true).await;
        assert_eq!(service.probe_network().await, NetworkQuality::Good);
        assert_eq!(service.network().quality(), NetworkQuality::Good);

        remote.fail_probe(Some(RemoteError::Network("unreachable".into())));
        assert_eq!(service.probe_network().await, NetworkQuality::Unknown);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_collection_respects_readable_set() {
        let (service, remote) = setup(true).await;
        service.set_readable_collections(BTreeSet::from([Collection::Events]));
        assert_eq!(
            service.sync_collection(Collection::Users).await.unwrap(),
            PullOutcome::Skipped
        );
        assert!(remote.pulls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_insert_is_pushed_after_reconnect() {
        let (service, remote) = setup(false).await;
        let handle = service.clone().start();

        let booking = service
            .store()
            .create(
                Collection::Bookings,
                json!({"eventId": "e1", "userId": "u1"}).as_object().cloned().unwrap(),
                Priority::High,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.created().is_empty());
        assert_eq!(service.store().pending_count().await.unwrap(), 1);

        service.set_online(true);
        wait_until_drained(&service).await;
        handle.shutdown().await;

        let created = remote.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, Collection::Bookings);
        assert_eq!(created[0].1.id, booking.id);

        let synced = service
            .store()
            .get(Collection::Bookings, &booking.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.last_sync, Some(T0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_while_online_triggers_push() {
        let (service, remote) = setup(true).await;
        let handle = service.clone().start();

        service
            .store()
            .create(Collection::Events, Fields::new(), Priority::High)
            .await
            .unwrap();
        wait_until_drained(&service).await;
        handle.shutdown().await;

        assert_eq!(remote.created().len(), 1);
    }
}
