//! Connectivity state, push counters and the status snapshot shown to the UI.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Good,
    Slow,
    Unknown,
}

impl NetworkQuality {
    /// Classify a successful probe by its round-trip time.
    pub fn from_latency(latency: Duration, slow_threshold: Duration) -> Self {
        if latency > slow_threshold {
            Self::Slow
        } else {
            Self::Good
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Good => 0,
            Self::Slow => 1,
            Self::Unknown => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Good,
            1 => Self::Slow,
            _ => Self::Unknown,
        }
    }
}

/// Shared online flag plus the last measured network quality.
///
/// Clones observe the same state; `subscribe` yields a receiver that wakes
/// on every online/offline transition.
#[derive(Debug, Clone)]
pub struct NetworkState {
    online: Arc<watch::Sender<bool>>,
    quality: Arc<AtomicU8>,
}

impl NetworkState {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            online: Arc::new(sender),
            quality: Arc::new(AtomicU8::new(NetworkQuality::Unknown.to_u8())),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Returns whether the value changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn quality(&self) -> NetworkQuality {
        NetworkQuality::from_u8(self.quality.load(Ordering::Relaxed))
    }

    pub fn set_quality(&self, quality: NetworkQuality) {
        self.quality.store(quality.to_u8(), Ordering::Relaxed);
    }
}

/// Counters of pushed queue items
#[derive(Debug, Default)]
pub struct SyncMetrics {
    successes: AtomicU64,
    failures: AtomicU64,
    last_success_at: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub last_success_at: Option<i64>,
    pub error_rate: f64,
}

impl SyncMetrics {
    pub fn record_success(&self, now: i64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.last_success_at.store(now, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let last_success_at = self.last_success_at.load(Ordering::Relaxed);
        SyncMetricsSnapshot {
            successes,
            failures,
            last_success_at: (last_success_at > 0).then_some(last_success_at),
            error_rate: error_rate(failures, successes),
        }
    }
}

/// Share of failed attempts; 0 when nothing was attempted.
#[allow(clippy::cast_precision_loss)]
pub fn error_rate(failures: u64, successes: u64) -> f64 {
    let total = failures.saturating_add(successes);
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64
    }
}

/// Point-in-time view of the sync engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub network_quality: NetworkQuality,
    pub is_syncing: bool,
    pub pending: u64,
    pub errors_last_hour: u64,
    /// Abandoned high-priority mutations awaiting review
    pub failed_operations: u64,
    pub metrics: SyncMetricsSnapshot,
}
