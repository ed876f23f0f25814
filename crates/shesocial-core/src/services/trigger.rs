//! Wake-up signal from the store to the background push loop.

use std::sync::Arc;

use tokio::sync::Notify;

/// Fire-and-forget request for an out-of-cycle push.
///
/// Requests made while no one is waiting are coalesced into one wake-up.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Resolves once a push has been requested
    pub async fn requested(&self) {
        self.notify.notified().await;
    }
}
