//! Pull engine: applies server deltas per collection.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use super::remote::{with_session_retry, RemoteApi, RemoteError};
use super::resolver::ConflictResolver;
use crate::error::Result;
use crate::models::{Collection, DocumentId};
use crate::services::LocalStore;

/// Result of pulling one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Collection is not readable for the signed-in member
    Skipped,
    Applied {
        changes: usize,
        conflicts: usize,
        checkpoint: i64,
    },
    /// Remote call failed; the checkpoint did not move
    Failed(RemoteError),
}

pub struct PullEngine<R> {
    store: LocalStore,
    remote: Arc<R>,
    resolver: ConflictResolver,
    readable: Arc<RwLock<BTreeSet<Collection>>>,
}

impl<R: RemoteApi> PullEngine<R> {
    pub fn new(store: LocalStore, remote: Arc<R>, readable: BTreeSet<Collection>) -> Self {
        Self {
            resolver: ConflictResolver::new(store.clone()),
            store,
            remote,
            readable: Arc::new(RwLock::new(readable)),
        }
    }

    /// Replace the set of collections this member may read.
    pub fn set_readable(&self, collections: BTreeSet<Collection>) {
        match self.readable.write() {
            Ok(mut readable) => *readable = collections,
            Err(poisoned) => *poisoned.into_inner() = collections,
        }
    }

    pub fn readable(&self) -> BTreeSet<Collection> {
        match self.readable.read() {
            Ok(readable) => readable.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Fetch and apply the delta for `collection` since its checkpoint.
    ///
    /// Changes and conflicts are applied before the checkpoint advances, so a
    /// crash in between only re-applies the same delta. Local persistence
    /// errors are returned; remote failures are reported in the outcome.
    pub async fn pull_collection(&self, collection: Collection) -> Result<PullOutcome> {
        if !self.readable().contains(&collection) {
            tracing::debug!(%collection, "Skipping pull for unreadable collection");
            return Ok(PullOutcome::Skipped);
        }

        let since = self.store.checkpoint(collection).await?.unwrap_or(0);
        let remote = self.remote.as_ref();
        let response = match with_session_retry(remote, || remote.pull(collection, since)).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%collection, since, %error, "Pull failed");
                return Ok(PullOutcome::Failed(error));
            }
        };

        let changes = response.changes.len();
        let conflicts = response.conflicts.len();
        // a conflicted document is settled by its resolution, not by the raw change
        let conflicted: HashSet<DocumentId> = response
            .conflicts
            .iter()
            .map(|conflict| conflict.server_data.id.clone())
            .collect();
        for document in response.changes {
            if conflicted.contains(&document.id) {
                continue;
            }
            self.store.upsert_from_server(collection, document).await?;
        }
        for conflict in response.conflicts {
            let outcome = self.resolver.resolve(conflict).await?;
            tracing::debug!(%collection, ?outcome, "Resolved conflict");
        }
        self.store
            .set_checkpoint(collection, response.timestamp)
            .await?;

        tracing::debug!(%collection, changes, conflicts, checkpoint = response.timestamp, "Pulled delta");
        Ok(PullOutcome::Applied {
            changes,
            conflicts,
            checkpoint: response.timestamp,
        })
    }

    /// Pull every readable collection; a failure in one does not stop the rest.
    pub async fn pull_all(&self) -> Result<Vec<(Collection, PullOutcome)>> {
        let mut outcomes = Vec::new();
        for collection in self.readable() {
            let outcome = self.pull_collection(collection).await?;
            outcomes.push((collection, outcome));
        }
        Ok(outcomes)
    }
}
