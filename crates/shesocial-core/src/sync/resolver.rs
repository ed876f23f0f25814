//! Applies server-reported conflicts to the local store.

use super::merge::{merge_documents, MergeShape};
use crate::error::Result;
use crate::models::{
    Collection, ConflictItem, Document, NewQueueItem, Operation, Priority, Resolution,
};
use crate::services::LocalStore;

/// What the resolver did with a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Local copy overwritten with the server's
    ServerApplied,
    /// Local copy kept and queued again at high priority
    ClientRequeued,
    /// Merge result stored locally and queued at high priority
    Merged,
}

#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
}

impl ConflictResolver {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, conflict: ConflictItem) -> Result<ResolutionOutcome> {
        let ConflictItem {
            collection,
            local_data,
            server_data,
            resolution,
        } = conflict;

        match resolution {
            Resolution::ServerWins => {
                self.store
                    .upsert_from_server(collection, server_data)
                    .await?;
                Ok(ResolutionOutcome::ServerApplied)
            }
            Resolution::Unrecognized(tag) => {
                tracing::warn!(
                    %collection,
                    id = %server_data.id,
                    resolution = %tag,
                    "Unrecognized conflict resolution, keeping server copy"
                );
                self.store
                    .upsert_from_server(collection, server_data)
                    .await?;
                Ok(ResolutionOutcome::ServerApplied)
            }
            Resolution::ClientWins => {
                let local = self.local_side(collection, local_data).await?;
                self.store
                    .enqueue(NewQueueItem::new(
                        collection,
                        Operation::Update,
                        local,
                        Priority::High,
                    ))
                    .await?;
                Ok(ResolutionOutcome::ClientRequeued)
            }
            Resolution::MergeRequired => {
                let local = self.local_side(collection, local_data).await?;
                let base = self.store.base_snapshot(collection, &local.id).await?;
                let merged = merge_documents(
                    MergeShape::for_collection(collection),
                    &local,
                    &server_data,
                    base.as_ref(),
                    self.store.now(),
                );

                // too far apart to merge and the server copy is the later one
                if merged == server_data {
                    self.store
                        .upsert_from_server(collection, server_data)
                        .await?;
                    return Ok(ResolutionOutcome::ServerApplied);
                }

                tracing::debug!(%collection, id = %merged.id, "Merged conflicting copies");
                self.store
                    .apply_merged(collection, merged, &server_data)
                    .await?;
                Ok(ResolutionOutcome::Merged)
            }
        }
    }

    /// The stored copy while it still carries unsynced edits, otherwise the
    /// copy the server rejected.
    async fn local_side(&self, collection: Collection, rejected: Document) -> Result<Document> {
        Ok(match self.store.get(collection, &rejected.id).await? {
            Some(stored) if stored.last_sync.is_none() => stored,
            _ => rejected,
        })
    }
}
