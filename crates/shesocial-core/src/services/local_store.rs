//! Local mutation store: the offline-first document API used by the UI.
//!
//! Every local write persists the document and appends the matching queue
//! item in one transaction, then nudges the push loop. The sync engines use
//! the server-side helpers further down to fold acknowledgements, deltas and
//! merges back into the mirror.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::trigger::SyncTrigger;
use crate::clock::Clock;
use crate::db::{
    finish_transaction, CheckpointRepository, Database, DocumentRepository,
    LibSqlCheckpointRepository, LibSqlDocumentRepository, LibSqlQueueRepository, QueueRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    Collection, Document, DocumentId, FailedOperation, Fields, MembershipTier, NewQueueItem,
    Operation, Priority, QueueItem,
};
use crate::sync::{apply_outcome, select_batch, FailureKind, Outcome, QueueTransition, RemovalReason};

/// Thread-safe handle to the local mirror and its sync queue.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    trigger: SyncTrigger,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            clock,
            trigger: SyncTrigger::new(),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            clock,
            trigger: SyncTrigger::new(),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn trigger(&self) -> &SyncTrigger {
        &self.trigger
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Create a document locally and queue its insert.
    pub async fn create(
        &self,
        collection: Collection,
        fields: Fields,
        priority: Priority,
    ) -> Result<Document> {
        let document = Document::new(fields, self.now());
        self.write_and_enqueue(collection, &document, Operation::Insert, priority)
            .await?;
        tracing::debug!(%collection, id = %document.id, "Created document locally");
        Ok(document)
    }

    /// Shallow-merge `patch` into an existing document and queue the update.
    pub async fn update(
        &self,
        collection: Collection,
        id: &DocumentId,
        patch: Fields,
        priority: Priority,
    ) -> Result<Document> {
        let mut document = self
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;

        document.apply_patch(patch);
        document.updated_at = self.now().max(document.updated_at);
        document.last_sync = None;
        document.merged_at = None;

        self.write_and_enqueue(collection, &document, Operation::Update, priority)
            .await?;
        Ok(document)
    }

    /// Remove a document locally and queue its delete with the last known copy.
    pub async fn delete(
        &self,
        collection: Collection,
        id: &DocumentId,
        priority: Priority,
    ) -> Result<Document> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        let documents = LibSqlDocumentRepository::new(conn);
        let queue = LibSqlQueueRepository::new(conn);

        let document = documents
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            documents.delete(collection, id).await?;
            queue
                .enqueue(
                    NewQueueItem::new(collection, Operation::Delete, document.clone(), priority),
                    now,
                )
                .await
        }
        .await;
        finish_transaction(conn, result).await?;
        drop(db);

        self.trigger.request();
        Ok(document)
    }

    pub async fn get(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        LibSqlDocumentRepository::new(db.connection())
            .get(collection, id)
            .await
    }

    /// All documents of a collection, most recently updated first.
    pub async fn list(&self, collection: Collection) -> Result<Vec<Document>> {
        let db = self.db.lock().await;
        LibSqlDocumentRepository::new(db.connection())
            .list(collection)
            .await
    }

    pub async fn users_by_membership(&self, tier: MembershipTier) -> Result<Vec<Document>> {
        let users = self.list(Collection::Users).await?;
        Ok(users
            .into_iter()
            .filter(|user| MembershipTier::of(user) == tier)
            .collect())
    }

    /// Events whose `dateTime` falls in `[from, to]`, soonest first.
    pub async fn events_between(&self, from: i64, to: i64) -> Result<Vec<Document>> {
        if from > to {
            return Err(Error::InvalidInput(format!(
                "empty date range: {from} > {to}"
            )));
        }
        let mut events: Vec<(i64, Document)> = self
            .list(Collection::Events)
            .await?
            .into_iter()
            .filter_map(|event| {
                let at = event.timestamp_field("dateTime")?;
                (from..=to).contains(&at).then_some((at, event))
            })
            .collect();
        events.sort_by_key(|(at, _)| *at);
        Ok(events.into_iter().map(|(_, event)| event).collect())
    }

    pub async fn bookings_for_user(&self, user_id: &DocumentId) -> Result<Vec<Document>> {
        let bookings = self.list(Collection::Bookings).await?;
        Ok(bookings
            .into_iter()
            .filter(|booking| booking.str_field("userId") == Some(user_id.as_str()))
            .collect())
    }

    /// Case-insensitive substring search over name, email and `profile.bio`.
    ///
    /// Only members whose tier allows browsing may search; the searcher is
    /// never part of the result.
    pub async fn search_members(
        &self,
        searcher: &Document,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let tier = MembershipTier::of(searcher);
        if !tier.can_search_members() {
            return Err(Error::PermissionDenied(format!(
                "{tier} members cannot search other members"
            )));
        }

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::InvalidInput("search query must not be empty".into()));
        }

        let users = self.list(Collection::Users).await?;
        Ok(users
            .into_iter()
            .filter(|user| user.id != searcher.id && member_matches(user, &needle))
            .take(limit)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Sync side
    // ---------------------------------------------------------------------

    /// Append a mutation to the queue and request a push.
    pub async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem> {
        let now = self.now();
        let db = self.db.lock().await;
        let queued = LibSqlQueueRepository::new(db.connection())
            .enqueue(item, now)
            .await?;
        drop(db);

        self.trigger.request();
        Ok(queued)
    }

    /// Up to `limit` items that are past their backoff, high priority first.
    pub async fn select_batch(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let items = self.queue_items().await?;
        Ok(select_batch(items, self.now(), limit))
    }

    /// Current state of a queue item, `None` once it has left the queue.
    pub async fn queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).get(id).await
    }

    /// Every pending queue item in insertion order.
    pub async fn queue_items(&self) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list().await
    }

    pub async fn mark_succeeded(&self, id: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove(id)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. Dropped high-priority items are archived.
    pub async fn mark_failed(
        &self,
        item: QueueItem,
        kind: FailureKind,
        message: &str,
    ) -> Result<QueueTransition> {
        let now = self.now();
        let outcome = Outcome::Failed {
            kind,
            message: message.to_string(),
        };
        let archived_copy = QueueItem {
            last_error: Some(message.to_string()),
            ..item.clone()
        };
        let transition = apply_outcome(item, outcome, now);

        let db = self.db.lock().await;
        let queue = LibSqlQueueRepository::new(db.connection());
        match &transition {
            QueueTransition::Retry(updated) => {
                queue.update(updated).await?;
                tracing::debug!(
                    id = updated.id,
                    retries = updated.retries,
                    "Queue item will be retried"
                );
            }
            QueueTransition::Removed(reason) => {
                if archived_copy.priority == Priority::High && *reason != RemovalReason::Succeeded {
                    queue.archive(&archived_copy, now).await?;
                } else {
                    queue.remove(archived_copy.id).await?;
                }
                tracing::warn!(
                    id = archived_copy.id,
                    collection = %archived_copy.collection,
                    operation = %archived_copy.operation,
                    reason = ?reason,
                    error = message,
                    "Dropped queue item"
                );
            }
        }
        Ok(transition)
    }

    /// Acknowledge a pushed item and fold the server's canonical copy back in.
    ///
    /// When the server assigned a new id, the local row and every pending
    /// queue item for the old id are moved over. Local edits made after the
    /// item was queued are kept; only their base copy is refreshed. A
    /// canonical copy newer than the pushed one means the server kept its
    /// own copy; the local document and its base are then left for the
    /// conflict that the next pull delivers.
    pub async fn apply_canonical(&self, item: &QueueItem, canonical: Option<Document>) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        let documents = LibSqlDocumentRepository::new(conn);
        let queue = LibSqlQueueRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            queue.remove(item.id).await?;
            if item.operation == Operation::Delete {
                return Ok(());
            }

            let canonical = canonical.unwrap_or_else(|| item.data.clone());
            let old_id = &item.data.id;
            let renamed = canonical.id != *old_id;
            let rejected = canonical.updated_at > item.data.updated_at;

            let Some(local) = documents.get(item.collection, old_id).await? else {
                // deleted locally after this item was queued
                return Ok(());
            };
            let previous_base = if rejected && renamed {
                documents.get_base(item.collection, old_id).await?
            } else {
                None
            };

            if renamed {
                documents.delete(item.collection, old_id).await?;
                for mut pending in queue.list().await? {
                    if pending.collection == item.collection && pending.data.id == *old_id {
                        pending.data.id = canonical.id.clone();
                        queue.update(&pending).await?;
                    }
                }
                tracing::debug!(
                    collection = %item.collection,
                    from = %old_id,
                    to = %canonical.id,
                    "Adopted server id"
                );
            }

            if rejected {
                tracing::debug!(
                    collection = %item.collection,
                    id = %canonical.id,
                    "Server kept a newer copy, leaving local edits for conflict resolution"
                );
                if !renamed {
                    return Ok(());
                }
                let kept = Document {
                    id: canonical.id.clone(),
                    ..local
                };
                return match previous_base {
                    Some(base) => documents.put_synced(item.collection, &kept, &base).await,
                    None => documents.put(item.collection, &kept).await,
                };
            }

            if local.updated_at > item.data.updated_at {
                let kept = Document {
                    id: canonical.id.clone(),
                    ..local
                };
                documents.put_synced(item.collection, &kept, &canonical).await
            } else {
                let synced = Document {
                    last_sync: Some(now),
                    merged_at: None,
                    ..canonical.clone()
                };
                documents.put_synced(item.collection, &synced, &canonical).await
            }
        }
        .await;
        finish_transaction(conn, result).await
    }

    /// Idempotently mirror a server copy; tombstones remove the local row.
    pub async fn upsert_from_server(&self, collection: Collection, document: Document) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let documents = LibSqlDocumentRepository::new(db.connection());

        if document.is_tombstone() {
            documents.delete(collection, &document.id).await?;
            return Ok(());
        }

        let synced = Document {
            last_sync: Some(now),
            ..document.clone()
        };
        documents.put_synced(collection, &synced, &document).await
    }

    /// Store a merge result with `server` as its new base and queue it at high priority.
    pub async fn apply_merged(
        &self,
        collection: Collection,
        merged: Document,
        server: &Document,
    ) -> Result<QueueItem> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        let documents = LibSqlDocumentRepository::new(conn);
        let queue = LibSqlQueueRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            let merged = Document {
                last_sync: None,
                ..merged
            };
            documents.put_synced(collection, &merged, server).await?;
            queue
                .enqueue(
                    NewQueueItem::new(collection, Operation::Update, merged, Priority::High),
                    now,
                )
                .await
        }
        .await;
        let queued = finish_transaction(conn, result).await?;
        drop(db);

        self.trigger.request();
        Ok(queued)
    }

    /// Last server-confirmed copy of a document, used as the merge base.
    pub async fn base_snapshot(
        &self,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        LibSqlDocumentRepository::new(db.connection())
            .get_base(collection, id)
            .await
    }

    pub async fn checkpoint(&self, collection: Collection) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .get(collection)
            .await
    }

    pub async fn set_checkpoint(&self, collection: Collection, server_timestamp: i64) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        LibSqlCheckpointRepository::new(db.connection())
            .set(collection, server_timestamp, now)
            .await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).count().await
    }

    pub async fn failed_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .count_failed()
            .await
    }

    /// Archived high-priority failures, most recent first.
    pub async fn list_failed_operations(&self, limit: usize) -> Result<Vec<FailedOperation>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_failed(limit)
            .await
    }

    /// Failed attempts recorded at or after `since`.
    pub async fn errors_since(&self, since: i64) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .count_errors_since(since)
            .await
    }

    async fn write_and_enqueue(
        &self,
        collection: Collection,
        document: &Document,
        operation: Operation,
        priority: Priority,
    ) -> Result<QueueItem> {
        let now = self.now();
        let db = self.db.lock().await;
        let conn = db.connection();
        let documents = LibSqlDocumentRepository::new(conn);
        let queue = LibSqlQueueRepository::new(conn);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            documents.put(collection, document).await?;
            queue
                .enqueue(
                    NewQueueItem::new(collection, operation, document.clone(), priority),
                    now,
                )
                .await
        }
        .await;
        let queued = finish_transaction(conn, result).await?;
        drop(db);

        self.trigger.request();
        Ok(queued)
    }
}

fn member_matches(user: &Document, needle: &str) -> bool {
    let bio = user
        .field("profile")
        .and_then(|profile| profile.get("bio"))
        .and_then(serde_json::Value::as_str);

    [user.str_field("name"), user.str_field("email"), bio]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(needle))
}
