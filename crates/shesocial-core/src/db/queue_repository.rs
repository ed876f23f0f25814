//! Sync queue repository implementation

use crate::error::{Error, Result};
use crate::models::{FailedOperation, NewQueueItem, QueueItem};
use libsql::{params, Connection, Row};

/// Trait for durable sync queue storage (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append a mutation; returns the stored item with its sequence number
    async fn enqueue(&self, item: NewQueueItem, timestamp: i64) -> Result<QueueItem>;

    /// Get a queue item by id
    async fn get(&self, id: i64) -> Result<Option<QueueItem>>;

    /// Every pending item in insertion order
    async fn list(&self) -> Result<Vec<QueueItem>>;

    /// Persist retries, error, timestamp and payload of an existing item
    async fn update(&self, item: &QueueItem) -> Result<()>;

    /// Remove an item. Returns whether it existed.
    async fn remove(&self, id: i64) -> Result<bool>;

    /// Number of pending items
    async fn count(&self) -> Result<u64>;

    /// Move an item into `failed_operations`
    async fn archive(&self, item: &QueueItem, failed_at: i64) -> Result<FailedOperation>;

    /// Archived items, most recent first
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedOperation>>;

    /// Number of archived items
    async fn count_failed(&self) -> Result<u64>;

    /// Pending items carrying an error plus archived items, stamped at or after `since`
    async fn count_errors_since(&self, since: i64) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

const QUEUE_COLUMNS: &str =
    "id, collection, operation, data, timestamp, retries, last_error, priority";

const FAILED_COLUMNS: &str =
    "id, queue_item_id, collection, operation, data, priority, retries, last_error, failed_at";

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<QueueItem> {
        let collection: String = row.get(1)?;
        let operation: String = row.get(2)?;
        let data: String = row.get(3)?;
        let priority: String = row.get(7)?;
        Ok(QueueItem {
            id: row.get(0)?,
            collection: collection.parse()?,
            operation: operation.parse()?,
            data: serde_json::from_str(&data)?,
            timestamp: row.get(4)?,
            retries: parse_retries(row.get(5)?)?,
            last_error: row.get(6)?,
            priority: priority.parse()?,
        })
    }

    fn parse_failed(row: &Row) -> Result<FailedOperation> {
        let collection: String = row.get(2)?;
        let operation: String = row.get(3)?;
        let data: String = row.get(4)?;
        let priority: String = row.get(5)?;
        Ok(FailedOperation {
            id: row.get(0)?,
            queue_item_id: row.get(1)?,
            collection: collection.parse()?,
            operation: operation.parse()?,
            data: serde_json::from_str(&data)?,
            priority: priority.parse()?,
            retries: parse_retries(row.get(6)?)?,
            last_error: row.get(7)?,
            failed_at: row.get(8)?,
        })
    }

    async fn count_query(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let mut rows = self.conn.query(sql, params).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        u64::try_from(count).map_err(|_| Error::Storage(format!("negative row count {count}")))
    }
}

fn parse_retries(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Storage(format!("invalid retry count {value}")))
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(&self, item: NewQueueItem, timestamp: i64) -> Result<QueueItem> {
        let data = serde_json::to_string(&item.data)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue (collection, operation, data, timestamp, retries, last_error, priority)
                 VALUES (?, ?, ?, ?, 0, NULL, ?)",
                params![
                    item.collection.as_str(),
                    item.operation.as_str(),
                    data,
                    timestamp,
                    item.priority.as_str()
                ],
            )
            .await?;

        Ok(QueueItem {
            id: self.conn.last_insert_rowid(),
            collection: item.collection,
            operation: item.operation,
            data: item.data,
            timestamp,
            retries: 0,
            last_error: None,
            priority: item.priority,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?");
        let mut rows = self.conn.query(&sql, [id]).await?;
        match rows.next().await? {
            Some(row) => Self::parse_item(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<QueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id ASC");
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn update(&self, item: &QueueItem) -> Result<()> {
        let data = serde_json::to_string(&item.data)?;
        let affected = self
            .conn
            .execute(
                "UPDATE sync_queue SET data = ?, timestamp = ?, retries = ?, last_error = ? WHERE id = ?",
                params![
                    data,
                    item.timestamp,
                    i64::from(item.retries),
                    item.last_error.clone(),
                    item.id
                ],
            )
            .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("queue item {}", item.id)));
        }
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(affected > 0)
    }

    async fn count(&self) -> Result<u64> {
        self.count_query("SELECT COUNT(*) FROM sync_queue", ())
            .await
    }

    async fn archive(&self, item: &QueueItem, failed_at: i64) -> Result<FailedOperation> {
        let data = serde_json::to_string(&item.data)?;
        self.conn
            .execute(
                "INSERT INTO failed_operations
                    (queue_item_id, collection, operation, data, priority, retries, last_error, failed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    item.id,
                    item.collection.as_str(),
                    item.operation.as_str(),
                    data,
                    item.priority.as_str(),
                    i64::from(item.retries),
                    item.last_error.clone(),
                    failed_at
                ],
            )
            .await?;
        let id = self.conn.last_insert_rowid();
        self.remove(item.id).await?;

        Ok(FailedOperation {
            id,
            queue_item_id: item.id,
            collection: item.collection,
            operation: item.operation,
            data: item.data.clone(),
            priority: item.priority,
            retries: item.retries,
            last_error: item.last_error.clone(),
            failed_at,
        })
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedOperation>> {
        let sql = format!(
            "SELECT {FAILED_COLUMNS} FROM failed_operations ORDER BY failed_at DESC, id DESC LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self.conn.query(&sql, [limit]).await?;

        let mut failed = Vec::new();
        while let Some(row) = rows.next().await? {
            failed.push(Self::parse_failed(&row)?);
        }
        Ok(failed)
    }

    async fn count_failed(&self) -> Result<u64> {
        self.count_query("SELECT COUNT(*) FROM failed_operations", ())
            .await
    }

    async fn count_errors_since(&self, since: i64) -> Result<u64> {
        self.count_query(
            "SELECT
                (SELECT COUNT(*) FROM sync_queue WHERE last_error IS NOT NULL AND timestamp >= ?1)
              + (SELECT COUNT(*) FROM failed_operations WHERE failed_at >= ?1)",
            [since],
        )
        .await
    }
}
