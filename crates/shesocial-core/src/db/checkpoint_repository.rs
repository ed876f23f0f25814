//! Pull checkpoint repository implementation

use crate::error::Result;
use crate::models::Collection;
use libsql::{params, Connection};

/// Trait for per-collection pull checkpoints (async)
#[allow(async_fn_in_trait)]
pub trait CheckpointRepository {
    /// Server timestamp of the last applied delta, if the collection was ever pulled
    async fn get(&self, collection: Collection) -> Result<Option<i64>>;

    /// Record a new checkpoint
    async fn set(&self, collection: Collection, server_timestamp: i64, now: i64) -> Result<()>;
}

/// libSQL implementation of `CheckpointRepository`
pub struct LibSqlCheckpointRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCheckpointRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CheckpointRepository for LibSqlCheckpointRepository<'_> {
    async fn get(&self, collection: Collection) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT server_timestamp FROM sync_checkpoints WHERE collection = ?",
                [collection.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, collection: Collection, server_timestamp: i64, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_checkpoints (collection, server_timestamp, updated_at)
                 VALUES (?, ?, ?)",
                params![collection.as_str(), server_timestamp, now],
            )
            .await?;
        Ok(())
    }
}
