//! Server-side document store: canonical copies, the delta feed and admin records.

use std::sync::Arc;
use std::time::Duration;

use libsql::{params, Builder, Connection, Database};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shesocial_core::clock::Clock;
use shesocial_core::db::finish_transaction;
use shesocial_core::models::{
    AdminRole, AdminUser, Collection, ConflictItem, Document, DocumentId, PullResponse, Resolution,
};
use shesocial_core::{Error, Result};
use tokio::sync::Mutex;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS server_documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        server_modified INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (collection, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_server_documents_modified
        ON server_documents(collection, server_modified)",
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        owner TEXT NOT NULL,
        local_data TEXT NOT NULL,
        server_data TEXT NOT NULL,
        resolution TEXT NOT NULL,
        server_modified INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_owner
        ON sync_conflicts(owner, collection, server_modified)",
    "CREATE TABLE IF NOT EXISTS admin_roles (
        role_id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS admin_users (
        admin_id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
];

/// Result of a `PUT`
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome {
    /// The submitted copy is now canonical
    Stored(Document),
    /// The submitted copy was older than the stored one and was recorded as a conflict
    Stale(Document),
}

struct ServerDatabase {
    _db: Database,
    conn: Connection,
    /// Last issued server modification stamp
    last_stamp: i64,
}

impl ServerDatabase {
    /// Strictly increasing stamp, never behind the wall clock.
    fn next_stamp(&mut self, now: i64) -> i64 {
        self.last_stamp = now.max(self.last_stamp.saturating_add(1));
        self.last_stamp
    }
}

#[derive(Clone)]
pub struct ServerStore {
    db: Arc<Mutex<ServerDatabase>>,
    clock: Arc<dyn Clock>,
    conflict_window_ms: i64,
}

impl ServerStore {
    pub async fn open(path: &str, clock: Arc<dyn Clock>, conflict_window: Duration) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let mut created = Ok(());
        for statement in SCHEMA {
            if let Err(error) = conn.execute(statement, ()).await {
                created = Err(error.into());
                break;
            }
        }
        finish_transaction(&conn, created).await?;

        let last_stamp = {
            let mut rows = conn
                .query(
                    "SELECT MAX(
                        COALESCE((SELECT MAX(server_modified) FROM server_documents), 0),
                        COALESCE((SELECT MAX(server_modified) FROM sync_conflicts), 0)
                    )",
                    (),
                )
                .await?;
            match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            }
        };
        tracing::info!(path, last_stamp, "Opened server store");

        Ok(Self {
            db: Arc::new(Mutex::new(ServerDatabase {
                _db: db,
                conn,
                last_stamp,
            })),
            clock,
            conflict_window_ms: i64::try_from(conflict_window.as_millis()).unwrap_or(i64::MAX),
        })
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Live (non-tombstoned) document.
    pub async fn get(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        Ok(load_row(&db.conn, collection, id)
            .await?
            .and_then(|(document, deleted)| (!deleted).then_some(document)))
    }

    /// Store a new document. A retried insert of a live id returns the stored
    /// copy unchanged. Returns whether a row was written.
    pub async fn insert(&self, collection: Collection, document: Document) -> Result<(Document, bool)> {
        let now = self.now();
        let mut db = self.db.lock().await;
        if let Some((existing, false)) = load_row(&db.conn, collection, &document.id).await? {
            return Ok((existing, false));
        }

        let stamp = db.next_stamp(now);
        write_row(&db.conn, collection, &document, stamp, false).await?;
        Ok((document, true))
    }

    /// Replace a live document unless the submitted copy is older than the stored one.
    pub async fn replace(
        &self,
        collection: Collection,
        document: Document,
        owner: &str,
    ) -> Result<ReplaceOutcome> {
        let now = self.now();
        let mut db = self.db.lock().await;
        let Some((stored, false)) = load_row(&db.conn, collection, &document.id).await? else {
            return Err(Error::NotFound(format!("{collection}/{}", document.id)));
        };

        let stamp = db.next_stamp(now);
        if document.updated_at < stored.updated_at {
            let resolution = self.resolution_for(&document, &stored);
            record_conflict(&db.conn, collection, owner, &document, &stored, &resolution, stamp)
                .await?;
            tracing::debug!(
                %collection,
                id = %stored.id,
                resolution = resolution.as_str(),
                "Recorded stale write as conflict"
            );
            return Ok(ReplaceOutcome::Stale(stored));
        }

        let mut document = document;
        document.created_at = stored.created_at;
        write_row(&db.conn, collection, &document, stamp, false).await?;
        Ok(ReplaceOutcome::Stored(document))
    }

    /// Tombstone a document. Returns `false` when it never existed.
    pub async fn delete(&self, collection: Collection, id: &DocumentId) -> Result<bool> {
        let now = self.now();
        let mut db = self.db.lock().await;
        let Some((mut document, deleted)) = load_row(&db.conn, collection, id).await? else {
            return Ok(false);
        };
        if deleted {
            return Ok(true);
        }

        document.fields.insert("deleted".to_string(), Value::Bool(true));
        document.updated_at = document.updated_at.max(now);
        let stamp = db.next_stamp(now);
        write_row(&db.conn, collection, &document, stamp, true).await?;
        Ok(true)
    }

    /// Everything in `collection` modified after `since`, plus the caller's
    /// conflicts recorded after `since`.
    pub async fn changes_since(
        &self,
        collection: Collection,
        since: i64,
        owner: &str,
    ) -> Result<PullResponse> {
        let db = self.db.lock().await;

        let mut rows = db
            .conn
            .query(
                "SELECT data FROM server_documents
                 WHERE collection = ?1 AND server_modified > ?2
                 ORDER BY server_modified ASC",
                params![collection.as_str(), since],
            )
            .await?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            changes.push(parse_json::<Document>(&row.get::<String>(0)?)?);
        }

        let mut rows = db
            .conn
            .query(
                "SELECT local_data, server_data, resolution FROM sync_conflicts
                 WHERE owner = ?1 AND collection = ?2 AND server_modified > ?3
                 ORDER BY server_modified ASC",
                params![owner, collection.as_str(), since],
            )
            .await?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(ConflictItem {
                collection,
                local_data: parse_json(&row.get::<String>(0)?)?,
                server_data: parse_json(&row.get::<String>(1)?)?,
                resolution: Resolution::from(row.get::<String>(2)?),
            });
        }

        Ok(PullResponse {
            changes,
            timestamp: db.last_stamp.max(since),
            conflicts,
        })
    }

    pub async fn save_role(&self, role: &AdminRole) -> Result<()> {
        let db = self.db.lock().await;
        db.conn
            .execute(
                "INSERT OR REPLACE INTO admin_roles (role_id, data) VALUES (?1, ?2)",
                params![role.role_id.as_str(), serde_json::to_string(role)?],
            )
            .await?;
        Ok(())
    }

    pub async fn roles(&self) -> Result<Vec<AdminRole>> {
        let db = self.db.lock().await;
        let mut rows = db
            .conn
            .query("SELECT data FROM admin_roles ORDER BY role_id", ())
            .await?;
        let mut roles = Vec::new();
        while let Some(row) = rows.next().await? {
            roles.push(parse_json(&row.get::<String>(0)?)?);
        }
        Ok(roles)
    }

    pub async fn save_admin(&self, admin: &AdminUser) -> Result<()> {
        let db = self.db.lock().await;
        db.conn
            .execute(
                "INSERT OR REPLACE INTO admin_users (admin_id, data) VALUES (?1, ?2)",
                params![admin.admin_id.as_str(), serde_json::to_string(admin)?],
            )
            .await?;
        Ok(())
    }

    pub async fn admin(&self, admin_id: &str) -> Result<Option<AdminUser>> {
        let db = self.db.lock().await;
        let mut rows = db
            .conn
            .query(
                "SELECT data FROM admin_users WHERE admin_id = ?1",
                params![admin_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_json(&row.get::<String>(0)?)?)),
            None => Ok(None),
        }
    }

    fn resolution_for(&self, submitted: &Document, stored: &Document) -> Resolution {
        if stored.updated_at.saturating_sub(submitted.updated_at) <= self.conflict_window_ms {
            Resolution::MergeRequired
        } else {
            Resolution::ServerWins
        }
    }
}

async fn load_row(
    conn: &Connection,
    collection: Collection,
    id: &DocumentId,
) -> Result<Option<(Document, bool)>> {
    let mut rows = conn
        .query(
            "SELECT data, deleted FROM server_documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id.as_str()],
        )
        .await?;
    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    let document = parse_json(&row.get::<String>(0)?)?;
    Ok(Some((document, row.get::<i64>(1)? != 0)))
}

async fn write_row(
    conn: &Connection,
    collection: Collection,
    document: &Document,
    stamp: i64,
    deleted: bool,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO server_documents
            (collection, id, data, updated_at, server_modified, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            collection.as_str(),
            document.id.as_str(),
            serde_json::to_string(document)?,
            document.updated_at,
            stamp,
            i64::from(deleted)
        ],
    )
    .await?;
    Ok(())
}

async fn record_conflict(
    conn: &Connection,
    collection: Collection,
    owner: &str,
    submitted: &Document,
    stored: &Document,
    resolution: &Resolution,
    stamp: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_conflicts
            (collection, owner, local_data, server_data, resolution, server_modified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            collection.as_str(),
            owner,
            serde_json::to_string(submitted)?,
            serde_json::to_string(stored)?,
            resolution.as_str(),
            stamp
        ],
    )
    .await?;
    Ok(())
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use shesocial_core::clock::ManualClock;
    use shesocial_core::models::Fields;

    const T0: i64 = 1_700_000_000_000;

    async fn setup() -> (ServerStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = ServerStore::open(":memory:", clock.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        (store, clock)
    }

    fn doc(value: serde_json::Value, updated_at: i64) -> Document {
        let mut document = Document::new(value.as_object().cloned().unwrap(), updated_at);
        document.updated_at = updated_at;
        document
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_is_idempotent() {
        let (store, _) = setup().await;
        let event = doc(json!({"title": "Wine night"}), T0);

        let (stored, written) = store.insert(Collection::Events, event.clone()).await.unwrap();
        assert!(written);
        assert_eq!(stored, event);

        let mut retry = event.clone();
        retry.fields.insert("title".into(), json!("Changed"));
        let (stored, written) = store.insert(Collection::Events, retry).await.unwrap();
        assert!(!written);
        assert_eq!(stored.str_field("title"), Some("Wine night"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delta_feed_uses_server_stamps() {
        let (store, clock) = setup().await;
        let first = doc(json!({"title": "One"}), T0);
        store.insert(Collection::Events, first.clone()).await.unwrap();

        let delta = store.changes_since(Collection::Events, 0, "u1").await.unwrap();
        assert_eq!(delta.changes, vec![first.clone()]);
        let checkpoint = delta.timestamp;
        assert_eq!(checkpoint, T0);

        // same wall-clock millisecond still sorts after the checkpoint
        let second = doc(json!({"title": "Two"}), T0);
        store.insert(Collection::Events, second.clone()).await.unwrap();
        let delta = store
            .changes_since(Collection::Events, checkpoint, "u1")
            .await
            .unwrap();
        assert_eq!(delta.changes, vec![second]);
        assert!(delta.timestamp > checkpoint);

        clock.advance(1_000);
        let empty = store
            .changes_since(Collection::Events, delta.timestamp, "u1")
            .await
            .unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.timestamp, delta.timestamp);
        assert!(store
            .changes_since(Collection::Users, 0, "u1")
            .await
            .unwrap()
            .changes
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_replace_records_conflict_for_owner() {
        let (store, clock) = setup().await;
        let original = doc(json!({"title": "Brunch"}), T0);
        store.insert(Collection::Events, original.clone()).await.unwrap();

        let mut newer = original.clone();
        newer.updated_at = T0 + 30_000;
        newer.fields.insert("title".into(), json!("Late brunch"));
        clock.advance(30_000);
        assert_eq!(
            store.replace(Collection::Events, newer.clone(), "u1").await.unwrap(),
            ReplaceOutcome::Stored(newer.clone())
        );

        let mut stale = original.clone();
        stale.fields.insert("venue".into(), json!("Rooftop"));
        let outcome = store.replace(Collection::Events, stale.clone(), "u2").await.unwrap();
        assert_eq!(outcome, ReplaceOutcome::Stale(newer.clone()));

        let delta = store.changes_since(Collection::Events, 0, "u2").await.unwrap();
        assert_eq!(delta.conflicts.len(), 1);
        assert_eq!(delta.conflicts[0].resolution, Resolution::MergeRequired);
        assert_eq!(delta.conflicts[0].local_data, stale);
        assert_eq!(delta.conflicts[0].server_data, newer);

        let other = store.changes_since(Collection::Events, 0, "u1").await.unwrap();
        assert!(other.conflicts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_far_apart_stale_write_is_server_wins() {
        let (store, _) = setup().await;
        let original = doc(json!({"title": "Gala"}), T0);
        store.insert(Collection::Events, original.clone()).await.unwrap();

        let mut newer = original.clone();
        newer.updated_at = T0 + 120_000;
        store.replace(Collection::Events, newer, "u1").await.unwrap();
        store.replace(Collection::Events, original, "u1").await.unwrap();

        let delta = store.changes_since(Collection::Events, 0, "u1").await.unwrap();
        assert_eq!(delta.conflicts[0].resolution, Resolution::ServerWins);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_missing_is_not_found() {
        let (store, _) = setup().await;
        let result = store
            .replace(Collection::Bookings, doc(json!({}), T0), "u1")
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_leaves_tombstone_in_delta() {
        let (store, _) = setup().await;
        let booking = doc(json!({"userId": "u1"}), T0);
        store.insert(Collection::Bookings, booking.clone()).await.unwrap();

        assert!(store.delete(Collection::Bookings, &booking.id).await.unwrap());
        assert!(store.delete(Collection::Bookings, &booking.id).await.unwrap());
        assert!(!store
            .delete(Collection::Bookings, &DocumentId::from("missing"))
            .await
            .unwrap());
        assert_eq!(store.get(Collection::Bookings, &booking.id).await.unwrap(), None);

        let delta = store.changes_since(Collection::Bookings, 0, "u1").await.unwrap();
        assert_eq!(delta.changes.len(), 1);
        assert!(delta.changes[0].is_tombstone());
        assert!(matches!(
            store.replace(Collection::Bookings, booking, "u1").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_admin_records_round_trip() {
        let (store, _) = setup().await;
        let role = AdminRole::new("moderator", "Moderator", "support", ["users:read"]);
        store.save_role(&role).await.unwrap();
        assert_eq!(store.roles().await.unwrap(), vec![role]);

        let admin = AdminUser {
            admin_id: "a1".into(),
            username: "mod".into(),
            email: "mod@example.com".into(),
            password_hash: String::new(),
            role_id: "moderator".into(),
            custom_permissions: Default::default(),
            level: Default::default(),
            status: Default::default(),
        };
        store.save_admin(&admin).await.unwrap();
        assert_eq!(store.admin("a1").await.unwrap(), Some(admin));
        assert_eq!(store.admin("missing").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reopen_restores_stamp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.db").to_string_lossy().to_string();
        let clock = Arc::new(ManualClock::new(T0));
        {
            let store = ServerStore::open(&path, clock.clone(), Duration::from_secs(60))
                .await
                .unwrap();
            store
                .insert(Collection::Users, doc(json!({"name": "Ada"}), T0))
                .await
                .unwrap();
        }

        // clock went backwards; stamps must not
        clock.set(T0 - 10_000);
        let store = ServerStore::open(&path, clock, Duration::from_secs(60))
            .await
            .unwrap();
        let fields: Fields = json!({"name": "Grace"}).as_object().cloned().unwrap();
        store
            .insert(Collection::Users, Document::new(fields, T0 - 10_000))
            .await
            .unwrap();
        let delta = store.changes_since(Collection::Users, T0, "x").await.unwrap();
        assert_eq!(delta.changes.len(), 1);
        assert_eq!(delta.timestamp, T0 + 1);
    }
}
