//! Document repository implementation

use crate::error::Result;
use crate::models::{Collection, Document, DocumentId};
use libsql::{params, Connection};

/// Trait for mirrored document storage (async)
#[allow(async_fn_in_trait)]
pub trait DocumentRepository {
    /// Get a document by collection and id
    async fn get(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>>;

    /// Last server-confirmed copy of a document, if any
    async fn get_base(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>>;

    /// List every document in a collection, most recently updated first
    async fn list(&self, collection: Collection) -> Result<Vec<Document>>;

    /// Insert or replace a document, keeping its stored base copy
    async fn put(&self, collection: Collection, document: &Document) -> Result<()>;

    /// Insert or replace a document and record `base` as its server copy
    async fn put_synced(
        &self,
        collection: Collection,
        document: &Document,
        base: &Document,
    ) -> Result<()>;

    /// Remove a document. Returns whether a row was deleted.
    async fn delete(&self, collection: Collection, id: &DocumentId) -> Result<bool>;
}

/// libSQL implementation of `DocumentRepository`
pub struct LibSqlDocumentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDocumentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_one(
        &self,
        sql: &str,
        collection: Collection,
        id: &DocumentId,
    ) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(sql, params![collection.as_str(), id.as_str()])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let data: Option<String> = row.get(0)?;
        data.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }
}

impl DocumentRepository for LibSqlDocumentRepository<'_> {
    async fn get(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>> {
        self.query_one(
            "SELECT data FROM documents WHERE collection = ? AND id = ?",
            collection,
            id,
        )
        .await
    }

    async fn get_base(&self, collection: Collection, id: &DocumentId) -> Result<Option<Document>> {
        self.query_one(
            "SELECT base FROM documents WHERE collection = ? AND id = ?",
            collection,
            id,
        )
        .await
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM documents WHERE collection = ? ORDER BY updated_at DESC, id ASC",
                [collection.as_str()],
            )
            .await?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(0)?;
            documents.push(serde_json::from_str(&data)?);
        }
        Ok(documents)
    }

    async fn put(&self, collection: Collection, document: &Document) -> Result<()> {
        let data = serde_json::to_string(document)?;
        self.conn
            .execute(
                "INSERT INTO documents (collection, id, data, created_at, updated_at, last_sync)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    data = excluded.data,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    last_sync = excluded.last_sync",
                params![
                    collection.as_str(),
                    document.id.as_str(),
                    data,
                    document.created_at,
                    document.updated_at,
                    document.last_sync
                ],
            )
            .await?;
        Ok(())
    }

    async fn put_synced(
        &self,
        collection: Collection,
        document: &Document,
        base: &Document,
    ) -> Result<()> {
        let data = serde_json::to_string(document)?;
        let base = serde_json::to_string(base)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO documents
                    (collection, id, data, created_at, updated_at, last_sync, base)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    collection.as_str(),
                    document.id.as_str(),
                    data,
                    document.created_at,
                    document.updated_at,
                    document.last_sync,
                    base
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &DocumentId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                params![collection.as_str(), id.as_str()],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Fields;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn event(title: &str, now: i64) -> Document {
        let mut fields = Fields::new();
        fields.insert("title".into(), json!(title));
        Document::new(fields, now)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let db = setup().await;
        let repo = LibSqlDocumentRepository::new(db.connection());

        let doc = event("Wine night", 100);
        repo.put(Collection::Events, &doc).await.unwrap();

        let loaded = repo.get(Collection::Events, &doc.id).await.unwrap();
        assert_eq!(loaded, Some(doc.clone()));
        assert!(repo.get(Collection::Users, &doc.id).await.unwrap().is_none());
        assert!(repo.get_base(Collection::Events, &doc.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_keeps_base() {
        let db = setup().await;
        let repo = LibSqlDocumentRepository::new(db.connection());

        let mut doc = event("Wine night", 100);
        repo.put_synced(Collection::Events, &doc, &doc).await.unwrap();

        let base = doc.clone();
        doc.apply_patch(json!({"title": "Jazz night"}).as_object().cloned().unwrap());
        doc.updated_at = 200;
        repo.put(Collection::Events, &doc).await.unwrap();

        let stored = repo.get(Collection::Events, &doc.id).await.unwrap().unwrap();
        assert_eq!(stored.str_field("title"), Some("Jazz night"));
        let stored_base = repo.get_base(Collection::Events, &doc.id).await.unwrap();
        assert_eq!(stored_base, Some(base));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_newest_first() {
        let db = setup().await;
        let repo = LibSqlDocumentRepository::new(db.connection());

        let older = event("Brunch", 100);
        let newer = event("Gala", 300);
        repo.put(Collection::Events, &older).await.unwrap();
        repo.put(Collection::Events, &newer).await.unwrap();

        let listed = repo.list(Collection::Events).await.unwrap();
        assert_eq!(listed, vec![newer, older]);
        assert!(repo.list(Collection::Bookings).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete() {
        let db = setup().await;
        let repo = LibSqlDocumentRepository::new(db.connection());

        let doc = event("Brunch", 100);
        repo.put(Collection::Events, &doc).await.unwrap();

        assert!(repo.delete(Collection::Events, &doc.id).await.unwrap());
        assert!(!repo.delete(Collection::Events, &doc.id).await.unwrap());
        assert!(repo.get(Collection::Events, &doc.id).await.unwrap().is_none());
    }
}
