//! Document model shared by every synced collection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;
use crate::util::timestamp_from_value;

/// Domain fields of a document, keyed by camelCase field name.
pub type Fields = Map<String, Value>;

/// Keys owned by the sync layer; callers cannot set them through `fields`.
pub const RESERVED_FIELDS: [&str; 6] = ["id", "_id", "createdAt", "updatedAt", "lastSync", "mergedAt"];

/// Synced collections mirrored in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Events,
    Bookings,
}

impl Collection {
    pub const ALL: [Self; 3] = [Self::Users, Self::Events, Self::Bookings];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Events => "events",
            Self::Bookings => "bookings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "users" => Ok(Self::Users),
            "events" => Ok(Self::Events),
            "bookings" => Ok(Self::Bookings),
            other => Err(Error::InvalidInput(format!("unknown collection `{other}`"))),
        }
    }
}

/// Document identifier.
///
/// Locally created documents get a UUID v7 (time-sortable); the server may
/// answer with a canonical id of its own, so any string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new locally unique id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A persisted record in one of the synced collections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Unique identifier (`_id` is accepted on the wire)
    #[serde(alias = "_id")]
    pub id: DocumentId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// When this copy was last confirmed by the server, `None` while dirty
    #[serde(default)]
    pub last_sync: Option<i64>,
    /// Set when the document is the product of a field-level merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<i64>,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    /// Create a new, not yet synced document stamped at `now`
    #[must_use]
    pub fn new(fields: Fields, now: i64) -> Self {
        Self {
            id: DocumentId::generate(),
            created_at: now,
            updated_at: now,
            last_sync: None,
            merged_at: None,
            fields: strip_reserved(fields),
        }
    }

    /// Shallow top-level merge of `patch` into this document's fields.
    pub fn apply_patch(&mut self, patch: Fields) {
        for (key, value) in strip_reserved(patch) {
            self.fields.insert(key, value);
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Read a timestamp field stored as Unix ms or RFC 3339.
    pub fn timestamp_field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(timestamp_from_value)
    }

    /// Server tombstones carry `"deleted": true`.
    pub fn is_tombstone(&self) -> bool {
        self.fields
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn strip_reserved(mut fields: Fields) -> Fields {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_document_id_unique() {
        assert_ne!(DocumentId::generate(), DocumentId::generate());
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!("Bookings".parse::<Collection>().unwrap(), Collection::Bookings);
        assert!("payments".parse::<Collection>().is_err());
    }

    #[test]
    fn test_new_document_strips_reserved_fields() {
        let doc = Document::new(fields(json!({"id": "x", "createdAt": 1, "title": "Wine night"})), 42);
        assert_eq!(doc.created_at, 42);
        assert_eq!(doc.updated_at, 42);
        assert_eq!(doc.last_sync, None);
        assert_ne!(doc.id.as_str(), "x");
        assert!(!doc.fields.contains_key("createdAt"));
        assert_eq!(doc.str_field("title"), Some("Wine night"));
    }

    #[test]
    fn test_apply_patch_is_shallow() {
        let mut doc = Document::new(fields(json!({"profile": {"bio": "a", "avatar": "b"}, "name": "Ann"})), 1);
        doc.apply_patch(fields(json!({"profile": {"bio": "c"}, "updatedAt": 99})));
        assert_eq!(doc.field("profile"), Some(&json!({"bio": "c"})));
        assert_eq!(doc.str_field("name"), Some("Ann"));
        assert_eq!(doc.updated_at, 1);
    }

    #[test]
    fn test_wire_format_accepts_underscore_id() {
        let doc: Document = serde_json::from_value(json!({
            "_id": "srv-1",
            "createdAt": 1,
            "updatedAt": 2,
            "status": "confirmed"
        }))
        .unwrap();
        assert_eq!(doc.id.as_str(), "srv-1");
        assert_eq!(doc.last_sync, None);
        assert_eq!(doc.str_field("status"), Some("confirmed"));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["id"], json!("srv-1"));
        assert_eq!(value["lastSync"], Value::Null);
        assert!(value.get("mergedAt").is_none());
    }

    #[test]
    fn test_tombstone_flag() {
        let mut doc = Document::new(Fields::new(), 1);
        assert!(!doc.is_tombstone());
        doc.fields.insert("deleted".into(), json!(true));
        assert!(doc.is_tombstone());
    }
}
