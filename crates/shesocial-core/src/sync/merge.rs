//! Field-level merge of a local document with its server counterpart.
//!
//! Copies edited more than a minute apart are not merged: the later one is
//! taken verbatim. Closer edits are merged key by key against the last
//! server-confirmed copy (the base) when one is known, so a key changed on
//! only one side keeps that side's value. Keys changed on both sides resolve
//! to the local value, except for the collection-specific shapes below.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{Collection, Document, Fields, Participant, VideoAsset};

/// Edits further apart than this are treated as sequential, not concurrent
pub const MERGE_WINDOW_MS: i64 = 60_000;

/// Merge rules applied on top of the generic key-by-key merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeShape {
    /// Member profile: nested `profile`, `interests` set, `videos` by type
    Profile,
    /// Event: `participants` by user
    Event,
    Generic,
}

impl MergeShape {
    pub const fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Users => Self::Profile,
            Collection::Events => Self::Event,
            Collection::Bookings => Self::Generic,
        }
    }
}

/// Merge `local` and `server` into a new document stamped `merged_at = now`.
pub fn merge_documents(
    shape: MergeShape,
    local: &Document,
    server: &Document,
    base: Option<&Document>,
    now: i64,
) -> Document {
    if local.updated_at.abs_diff(server.updated_at) > MERGE_WINDOW_MS.unsigned_abs() {
        return if local.updated_at > server.updated_at {
            local.clone()
        } else {
            server.clone()
        };
    }

    let fields = merge_fields(
        shape,
        &local.fields,
        &server.fields,
        base.map(|base| &base.fields),
    );

    Document {
        id: server.id.clone(),
        created_at: server.created_at,
        updated_at: local.updated_at.max(server.updated_at),
        last_sync: None,
        merged_at: Some(now),
        fields,
    }
}

fn merge_fields(
    shape: MergeShape,
    local: &Fields,
    server: &Fields,
    base: Option<&Fields>,
) -> Fields {
    let mut merged = Fields::new();
    let keys = local
        .keys()
        .chain(server.keys().filter(|key| !local.contains_key(*key)));

    for key in keys {
        let base_value = base.map(|base| base.get(key));
        if let Some(value) = merge_key(shape, key, local.get(key), server.get(key), base_value) {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

/// `base` is `None` when no base copy exists, `Some(None)` when the base
/// lacks the key.
fn merge_key(
    shape: MergeShape,
    key: &str,
    local: Option<&Value>,
    server: Option<&Value>,
    base: Option<Option<&Value>>,
) -> Option<Value> {
    if let Some(base) = base {
        if local == base {
            return server.cloned();
        }
        if server == base {
            return local.cloned();
        }
    }

    match (local, server) {
        (Some(local), Some(server)) => Some(merge_values(shape, key, local, server, base)),
        (Some(local), None) => Some(local.clone()),
        // removed locally and changed remotely: the local removal stands
        (None, Some(_)) if base.is_some() => None,
        (None, Some(server)) => Some(server.clone()),
        (None, None) => None,
    }
}

fn merge_values(
    shape: MergeShape,
    key: &str,
    local: &Value,
    server: &Value,
    base: Option<Option<&Value>>,
) -> Value {
    if local == server {
        return local.clone();
    }

    match (shape, key, local, server) {
        (MergeShape::Profile, "profile", Value::Object(local), Value::Object(server)) => {
            // a base without a profile means every profile key is new
            let empty = Fields::new();
            let base = base.map(|profile| profile.and_then(Value::as_object).unwrap_or(&empty));
            Value::Object(merge_fields(MergeShape::Generic, local, server, base))
        }
        (MergeShape::Profile, "interests", Value::Array(local), Value::Array(server)) => {
            Value::Array(union(local, server))
        }
        (MergeShape::Profile, "videos", Value::Array(local), Value::Array(server)) => {
            Value::Array(merge_keyed::<VideoAsset>(
                local,
                server,
                |video| video.asset_type.clone(),
                |video| video.uploaded_at,
            ))
        }
        (MergeShape::Event, "participants", Value::Array(local), Value::Array(server)) => {
            Value::Array(merge_keyed::<Participant>(
                local,
                server,
                |participant| participant.user_id.clone(),
                |participant| participant.joined_at,
            ))
        }
        _ => local.clone(),
    }
}

/// Local entries in order, then server entries the local side lacks.
fn union(local: &[Value], server: &[Value]) -> Vec<Value> {
    let mut merged = local.to_vec();
    for value in server {
        if !merged.contains(value) {
            merged.push(value.clone());
        }
    }
    merged
}

/// One entry per identity; the entry with the later stamp wins, ties go to
/// the local side. Entries that don't parse are kept as they are.
fn merge_keyed<T: DeserializeOwned>(
    local: &[Value],
    server: &[Value],
    identity: impl Fn(&T) -> String,
    stamp: impl Fn(&T) -> i64,
) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(local.len() + server.len());
    let mut positions: HashMap<String, (usize, i64)> = HashMap::new();

    let entries = local
        .iter()
        .map(|value| (value, true))
        .chain(server.iter().map(|value| (value, false)));

    for (value, is_local) in entries {
        let Ok(parsed) = serde_json::from_value::<T>(value.clone()) else {
            if is_local || !merged.contains(value) {
                merged.push(value.clone());
            }
            continue;
        };

        let id = identity(&parsed);
        let at = stamp(&parsed);
        match positions.get(&id).copied() {
            Some((index, existing)) if at > existing => {
                merged[index] = value.clone();
                positions.insert(id, (index, at));
            }
            Some(_) => {}
            None => {
                positions.insert(id, (merged.len(), at));
                merged.push(value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: i64 = 1_700_000_100_000;

    fn doc(id: &str, updated_at: i64, fields: Value) -> Document {
        let mut value = fields;
        value["id"] = json!(id);
        value["createdAt"] = json!(1_000);
        value["updatedAt"] = json!(updated_at);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_shape_per_collection() {
        assert_eq!(MergeShape::for_collection(Collection::Users), MergeShape::Profile);
        assert_eq!(MergeShape::for_collection(Collection::Events), MergeShape::Event);
        assert_eq!(MergeShape::for_collection(Collection::Bookings), MergeShape::Generic);
    }

    #[test]
    fn test_time_gap_takes_later_copy_verbatim() {
        let local = doc("u1", 100_000, json!({"name": "Local"}));
        let server = doc("u1", 100_000 + MERGE_WINDOW_MS + 1, json!({"name": "Server"}));

        let merged = merge_documents(MergeShape::Profile, &local, &server, None, NOW);
        assert_eq!(merged, server);

        let merged = merge_documents(MergeShape::Profile, &server, &local, None, NOW);
        assert_eq!(merged, server);
    }

    #[test]
    fn test_extreme_timestamps_take_later_copy() {
        let local = doc("u1", i64::MIN, json!({"name": "Local"}));
        let server = doc("u1", i64::MAX, json!({"name": "Server"}));
        let merged = merge_documents(MergeShape::Profile, &local, &server, None, NOW);
        assert_eq!(merged, server);
    }

    #[test]
    fn test_window_boundary_still_merges() {
        let local = doc("u1", 100_000, json!({"name": "Local"}));
        let server = doc("u1", 100_000 + MERGE_WINDOW_MS, json!({"city": "Taipei"}));

        let merged = merge_documents(MergeShape::Generic, &local, &server, None, NOW);
        assert_eq!(merged.str_field("name"), Some("Local"));
        assert_eq!(merged.str_field("city"), Some("Taipei"));
        assert_eq!(merged.updated_at, 100_000 + MERGE_WINDOW_MS);
        assert_eq!(merged.merged_at, Some(NOW));
    }

    #[test]
    fn test_disjoint_profile_edits_both_survive() {
        let base = doc("u1", 1_000, json!({"profile": {"bio": "old", "avatar": "old.png"}}));
        let local = doc("u1", 10_000, json!({"profile": {"bio": "new bio", "avatar": "old.png"}}));
        let server = doc("u1", 20_000, json!({"profile": {"bio": "old", "avatar": "new.png"}}));

        let merged = merge_documents(MergeShape::Profile, &local, &server, Some(&base), NOW);
        assert_eq!(
            merged.field("profile"),
            Some(&json!({"bio": "new bio", "avatar": "new.png"}))
        );
        assert_eq!(merged.updated_at, 20_000);
        assert_eq!(merged.last_sync, None);
    }

    #[test]
    fn test_profile_without_base_prefers_local() {
        let local = doc("u1", 10_000, json!({"profile": {"bio": "mine"}}));
        let server = doc("u1", 20_000, json!({"profile": {"bio": "theirs", "avatar": "s.png"}}));

        let merged = merge_documents(MergeShape::Profile, &local, &server, None, NOW);
        assert_eq!(
            merged.field("profile"),
            Some(&json!({"bio": "mine", "avatar": "s.png"}))
        );
    }

    #[test]
    fn test_interests_union() {
        let local = doc("u1", 10_000, json!({"interests": ["wine", "jazz"]}));
        let server = doc("u1", 20_000, json!({"interests": ["jazz", "hiking"]}));

        let merged = merge_documents(MergeShape::Profile, &local, &server, None, NOW);
        assert_eq!(
            merged.field("interests"),
            Some(&json!(["wine", "jazz", "hiking"]))
        );
    }

    #[test]
    fn test_videos_by_type_later_upload_wins() {
        let local = doc(
            "u1",
            10_000,
            json!({"videos": [
                {"type": "intro", "uploadedAt": 500, "url": "local-intro"},
                {"type": "lifestyle", "uploadedAt": 100, "url": "local-life"}
            ]}),
        );
        let server = doc(
            "u1",
            20_000,
            json!({"videos": [
                {"type": "intro", "uploadedAt": 400, "url": "server-intro"},
                {"type": "lifestyle", "uploadedAt": 900, "url": "server-life"},
                {"type": "hobby", "uploadedAt": 50, "url": "server-hobby"}
            ]}),
        );

        let merged = merge_documents(MergeShape::Profile, &local, &server, None, NOW);
        let urls: Vec<&str> = merged
            .field("videos")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(|video| video["url"].as_str())
            .collect();
        assert_eq!(urls, vec!["local-intro", "server-life", "server-hobby"]);
    }

    #[test]
    fn test_participants_newer_join_wins() {
        let local = doc(
            "e1",
            10_000,
            json!({"participants": [
                {"userId": "a", "joinedAt": 10, "status": "waitlist"},
                {"userId": "b", "joinedAt": 20}
            ]}),
        );
        let server = doc(
            "e1",
            20_000,
            json!({"participants": [
                {"userId": "a", "joinedAt": 30, "status": "confirmed"},
                {"userId": "c", "joinedAt": "1970-01-01T00:00:01Z"}
            ]}),
        );

        let merged = merge_documents(MergeShape::Event, &local, &server, None, NOW);
        assert_eq!(
            merged.field("participants"),
            Some(&json!([
                {"userId": "a", "joinedAt": 30, "status": "confirmed"},
                {"userId": "b", "joinedAt": 20},
                {"userId": "c", "joinedAt": "1970-01-01T00:00:01Z"}
            ]))
        );
    }

    #[test]
    fn test_generic_conflicting_key_prefers_local() {
        let base = doc("b1", 1_000, json!({"status": "pending", "seats": 1}));
        let local = doc("b1", 10_000, json!({"status": "cancelled", "seats": 1}));
        let server = doc("b1", 20_000, json!({"status": "confirmed", "seats": 2}));

        let merged = merge_documents(MergeShape::Generic, &local, &server, Some(&base), NOW);
        assert_eq!(merged.str_field("status"), Some("cancelled"));
        assert_eq!(merged.field("seats"), Some(&json!(2)));
    }

    #[test]
    fn test_key_removed_on_one_side_with_base() {
        let base = doc("b1", 1_000, json!({"note": "bring ID", "seats": 1}));
        let local = doc("b1", 10_000, json!({"seats": 1}));
        let server = doc("b1", 20_000, json!({"note": "bring ID", "seats": 1, "table": 4}));

        let merged = merge_documents(MergeShape::Generic, &local, &server, Some(&base), NOW);
        assert_eq!(merged.field("note"), None);
        assert_eq!(merged.field("table"), Some(&json!(4)));
    }

    #[test]
    fn test_merge_keeps_server_id() {
        let local = doc("local-1", 10_000, json!({}));
        let server = doc("srv-1", 10_000, json!({}));
        let merged = merge_documents(MergeShape::Generic, &local, &server, None, NOW);
        assert_eq!(merged.id.as_str(), "srv-1");
    }
}
