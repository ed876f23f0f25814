//! Conflict and delta payloads returned by the pull endpoint

use serde::{Deserialize, Serialize};

use super::document::{Collection, Document};

/// How the server asks the client to reconcile a conflicting pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Resolution {
    ServerWins,
    ClientWins,
    MergeRequired,
    /// Tag this client does not understand; handled as server-wins
    Unrecognized(String),
}

impl Resolution {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::MergeRequired => "merge_required",
            Self::Unrecognized(tag) => tag,
        }
    }
}

impl From<String> for Resolution {
    fn from(value: String) -> Self {
        match value.as_str() {
            "server_wins" => Self::ServerWins,
            "client_wins" => Self::ClientWins,
            "merge_required" => Self::MergeRequired,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::Unrecognized(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

/// A conflicting local/server pair reported by a pull response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    pub collection: Collection,
    pub local_data: Document,
    pub server_data: Document,
    pub resolution: Resolution,
}

/// Body of `GET /{collection}/sync/{since}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<Document>,
    /// Server clock at which this delta was cut; the next checkpoint
    pub timestamp: i64,
    #[serde(default)]
    pub conflicts: Vec<ConflictItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_resolution_tag_is_preserved() {
        let resolution: Resolution = serde_json::from_value(json!("last_writer_wins")).unwrap();
        assert_eq!(
            resolution,
            Resolution::Unrecognized("last_writer_wins".to_string())
        );
        assert_eq!(serde_json::to_value(&resolution).unwrap(), json!("last_writer_wins"));
    }

    #[test]
    fn test_pull_response_conflicts_default_empty() {
        let response: PullResponse =
            serde_json::from_value(json!({"changes": [], "timestamp": 10})).unwrap();
        assert!(response.conflicts.is_empty());
        assert_eq!(response.timestamp, 10);
    }
}
