//! Sync queue models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::document::{Collection, Document};
use crate::error::Error;

/// Kind of mutation a queue item replays against the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation `{other}`"))),
        }
    }
}

/// Business importance of a queued mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Attempts allowed before the item is abandoned.
    pub const fn max_retries(self) -> u32 {
        match self {
            Self::High => 10,
            Self::Medium => 5,
            Self::Low => 3,
        }
    }

    /// Sort key, lower drains first.
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(Error::InvalidInput(format!("unknown priority `{other}`"))),
        }
    }
}

/// A mutation waiting to be acknowledged by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Local sequence number
    pub id: i64,
    pub collection: Collection,
    pub operation: Operation,
    /// Full document payload (for deletes, the last known copy)
    pub data: Document,
    /// Enqueue time, re-stamped on every failed attempt (Unix ms)
    pub timestamp: i64,
    pub retries: u32,
    pub last_error: Option<String>,
    pub priority: Priority,
}

/// Queue item before it has been assigned a sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub collection: Collection,
    pub operation: Operation,
    pub data: Document,
    pub priority: Priority,
}

impl NewQueueItem {
    pub const fn new(
        collection: Collection,
        operation: Operation,
        data: Document,
        priority: Priority,
    ) -> Self {
        Self {
            collection,
            operation,
            data,
            priority,
        }
    }
}

/// Abandoned high-priority mutation kept for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    pub id: i64,
    pub queue_item_id: i64,
    pub collection: Collection,
    pub operation: Operation,
    pub data: Document,
    pub priority: Priority,
    pub retries: u32,
    pub last_error: Option<String>,
    pub failed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_retries_by_priority() {
        assert_eq!(Priority::High.max_retries(), 10);
        assert_eq!(Priority::Medium.max_retries(), 5);
        assert_eq!(Priority::Low.max_retries(), 3);
    }

    #[test]
    fn test_priority_rank_orders_high_first() {
        let mut priorities = [Priority::Low, Priority::High, Priority::Medium];
        priorities.sort_by_key(|priority| priority.rank());
        assert_eq!(priorities, [Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_operation_roundtrip_str() {
        for operation in [Operation::Insert, Operation::Update, Operation::Delete] {
            assert_eq!(operation.as_str().parse::<Operation>().unwrap(), operation);
        }
    }
}
