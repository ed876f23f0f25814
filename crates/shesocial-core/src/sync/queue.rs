//! Queue policy: retry backoff, batch selection and outcome transitions.
//!
//! Everything here is pure; the local store applies the resulting
//! transitions to durable storage.

use crate::models::QueueItem;

const MINUTE_MS: i64 = 60_000;
/// Backoff never exceeds 30 minutes
const MAX_BACKOFF_MINUTES: i64 = 30;
/// 2^5 already exceeds the cap
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Minimum wait after the last attempt before an item with `retries`
/// failures is eligible again.
pub const fn backoff_delay_ms(retries: u32) -> i64 {
    if retries == 0 {
        return 0;
    }
    let exponent = if retries > MAX_BACKOFF_EXPONENT {
        MAX_BACKOFF_EXPONENT
    } else {
        retries
    };
    let minutes = 1_i64 << exponent;
    let minutes = if minutes > MAX_BACKOFF_MINUTES {
        MAX_BACKOFF_MINUTES
    } else {
        minutes
    };
    minutes * MINUTE_MS
}

pub const fn is_eligible(item: &QueueItem, now: i64) -> bool {
    now - item.timestamp >= backoff_delay_ms(item.retries)
}

/// Eligible items ordered high priority first, then oldest first.
pub fn select_batch(items: Vec<QueueItem>, now: i64, limit: usize) -> Vec<QueueItem> {
    let mut eligible: Vec<QueueItem> = items
        .into_iter()
        .filter(|item| is_eligible(item, now))
        .collect();
    eligible.sort_by_key(|item| (item.priority.rank(), item.timestamp, item.id));
    eligible.truncate(limit);
    eligible
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble or server error; try again later
    Retryable,
    /// The server rejected the request itself
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Succeeded,
    Terminal,
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueTransition {
    /// Keep the item with its bumped retry count
    Retry(QueueItem),
    Removed(RemovalReason),
}

/// Compute what happens to `item` after an attempt.
pub fn apply_outcome(item: QueueItem, outcome: Outcome, now: i64) -> QueueTransition {
    match outcome {
        Outcome::Succeeded => QueueTransition::Removed(RemovalReason::Succeeded),
        Outcome::Failed {
            kind: FailureKind::Terminal,
            ..
        } => QueueTransition::Removed(RemovalReason::Terminal),
        Outcome::Failed {
            kind: FailureKind::Retryable,
            message,
        } => {
            let retries = item.retries.saturating_add(1);
            if retries >= item.priority.max_retries() {
                return QueueTransition::Removed(RemovalReason::RetriesExhausted);
            }
            QueueTransition::Retry(QueueItem {
                retries,
                last_error: Some(message),
                timestamp: now,
                ..item
            })
        }
    }
}
