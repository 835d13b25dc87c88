//! Dead-letter entry model

use serde::{Deserialize, Serialize};

use super::queue_entry::{FailureInfo, QueueEntry, QueueEntryId, QueueOperation};

/// Error code recorded when an entry is moved without a backend code.
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";

/// A queue entry that exhausted its retries and awaits operator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Same id as the original queue entry
    pub id: QueueEntryId,
    /// The operation that kept failing
    pub operation: QueueOperation,
    /// Original creation timestamp (Unix ms)
    pub timestamp: i64,
    /// Retry count at the time of the move
    pub retry_count: u32,
    /// Human-oriented failure description
    pub failure_reason: String,
    /// Machine-readable error code
    pub error_code: String,
    /// When the entry left the live queue (Unix ms)
    pub moved_at: i64,
}

impl DeadLetterEntry {
    /// Build a dead-letter entry from a live entry, keeping its retry count.
    #[must_use]
    pub fn from_queue_entry(entry: QueueEntry, failure: Option<FailureInfo>, moved_at: i64) -> Self {
        let failure = failure.or(entry.last_error);
        let (error_code, failure_reason) = match failure {
            Some(info) => (
                info.code.unwrap_or_else(|| MAX_RETRIES_EXCEEDED.to_string()),
                info.message,
            ),
            None => (
                MAX_RETRIES_EXCEEDED.to_string(),
                format!("gave up after {} failed attempts", entry.retry_count),
            ),
        };

        Self {
            id: entry.id,
            operation: entry.operation,
            timestamp: entry.timestamp,
            retry_count: entry.retry_count,
            failure_reason,
            error_code,
            moved_at,
        }
    }

    /// Demote back to a live entry with a fresh retry budget.
    #[must_use]
    pub fn into_queue_entry(self) -> QueueEntry {
        QueueEntry {
            id: self.id,
            operation: self.operation,
            timestamp: self.timestamp,
            retry_count: 0,
            last_error: None,
        }
    }
}
