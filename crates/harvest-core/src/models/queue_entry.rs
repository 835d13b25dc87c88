//! Queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::attendance::AttendanceRecord;
use super::bucket::BucketRecord;
use super::picker::PickerStatus;

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable).
///
/// The same id is used as the remote primary key so that a replayed write
/// lands on the row it already created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status change for a picker, applied remotely as a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickerStatusChange {
    /// Change identifier
    pub id: QueueEntryId,
    /// Picker row id
    pub picker_id: String,
    /// New status
    pub status: PickerStatus,
}

/// A mutation waiting to be written to the remote data service.
///
/// Each variant maps to exactly one create/update call against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueOperation {
    /// A scanned bucket
    BucketScan(BucketRecord),
    /// A picker checking in for the day
    AttendanceCheckIn(AttendanceRecord),
    /// A picker status change (archive, break, issue, ...)
    PickerStatusChange(PickerStatusChange),
}

impl QueueOperation {
    /// Operation kind as persisted in the queue's `kind` column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BucketScan(_) => "bucket_scan",
            Self::AttendanceCheckIn(_) => "attendance_check_in",
            Self::PickerStatusChange(_) => "picker_status_change",
        }
    }

    /// Remote resource (table) this operation writes to.
    #[must_use]
    pub const fn resource(&self) -> &'static str {
        match self {
            Self::BucketScan(_) => "bucket_records",
            Self::AttendanceCheckIn(_) => "daily_attendance",
            Self::PickerStatusChange(_) => "pickers",
        }
    }

    /// Identifier of the record the operation creates or updates.
    #[must_use]
    pub const fn record_id(&self) -> QueueEntryId {
        match self {
            Self::BucketScan(record) => record.id,
            Self::AttendanceCheckIn(record) => record.id,
            Self::PickerStatusChange(change) => change.id,
        }
    }

    /// The `payload` half of the tagged representation.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::BucketScan(record) => serde_json::to_value(record),
            Self::AttendanceCheckIn(record) => serde_json::to_value(record),
            Self::PickerStatusChange(change) => serde_json::to_value(change),
        }
    }

    /// Rebuild an operation from its persisted kind and payload.
    pub fn from_parts(kind: &str, payload: &str) -> crate::Result<Self> {
        let value = serde_json::json!({
            "type": kind,
            "payload": serde_json::from_str::<serde_json::Value>(payload)?,
        });
        Ok(serde_json::from_value(value)?)
    }
}

/// Last failure recorded against an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Backend error code (e.g. `23505`), when the service supplied one
    pub code: Option<String>,
    /// Raw error message
    pub message: String,
}

/// A pending mutation in the local durable queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier, shared with the remote record
    pub id: QueueEntryId,
    /// What to write
    pub operation: QueueOperation,
    /// Creation timestamp (Unix ms)
    pub timestamp: i64,
    /// Failed sync attempts so far
    pub retry_count: u32,
    /// Most recent sync failure
    pub last_error: Option<FailureInfo>,
}

impl QueueEntry {
    /// Create a fresh entry for the given operation
    #[must_use]
    pub fn new(operation: QueueOperation) -> Self {
        Self {
            id: operation.record_id(),
            operation,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Operation kind shortcut
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.operation.kind()
    }
}
