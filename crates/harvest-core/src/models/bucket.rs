//! Bucket record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::queue_entry::QueueEntryId;

/// Fruit quality grade assigned at the bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityGrade {
    A,
    B,
    C,
    #[serde(rename = "reject")]
    Reject,
}

impl QualityGrade {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityGrade {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            "C" | "c" => Ok(Self::C),
            value if value.eq_ignore_ascii_case("reject") => Ok(Self::Reject),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown quality grade '{other}'"
            ))),
        }
    }
}

/// A scanned bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// Unique identifier (also the queue entry id and remote primary key)
    pub id: QueueEntryId,
    /// Picker row id
    pub picker_id: String,
    /// Quality grade
    pub quality_grade: QualityGrade,
    /// Scan time on the device (Unix ms)
    pub timestamp: i64,
    /// Orchard the bucket was picked in
    pub orchard_id: String,
    /// Whether the remote service has acknowledged the record
    #[serde(default)]
    pub synced: bool,
}

impl BucketRecord {
    /// Create an unsynced record for a scan taken at `timestamp`
    #[must_use]
    pub fn new(
        picker_id: impl Into<String>,
        orchard_id: impl Into<String>,
        quality_grade: QualityGrade,
        timestamp: i64,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            picker_id: picker_id.into(),
            quality_grade,
            timestamp,
            orchard_id: orchard_id.into(),
            synced: false,
        }
    }

    /// Rejected fruit is recorded but does not count toward piece-rate pay.
    #[must_use]
    pub const fn is_payable(&self) -> bool {
        !matches!(self.quality_grade, QualityGrade::Reject)
    }
}
