//! Picker model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a picker on the crew roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PickerStatus {
    #[default]
    Active,
    Inactive,
    Archived,
    Break,
    Issue,
}

impl PickerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
            Self::Break => "break",
            Self::Issue => "issue",
        }
    }

    /// Whether new buckets may be credited to a picker in this status.
    #[must_use]
    pub const fn accepts_buckets(self) -> bool {
        matches!(self, Self::Active | Self::Break | Self::Issue)
    }
}

impl fmt::Display for PickerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PickerStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "archived" => Ok(Self::Archived),
            "break" | "on_break" => Ok(Self::Break),
            "issue" => Ok(Self::Issue),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown picker status '{other}'"
            ))),
        }
    }
}

/// A picker on an orchard crew
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Picker {
    /// Row identifier
    pub id: String,
    /// External badge code printed on the picker's card
    pub picker_id: String,
    /// Display name
    pub name: String,
    /// Row currently being picked
    pub current_row: i64,
    /// Payable buckets credited today
    pub total_buckets_today: u32,
    /// Hours worked today
    pub hours: f64,
    /// Roster status
    pub status: PickerStatus,
    /// Completed safety induction
    pub safety_verified: bool,
    /// Orchard the picker belongs to
    pub orchard_id: String,
    /// Supervising team leader, if assigned
    pub team_leader_id: Option<String>,
}

impl Picker {
    /// Create an active picker with no work recorded yet
    #[must_use]
    pub fn new(
        picker_id: impl Into<String>,
        name: impl Into<String>,
        orchard_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            picker_id: picker_id.into().trim().to_string(),
            name: name.into().trim().to_string(),
            current_row: 0,
            total_buckets_today: 0,
            hours: 0.0,
            status: PickerStatus::Active,
            safety_verified: false,
            orchard_id: orchard_id.into(),
            team_leader_id: None,
        }
    }

    #[must_use]
    pub const fn is_archived(&self) -> bool {
        matches!(self.status, PickerStatus::Archived)
    }
}
