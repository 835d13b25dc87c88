//! Daily attendance model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::queue_entry::QueueEntryId;
use crate::util::day_of;

/// One picker's attendance for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique identifier
    pub id: QueueEntryId,
    /// Picker row id
    pub picker_id: String,
    /// Orchard worked
    pub orchard_id: String,
    /// Calendar day of the shift
    pub date: NaiveDate,
    /// Check-in time (Unix ms)
    pub check_in_time: i64,
    /// Check-out time (Unix ms)
    pub check_out_time: Option<i64>,
    /// End of the most recent break (Unix ms)
    pub last_break_at: Option<i64>,
    /// Whether the meal break has been taken this shift
    #[serde(default)]
    pub meal_break_taken: bool,
}

impl AttendanceRecord {
    /// Check a picker in at `check_in_time`
    #[must_use]
    pub fn check_in(
        picker_id: impl Into<String>,
        orchard_id: impl Into<String>,
        check_in_time: i64,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            picker_id: picker_id.into(),
            orchard_id: orchard_id.into(),
            date: day_of(check_in_time),
            check_in_time,
            check_out_time: None,
            last_break_at: None,
            meal_break_taken: false,
        }
    }

    /// Hours on shift up to `now` (or check-out, if earlier).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hours_worked(&self, now: i64) -> f64 {
        let end = self.check_out_time.map_or(now, |out| out.min(now));
        let elapsed_ms = end.saturating_sub(self.check_in_time).max(0);
        elapsed_ms as f64 / 3_600_000.0
    }

    /// Minutes since the last break ended, or since check-in when none taken.
    #[must_use]
    pub fn minutes_since_break(&self, now: i64) -> i64 {
        let since = self.last_break_at.unwrap_or(self.check_in_time);
        now.saturating_sub(since).max(0) / 60_000
    }
}
