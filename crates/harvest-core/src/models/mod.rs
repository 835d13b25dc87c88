//! Data models for HarvestPro

mod attendance;
mod bucket;
mod dead_letter;
mod picker;
mod queue_entry;
mod settings;

pub use attendance::AttendanceRecord;
pub use bucket::{BucketRecord, QualityGrade};
pub use dead_letter::{DeadLetterEntry, MAX_RETRIES_EXCEEDED};
pub use picker::{Picker, PickerStatus};
pub use queue_entry::{FailureInfo, PickerStatusChange, QueueEntry, QueueEntryId, QueueOperation};
pub use settings::HarvestSettings;
