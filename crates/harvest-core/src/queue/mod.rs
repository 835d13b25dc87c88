//! Field capture: validate scans and check-ins, then queue them for sync.
//!
//! A scan that fails validation never reaches the queue. The rejection is
//! logged and returned so the scanner can tell the runner straight away.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{
    AttendanceRecord, BucketRecord, Picker, PickerStatus, PickerStatusChange, QualityGrade,
    QueueEntry, QueueEntryId, QueueOperation,
};
use crate::services::DatabaseService;
use crate::util::{day_of, now_millis};
use crate::{Error, Result};

/// Default tolerance between the scan timestamp and the device clock.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_MS: i64 = 5 * 60 * 1000;

/// Why a scan was refused before it was queued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanRejection {
    #[error("no picker with code '{0}' on this orchard")]
    UnknownPicker(String),

    #[error("picker {picker} is archived")]
    PickerArchived { picker: String },

    #[error("picker {picker} is {status} and cannot be credited buckets")]
    PickerNotAccepting { picker: String, status: PickerStatus },

    #[error("picker {picker} has not checked in on {date}")]
    NotCheckedIn { picker: String, date: NaiveDate },

    #[error("scan time is {skew_ms} ms away from the device clock (tolerance {tolerance_ms} ms)")]
    ClockSkew { skew_ms: i64, tolerance_ms: i64 },
}

/// Acceptance rules for new bucket scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGuard {
    clock_skew_tolerance_ms: i64,
}

impl Default for ScanGuard {
    fn default() -> Self {
        Self {
            clock_skew_tolerance_ms: DEFAULT_CLOCK_SKEW_TOLERANCE_MS,
        }
    }
}

impl ScanGuard {
    pub const fn new(clock_skew_tolerance_ms: i64) -> Self {
        Self {
            clock_skew_tolerance_ms: clock_skew_tolerance_ms.abs(),
        }
    }

    pub const fn clock_skew_tolerance_ms(&self) -> i64 {
        self.clock_skew_tolerance_ms
    }

    /// Check a scan of `picker` taken at `scanned_at` against the device
    /// clock `now`. `attendance` is the picker's record for the scan's day.
    pub fn check(
        &self,
        picker: &Picker,
        attendance: Option<&AttendanceRecord>,
        scanned_at: i64,
        now: i64,
    ) -> std::result::Result<(), ScanRejection> {
        if picker.is_archived() {
            return Err(ScanRejection::PickerArchived {
                picker: picker.picker_id.clone(),
            });
        }
        if !picker.status.accepts_buckets() {
            return Err(ScanRejection::PickerNotAccepting {
                picker: picker.picker_id.clone(),
                status: picker.status,
            });
        }

        let skew_ms = scanned_at.saturating_sub(now);
        if skew_ms.saturating_abs() > self.clock_skew_tolerance_ms {
            return Err(ScanRejection::ClockSkew {
                skew_ms,
                tolerance_ms: self.clock_skew_tolerance_ms,
            });
        }

        let date = day_of(scanned_at);
        let on_shift = attendance.is_some_and(|record| {
            record.date == date
                && record.check_in_time <= scanned_at
                && record.check_out_time.is_none_or(|out| scanned_at <= out)
        });
        if !on_shift {
            return Err(ScanRejection::NotCheckedIn {
                picker: picker.picker_id.clone(),
                date,
            });
        }

        Ok(())
    }
}

/// Result of an accepted scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReceipt {
    pub entry: QueueEntry,
    pub picker: Picker,
    /// The picker's payable buckets today, including this one
    pub total_buckets_today: u32,
}

/// Validates bucket scans and records them in the durable queue.
#[derive(Clone)]
pub struct BucketScanner {
    db: DatabaseService,
    guard: ScanGuard,
    orchard_id: String,
}

impl BucketScanner {
    pub fn new(db: DatabaseService, orchard_id: impl Into<String>, guard: ScanGuard) -> Self {
        Self {
            db,
            guard,
            orchard_id: orchard_id.into(),
        }
    }

    /// Scan a bucket for the picker with badge `code`, timestamped now.
    pub async fn scan(&self, code: &str, grade: QualityGrade) -> Result<ScanReceipt> {
        self.scan_at(code, grade, now_millis()).await
    }

    /// Scan a bucket with an explicit device timestamp.
    pub async fn scan_at(
        &self,
        code: &str,
        grade: QualityGrade,
        scanned_at: i64,
    ) -> Result<ScanReceipt> {
        let Some(picker) = self.db.find_picker_by_code(&self.orchard_id, code).await? else {
            return Err(self.reject(ScanRejection::UnknownPicker(code.trim().to_string())));
        };

        let attendance = self
            .db
            .attendance_for(&picker.id, day_of(scanned_at))
            .await?;
        if let Err(rejection) =
            self.guard
                .check(&picker, attendance.as_ref(), scanned_at, now_millis())
        {
            return Err(self.reject(rejection));
        }

        let record = BucketRecord::new(&picker.id, &self.orchard_id, grade, scanned_at);
        let payable = record.is_payable();
        let entry = self.db.enqueue(QueueOperation::BucketScan(record)).await?;

        let total_buckets_today = if payable {
            self.db.increment_picker_buckets(&picker.id).await?
        } else {
            picker.total_buckets_today
        };

        tracing::info!(
            "Queued {} bucket for {} ({} today)",
            grade,
            picker.picker_id,
            total_buckets_today
        );
        Ok(ScanReceipt {
            entry,
            picker: Picker {
                total_buckets_today,
                ..picker
            },
            total_buckets_today,
        })
    }

    fn reject(&self, rejection: ScanRejection) -> Error {
        tracing::warn!("Rejected scan on orchard {}: {}", self.orchard_id, rejection);
        Error::ScanRejected(rejection)
    }
}

/// Check a picker in and queue the attendance record.
///
/// Checking in twice on the same day returns the existing record and queues
/// nothing new.
pub async fn check_in(db: &DatabaseService, picker: &Picker, at: i64) -> Result<AttendanceRecord> {
    if picker.is_archived() {
        return Err(Error::InvalidInput(format!(
            "picker {} is archived and cannot check in",
            picker.picker_id
        )));
    }

    let record = AttendanceRecord::check_in(&picker.id, &picker.orchard_id, at);
    if !db.record_check_in(&record).await? {
        tracing::debug!("{} already checked in on {}", picker.picker_id, record.date);
        return db
            .attendance_for(&picker.id, record.date)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attendance for {}", picker.picker_id)));
    }

    db.enqueue(QueueOperation::AttendanceCheckIn(record.clone()))
        .await?;
    tracing::info!("Checked in {} on {}", picker.picker_id, record.date);
    Ok(record)
}

/// Check a picker out. Hours worked are stored on the picker.
pub async fn check_out(db: &DatabaseService, picker: &Picker, at: i64) -> Result<AttendanceRecord> {
    let date = day_of(at);
    if !db.record_check_out(&picker.id, date, at).await? {
        return Err(Error::NotFound(format!(
            "{} has no check-in on {date}",
            picker.picker_id
        )));
    }

    let record = db
        .attendance_for(&picker.id, date)
        .await?
        .ok_or_else(|| Error::NotFound(format!("attendance for {}", picker.picker_id)))?;
    db.set_picker_hours(&picker.id, record.hours_worked(at))
        .await?;
    Ok(record)
}

/// Record the end of a rest break (or the meal break when `meal` is set).
pub async fn record_break(db: &DatabaseService, picker: &Picker, ended_at: i64, meal: bool) -> Result<()> {
    let date = day_of(ended_at);
    if db.record_break(&picker.id, date, ended_at, meal).await? {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "{} has no check-in on {date}",
            picker.picker_id
        )))
    }
}

/// Change a picker's status locally and queue the change for sync.
pub async fn change_picker_status(
    db: &DatabaseService,
    picker: &Picker,
    status: PickerStatus,
) -> Result<QueueEntry> {
    if !db.set_picker_status(&picker.id, status).await? {
        return Err(Error::NotFound(format!("picker {}", picker.picker_id)));
    }

    let change = PickerStatusChange {
        id: QueueEntryId::new(),
        picker_id: picker.id.clone(),
        status,
    };
    match db.enqueue(QueueOperation::PickerStatusChange(change)).await {
        Ok(entry) => Ok(entry),
        Err(error) => {
            if let Err(undo) = db.set_picker_status(&picker.id, picker.status).await {
                tracing::error!(
                    "Failed to restore status of {} after enqueue error: {}",
                    picker.picker_id,
                    undo
                );
            }
            Err(error)
        }
    }
}
