//! Shared database service wrapper used by the queue, sync and CLI layers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlQueueRepository, LibSqlRosterRepository, LibSqlSettingsRepository,
    QueueRepository, RosterRepository, SettingsRepository,
};
use crate::models::{
    AttendanceRecord, DeadLetterEntry, FailureInfo, HarvestSettings, Picker, PickerStatus,
    QueueEntry, QueueEntryId, QueueOperation,
};
use crate::{Error, Result};

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is
    /// created in its place.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {}. Quarantining and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the store, when it is not in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        // WAL and shared-memory sidecars belong to the quarantined file.
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local DB sidecar {}", path.display());
            }
        }

        Ok(())
    }

    async fn reopen_after_corruption(&self) -> Result<bool> {
        let Some(db_path) = self.db_path.clone() else {
            return Ok(false);
        };

        tracing::warn!(
            "Detected invalid local DB file; attempting to reopen connection at {}",
            db_path.display()
        );

        let mut db = self.db.lock().await;
        let placeholder = Database::open_in_memory().await?;
        drop(std::mem::replace(&mut *db, placeholder));

        Self::quarantine_corrupted_db_files(&db_path)?;
        *db = Database::open(&db_path).await?;
        Ok(true)
    }

    // Queue

    /// Durably append a mutation to the live queue.
    ///
    /// Replaying an operation whose record is already queued returns the
    /// stored entry; one that was dead-lettered is refused. Running out of space is reported as
    /// [`Error::StorageExhausted`] and nothing is recorded.
    pub async fn enqueue(&self, operation: QueueOperation) -> Result<QueueEntry> {
        let entry = QueueEntry::new(operation);

        let first_attempt = self.insert_entry(&entry).await;
        let result = match first_attempt {
            Err(error) if Self::is_corrupted_db_error(&error) => {
                if self.reopen_after_corruption().await? {
                    self.insert_entry(&entry).await
                } else {
                    Err(error)
                }
            }
            other => other,
        };

        match result {
            Ok(stored) => {
                tracing::debug!("Queued {} {}", stored.kind(), stored.id);
                Ok(stored)
            }
            Err(error) if error.is_storage_full() => {
                tracing::error!("Could not queue {} {}: {}", entry.kind(), entry.id, error);
                Err(Error::StorageExhausted(error.to_string()))
            }
            Err(error) => Err(error),
        }
    }

    async fn insert_entry(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        if let Some(existing) = repo.get(&entry.id).await? {
            return Ok(existing);
        }
        if repo.get_dead_letter(&entry.id).await?.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} {} is in the dead-letter queue; retry it from there",
                entry.kind(),
                entry.id
            )));
        }
        repo.insert(entry).await?;
        Ok(entry.clone())
    }

    /// Remove an entry from the live queue.
    pub async fn dequeue(&self, id: &QueueEntryId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.remove(id).await
    }

    /// Remove an entry the remote service has acknowledged.
    pub async fn mark_synced(&self, id: &QueueEntryId) -> Result<bool> {
        let removed = self.dequeue(id).await?;
        if removed {
            tracing::debug!("Synced {id}");
        }
        Ok(removed)
    }

    /// Record a failed attempt; returns the new retry count.
    pub async fn increment_retry(&self, id: &QueueEntryId, failure: &FailureInfo) -> Result<u32> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.increment_retry(id, failure).await
    }

    /// Give a live entry a fresh retry budget.
    pub async fn reset_retry(&self, id: &QueueEntryId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.reset_retry(id).await
    }

    /// Fetch a live entry.
    pub async fn get_entry(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get(id).await
    }

    /// Live entries in FIFO order.
    pub async fn pending_entries(&self) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list().await
    }

    /// Live entries that have failed at least once.
    pub async fn retried_entries(&self) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_retried().await
    }

    /// Number of live entries.
    pub async fn queue_len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.count().await
    }

    // Dead letters

    /// Dead-lettered entries, most recently moved first.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_dead_letters().await
    }

    /// Fetch a dead-lettered entry.
    pub async fn get_dead_letter(&self, id: &QueueEntryId) -> Result<Option<DeadLetterEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get_dead_letter(id).await
    }

    /// Number of dead-lettered entries.
    pub async fn dead_letter_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.count_dead_letters().await
    }

    /// Move an entry out of the live queue into the dead-letter store.
    pub async fn move_to_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.move_to_dead_letter(entry).await
    }

    /// Put a dead-lettered entry back at the end of the live queue.
    pub async fn restore_from_dead_letter(&self, id: &QueueEntryId) -> Result<QueueEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.restore_from_dead_letter(id).await
    }

    /// Drop an entry from both stores.
    pub async fn discard(&self, id: &QueueEntryId) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.discard(id).await
    }

    /// Drop every entry at or above `threshold` retries from both stores.
    pub async fn discard_at_least(&self, threshold: u32) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.discard_at_least(threshold).await
    }

    /// Empty both stores.
    pub async fn clear_queues(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.clear_all().await
    }

    // Roster

    /// Insert or replace a picker.
    pub async fn save_picker(&self, picker: &Picker) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.upsert_picker(picker).await
    }

    /// Fetch a picker by row id.
    pub async fn get_picker(&self, id: &str) -> Result<Option<Picker>> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.get_picker(id).await
    }

    /// Fetch a picker by badge code within an orchard.
    pub async fn find_picker_by_code(&self, orchard_id: &str, code: &str) -> Result<Option<Picker>> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.find_picker_by_code(orchard_id, code).await
    }

    /// An orchard's crew.
    pub async fn list_pickers(&self, orchard_id: &str) -> Result<Vec<Picker>> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.list_pickers(orchard_id).await
    }

    /// Change a picker's status locally.
    pub async fn set_picker_status(&self, id: &str, status: PickerStatus) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.set_picker_status(id, status).await
    }

    /// Credit a bucket to a picker; returns the new daily total.
    pub async fn increment_picker_buckets(&self, id: &str) -> Result<u32> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.increment_buckets(id).await
    }

    /// Store a picker's hours for today.
    pub async fn set_picker_hours(&self, id: &str, hours: f64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.set_hours(id, hours).await
    }

    /// Record a check-in; false when the picker already checked in that day.
    pub async fn record_check_in(&self, record: &AttendanceRecord) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.record_check_in(record).await
    }

    /// Record a check-out.
    pub async fn record_check_out(&self, picker_id: &str, date: NaiveDate, at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.record_check_out(picker_id, date, at).await
    }

    /// Record the end of a rest or meal break.
    pub async fn record_break(
        &self,
        picker_id: &str,
        date: NaiveDate,
        ended_at: i64,
        meal: bool,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.record_break(picker_id, date, ended_at, meal).await
    }

    /// A picker's attendance on one day.
    pub async fn attendance_for(
        &self,
        picker_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.get_attendance(picker_id, date).await
    }

    /// An orchard's attendance on one day.
    pub async fn attendance_on(&self, orchard_id: &str, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRosterRepository::new(db.connection());
        repo.list_attendance(orchard_id, date).await
    }

    // Settings

    /// Cached harvest settings for an orchard.
    pub async fn load_harvest_settings(&self, orchard_id: &str) -> Result<HarvestSettings> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.load(orchard_id).await
    }

    /// Replace the cached harvest settings.
    pub async fn save_harvest_settings(&self, settings: &HarvestSettings) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.save(settings).await
    }

    /// End of the last successful drain (Unix ms).
    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.last_sync_at().await
    }

    /// Record the end of a successful drain.
    pub async fn set_last_sync_at(&self, timestamp: i64) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.set_last_sync_at(timestamp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BucketRecord, QualityGrade};
    use tempfile::tempdir;

    fn scan(picker: &str) -> QueueOperation {
        QueueOperation::BucketScan(BucketRecord::new(
            picker,
            "orchard-1",
            QualityGrade::A,
            1_000,
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_and_mark_synced_roundtrip() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        let entry = service.enqueue(scan("picker-1")).await.unwrap();
        assert_eq!(service.queue_len().await.unwrap(), 1);

        assert!(service.mark_synced(&entry.id).await.unwrap());
        assert!(!service.mark_synced(&entry.id).await.unwrap());
        assert_eq!(service.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_refuses_dead_lettered_record() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let operation = scan("picker-1");
        let entry = service.enqueue(operation.clone()).await.unwrap();
        service
            .move_to_dead_letter(&DeadLetterEntry::from_queue_entry(entry.clone(), None, 2_000))
            .await
            .unwrap();

        let replay = service.enqueue(operation).await;

        assert!(matches!(replay, Err(Error::InvalidInput(_))));
        assert!(service.get_entry(&entry.id).await.unwrap().is_none());
        assert_eq!(service.dead_letter_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_same_operation_twice_keeps_one_entry() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        let operation = scan("picker-1");
        let first = service.enqueue(operation.clone()).await.unwrap();
        service
            .increment_retry(
                &first.id,
                &FailureInfo {
                    code: None,
                    message: "offline".to_string(),
                },
            )
            .await
            .unwrap();

        let second = service.enqueue(operation).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.retry_count, 1);
        assert_eq!(service.queue_len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_reports_storage_exhaustion() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        {
            let db = service.db.lock().await;
            // Caps the store at its current size.
            db.connection()
                .query("PRAGMA max_page_count = 1", ())
                .await
                .unwrap();
        }

        let mut stored = 0;
        let mut failure = None;
        for index in 0..2_000 {
            match service.enqueue(scan(&format!("picker-{index}"))).await {
                Ok(_) => stored += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        assert!(matches!(failure, Some(Error::StorageExhausted(_))));
        assert_eq!(service.queue_len().await.unwrap(), stored);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_recovers_from_corrupted_file() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("harvest.db");
        std::fs::write(&db_path, vec![0xAB_u8; 8192]).unwrap();

        let service = DatabaseService::open_path(&db_path).await.unwrap();
        service.enqueue(scan("picker-1")).await.unwrap();
        assert_eq!(service.queue_len().await.unwrap(), 1);

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("harvest.db.corrupt-")
            });
        assert!(quarantined);
    }

    #[test]
    fn detects_corrupted_db_errors() {
        assert!(DatabaseService::is_corrupted_db_error(&Error::Database(
            "SQLite failure: file is not a database".to_string()
        )));
        assert!(!DatabaseService::is_corrupted_db_error(&Error::InvalidInput(
            "picker code cannot be empty".to_string()
        )));
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("harvest.db");
        let wal_path = tmp.path().join("harvest.db-wal");
        let shm_path = tmp.path().join("harvest.db-shm");

        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();
        std::fs::write(&shm_path, b"shm").unwrap();

        DatabaseService::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        assert!(!shm_path.exists());
        let found_backup = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("harvest.db.corrupt-")
            });
        assert!(found_backup);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn roster_and_settings_through_service() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        let picker = Picker::new("P-7", "Mere", "orchard-1");
        service.save_picker(&picker).await.unwrap();
        assert_eq!(service.increment_picker_buckets(&picker.id).await.unwrap(), 1);
        assert_eq!(service.list_pickers("orchard-1").await.unwrap().len(), 1);

        let settings = HarvestSettings {
            piece_rate: 8.0,
            ..HarvestSettings::for_orchard("orchard-1")
        };
        service.save_harvest_settings(&settings).await.unwrap();
        assert_eq!(
            service.load_harvest_settings("orchard-1").await.unwrap(),
            settings
        );
    }
}
