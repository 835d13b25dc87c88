//! Live queue and dead-letter repository implementation

use libsql::{Connection, Row, Value};

use crate::error::{Error, Result};
use crate::models::{DeadLetterEntry, FailureInfo, QueueEntry, QueueEntryId, QueueOperation};

const QUEUE_COLUMNS: &str =
    "id, kind, payload, created_at, retry_count, last_error_code, last_error_message";
const DEAD_LETTER_COLUMNS: &str =
    "id, kind, payload, created_at, retry_count, failure_reason, error_code, moved_at";

/// Trait for the two on-device queue tables: the live queue and the
/// dead-letter store.
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append an entry to the back of the live queue
    async fn insert(&self, entry: &QueueEntry) -> Result<()>;

    /// Get a live entry by ID
    async fn get(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>>;

    /// List live entries in insertion order
    async fn list(&self) -> Result<Vec<QueueEntry>>;

    /// List live entries that have failed at least once
    async fn list_retried(&self) -> Result<Vec<QueueEntry>>;

    /// Number of live entries
    async fn count(&self) -> Result<usize>;

    /// Remove a live entry; returns whether it existed
    async fn remove(&self, id: &QueueEntryId) -> Result<bool>;

    /// Bump the retry counter and record the failure; returns the new count
    async fn increment_retry(&self, id: &QueueEntryId, failure: &FailureInfo) -> Result<u32>;

    /// Reset a live entry's retry counter to zero
    async fn reset_retry(&self, id: &QueueEntryId) -> Result<bool>;

    /// Get a dead-lettered entry by ID
    async fn get_dead_letter(&self, id: &QueueEntryId) -> Result<Option<DeadLetterEntry>>;

    /// List dead-lettered entries, most recently moved first
    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>>;

    /// Number of dead-lettered entries
    async fn count_dead_letters(&self) -> Result<usize>;

    /// Atomically insert into the dead-letter store and delete from the live queue
    async fn move_to_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Atomically delete from the dead-letter store and re-append to the live
    /// queue with a zero retry count
    async fn restore_from_dead_letter(&self, id: &QueueEntryId) -> Result<QueueEntry>;

    /// Remove an entry from both stores; returns how many rows went away
    async fn discard(&self, id: &QueueEntryId) -> Result<u64>;

    /// Remove every entry with `retry_count >= threshold` from both stores
    async fn discard_at_least(&self, threshold: u32) -> Result<u64>;

    /// Empty both stores
    async fn clear_all(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_entries(&self, sql: &str) -> Result<Vec<QueueEntry>> {
        let mut rows = self.conn.query(sql, ()).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn count_rows(&self, table: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| Error::Database(format!("negative count in {table}")))
    }

    async fn insert_live(&self, entry: &QueueEntry) -> Result<()> {
        let payload = entry.operation.payload()?.to_string();
        let (code, message) = match &entry.last_error {
            Some(failure) => (
                optional_text(failure.code.as_deref()),
                Value::Text(failure.message.clone()),
            ),
            None => (Value::Null, Value::Null),
        };

        self.conn
            .execute(
                "INSERT INTO sync_queue
                    (id, kind, payload, created_at, retry_count, last_error_code, last_error_message)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    entry.id.as_str(),
                    entry.kind(),
                    payload,
                    entry.timestamp,
                    i64::from(entry.retry_count),
                    code,
                    message
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_dead(&self, entry: &DeadLetterEntry) -> Result<()> {
        let payload = entry.operation.payload()?.to_string();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO dead_letter_queue
                    (id, kind, payload, created_at, retry_count, failure_reason, error_code, moved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    entry.id.as_str(),
                    entry.operation.kind(),
                    payload,
                    entry.timestamp,
                    i64::from(entry.retry_count),
                    entry.failure_reason.clone(),
                    entry.error_code.clone(),
                    entry.moved_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn rollback(&self, error: Error) -> Error {
        self.conn.execute("ROLLBACK", ()).await.ok();
        error
    }

    /// Parse a live entry from a row selected with `QUEUE_COLUMNS`
    fn parse_entry(row: &Row) -> Result<QueueEntry> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let last_error = optional_string(row, 6)?.map(|message| FailureInfo {
            code: optional_string(row, 5).ok().flatten(),
            message,
        });

        Ok(QueueEntry {
            id: parse_id(&id)?,
            operation: QueueOperation::from_parts(&kind, &payload)?,
            timestamp: row.get(3)?,
            retry_count: parse_count(row.get::<i64>(4)?)?,
            last_error,
        })
    }

    /// Parse a dead-letter entry from a row selected with `DEAD_LETTER_COLUMNS`
    fn parse_dead_letter(row: &Row) -> Result<DeadLetterEntry> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(2)?;

        Ok(DeadLetterEntry {
            id: parse_id(&id)?,
            operation: QueueOperation::from_parts(&kind, &payload)?,
            timestamp: row.get(3)?,
            retry_count: parse_count(row.get::<i64>(4)?)?,
            failure_reason: row.get(5)?,
            error_code: row.get(6)?,
            moved_at: row.get(7)?,
        })
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        self.insert_live(entry).await
    }

    async fn get(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<QueueEntry>> {
        self.query_entries(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY seq ASC"
        ))
        .await
    }

    async fn list_retried(&self) -> Result<Vec<QueueEntry>> {
        self.query_entries(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE retry_count > 0 ORDER BY seq ASC"
        ))
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.count_rows("sync_queue").await
    }

    async fn remove(&self, id: &QueueEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn increment_retry(&self, id: &QueueEntryId, failure: &FailureInfo) -> Result<u32> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET retry_count = retry_count + 1, last_error_code = ?, last_error_message = ?
                 WHERE id = ?",
                libsql::params![
                    optional_text(failure.code.as_deref()),
                    failure.message.clone(),
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(id)
            .await?
            .map(|entry| entry.retry_count)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn reset_retry(&self, id: &QueueEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET retry_count = 0, last_error_code = NULL, last_error_message = NULL
                 WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn get_dead_letter(&self, id: &QueueEntryId) -> Result<Option<DeadLetterEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_queue WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_dead_letter(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_queue ORDER BY moved_at DESC, id ASC"
                ),
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_dead_letter(&row)?);
        }
        Ok(entries)
    }

    async fn count_dead_letters(&self) -> Result<usize> {
        self.count_rows("dead_letter_queue").await
    }

    async fn move_to_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(error) = self.insert_dead(entry).await {
            return Err(self.rollback(error).await);
        }
        if let Err(error) = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [entry.id.as_str()])
            .await
        {
            return Err(self.rollback(error.into()).await);
        }
        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            return Err(self.rollback(error.into()).await);
        }

        Ok(())
    }

    async fn restore_from_dead_letter(&self, id: &QueueEntryId) -> Result<QueueEntry> {
        let dead = self
            .get_dead_letter(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let entry = dead.into_queue_entry();

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(error) = self
            .conn
            .execute("DELETE FROM dead_letter_queue WHERE id = ?", [id.as_str()])
            .await
        {
            return Err(self.rollback(error.into()).await);
        }
        // A stale live copy would violate the unique id; the restored entry replaces it.
        if let Err(error) = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await
        {
            return Err(self.rollback(error.into()).await);
        }
        if let Err(error) = self.insert_live(&entry).await {
            return Err(self.rollback(error).await);
        }
        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            return Err(self.rollback(error.into()).await);
        }

        Ok(entry)
    }

    async fn discard(&self, id: &QueueEntryId) -> Result<u64> {
        let live = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await?;
        let dead = self
            .conn
            .execute("DELETE FROM dead_letter_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(live + dead)
    }

    async fn discard_at_least(&self, threshold: u32) -> Result<u64> {
        let threshold = i64::from(threshold);
        let live = self
            .conn
            .execute("DELETE FROM sync_queue WHERE retry_count >= ?", [threshold])
            .await?;
        let dead = self
            .conn
            .execute(
                "DELETE FROM dead_letter_queue WHERE retry_count >= ?",
                [threshold],
            )
            .await?;
        Ok(live + dead)
    }

    async fn clear_all(&self) -> Result<u64> {
        let live = self.conn.execute("DELETE FROM sync_queue", ()).await?;
        let dead = self.conn.execute("DELETE FROM dead_letter_queue", ()).await?;
        Ok(live + dead)
    }
}

pub(crate) fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub(crate) fn optional_string(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Text(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

pub(crate) fn optional_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Integer(value) => Ok(Some(value)),
        _ => Ok(None),
    }
}

fn parse_id(raw: &str) -> Result<QueueEntryId> {
    raw.parse()
        .map_err(|_| Error::Database(format!("invalid queue entry id '{raw}'")))
}

fn parse_count(raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| Error::Database(format!("invalid retry count {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{BucketRecord, QualityGrade};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn scan_entry(picker: &str) -> QueueEntry {
        QueueEntry::new(QueueOperation::BucketScan(BucketRecord::new(
            picker,
            "orchard-1",
            QualityGrade::A,
            1_000,
        )))
    }

    fn failure(code: &str) -> FailureInfo {
        FailureInfo {
            code: Some(code.to_string()),
            message: format!("failed with {code}"),
        }
    }

    async fn set_retry_count(db: &Database, id: &QueueEntryId, count: i64) {
        db.connection()
            .execute(
                "UPDATE sync_queue SET retry_count = ? WHERE id = ?",
                libsql::params![count, id.as_str()],
            )
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_list_fifo() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = scan_entry("picker-1");
        let second = scan_entry("picker-2");
        let third = scan_entry("picker-3");
        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();
        repo.insert(&third).await.unwrap();

        let ids = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_roundtrips_operation() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let entry = scan_entry("picker-1");
        repo.insert(&entry).await.unwrap();

        let fetched = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_retry_records_failure() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let entry = scan_entry("picker-1");
        repo.insert(&entry).await.unwrap();

        assert_eq!(repo.increment_retry(&entry.id, &failure("08006")).await.unwrap(), 1);
        assert_eq!(repo.increment_retry(&entry.id, &failure("23505")).await.unwrap(), 2);

        let fetched = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.retry_count, 2);
        assert_eq!(fetched.last_error, Some(failure("23505")));
        assert_eq!(repo.list_retried().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_retry_missing_entry() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let result = repo.increment_retry(&QueueEntryId::new(), &failure("x")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_move_to_dead_letter_is_exclusive() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let entry = scan_entry("picker-1");
        repo.insert(&entry).await.unwrap();
        set_retry_count(&db, &entry.id, 50).await;
        let live = repo.get(&entry.id).await.unwrap().unwrap();

        let dead = DeadLetterEntry::from_queue_entry(live, Some(failure("23503")), 5_000);
        repo.move_to_dead_letter(&dead).await.unwrap();

        assert!(repo.get(&entry.id).await.unwrap().is_none());
        let stored = repo.get_dead_letter(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 50);
        assert_eq!(stored.error_code, "23503");
        assert_eq!(repo.count_dead_letters().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_from_dead_letter_appends_fresh_entry() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let stuck = scan_entry("picker-1");
        let waiting = scan_entry("picker-2");
        repo.insert(&stuck).await.unwrap();
        repo.insert(&waiting).await.unwrap();
        set_retry_count(&db, &stuck.id, 60).await;

        let live = repo.get(&stuck.id).await.unwrap().unwrap();
        repo.move_to_dead_letter(&DeadLetterEntry::from_queue_entry(live, None, 1))
            .await
            .unwrap();

        let restored = repo.restore_from_dead_letter(&stuck.id).await.unwrap();
        assert_eq!(restored.retry_count, 0);
        assert_eq!(restored.operation, stuck.operation);
        assert!(repo.get_dead_letter(&stuck.id).await.unwrap().is_none());

        // Restored entries rejoin at the back of the queue.
        let ids = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![waiting.id, stuck.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_missing_dead_letter() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let result = repo.restore_from_dead_letter(&QueueEntryId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_at_least_spares_lower_counts() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let critical_live = scan_entry("a");
        let warning_live = scan_entry("b");
        let critical_dead = scan_entry("c");
        let recent_dead = scan_entry("d");
        for entry in [&critical_live, &warning_live, &critical_dead, &recent_dead] {
            repo.insert(entry).await.unwrap();
        }
        set_retry_count(&db, &critical_live.id, 50).await;
        set_retry_count(&db, &warning_live.id, 49).await;
        set_retry_count(&db, &critical_dead.id, 75).await;
        set_retry_count(&db, &recent_dead.id, 3).await;
        for id in [&critical_dead.id, &recent_dead.id] {
            let live = repo.get(id).await.unwrap().unwrap();
            repo.move_to_dead_letter(&DeadLetterEntry::from_queue_entry(live, None, 1))
                .await
                .unwrap();
        }

        assert_eq!(repo.discard_at_least(50).await.unwrap(), 2);

        assert!(repo.get(&critical_live.id).await.unwrap().is_none());
        assert!(repo.get_dead_letter(&critical_dead.id).await.unwrap().is_none());
        assert_eq!(repo.get(&warning_live.id).await.unwrap().unwrap().retry_count, 49);
        assert_eq!(
            repo.get_dead_letter(&recent_dead.id).await.unwrap().unwrap().retry_count,
            3
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_and_clear_all() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = scan_entry("a");
        let second = scan_entry("b");
        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();

        assert_eq!(repo.discard(&first.id).await.unwrap(), 1);
        assert_eq!(repo.discard(&first.id).await.unwrap(), 0);
        assert_eq!(repo.clear_all().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_retry_clears_failure() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let entry = scan_entry("a");
        repo.insert(&entry).await.unwrap();
        repo.increment_retry(&entry.id, &failure("08006")).await.unwrap();

        assert!(repo.reset_retry(&entry.id).await.unwrap());
        let fetched = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.retry_count, 0);
        assert!(fetched.last_error.is_none());
    }
}
