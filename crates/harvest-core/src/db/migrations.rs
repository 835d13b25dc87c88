//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run a migration's statements in one transaction.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Migration to version 1: live queue, dead-letter store and key/value settings
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // seq gives FIFO order; re-inserted entries go to the back
            "CREATE TABLE IF NOT EXISTS sync_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
                last_error_code TEXT,
                last_error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_queue_retry ON sync_queue(retry_count)",
            "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL CHECK (retry_count >= 0),
                failure_reason TEXT NOT NULL,
                error_code TEXT NOT NULL,
                moved_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_dead_letter_retry ON dead_letter_queue(retry_count)",
            "CREATE INDEX IF NOT EXISTS idx_dead_letter_moved ON dead_letter_queue(moved_at DESC)",
            // Local-only key/value settings
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    )
    .await
}

/// Migration to version 2: crew roster, attendance and cached harvest settings
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS pickers (
                id TEXT PRIMARY KEY,
                picker_id TEXT NOT NULL,
                name TEXT NOT NULL,
                current_row INTEGER NOT NULL DEFAULT 0,
                total_buckets_today INTEGER NOT NULL DEFAULT 0,
                hours REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                safety_verified INTEGER NOT NULL DEFAULT 0,
                orchard_id TEXT NOT NULL,
                team_leader_id TEXT,
                UNIQUE (orchard_id, picker_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_pickers_orchard ON pickers(orchard_id)",
            "CREATE TABLE IF NOT EXISTS daily_attendance (
                id TEXT PRIMARY KEY,
                picker_id TEXT NOT NULL REFERENCES pickers(id) ON DELETE CASCADE,
                orchard_id TEXT NOT NULL,
                date TEXT NOT NULL,
                check_in_time INTEGER NOT NULL,
                check_out_time INTEGER,
                last_break_at INTEGER,
                meal_break_taken INTEGER NOT NULL DEFAULT 0,
                UNIQUE (picker_id, date)
            )",
            "CREATE INDEX IF NOT EXISTS idx_attendance_date ON daily_attendance(orchard_id, date)",
            "CREATE TABLE IF NOT EXISTS harvest_settings (
                orchard_id TEXT PRIMARY KEY,
                piece_rate REAL NOT NULL,
                min_wage_rate REAL NOT NULL,
                min_buckets_per_hour REAL NOT NULL,
                target_tons REAL NOT NULL,
                variety TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ],
    )
    .await
}
