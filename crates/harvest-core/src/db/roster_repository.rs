//! Crew roster and attendance repository implementation

use chrono::NaiveDate;
use libsql::{Connection, Row};

use super::queue_repository::{optional_integer, optional_string, optional_text};
use crate::error::{Error, Result};
use crate::models::{AttendanceRecord, Picker, PickerStatus};

const PICKER_COLUMNS: &str = "id, picker_id, name, current_row, total_buckets_today, hours, \
     status, safety_verified, orchard_id, team_leader_id";
const ATTENDANCE_COLUMNS: &str = "id, picker_id, orchard_id, date, check_in_time, \
     check_out_time, last_break_at, meal_break_taken";

/// Trait for the local crew roster and daily attendance
#[allow(async_fn_in_trait)]
pub trait RosterRepository {
    /// Insert a picker or replace the stored row with the same id
    async fn upsert_picker(&self, picker: &Picker) -> Result<()>;

    /// Get a picker by row id
    async fn get_picker(&self, id: &str) -> Result<Option<Picker>>;

    /// Find a picker by the badge code printed on their card
    async fn find_picker_by_code(&self, orchard_id: &str, code: &str) -> Result<Option<Picker>>;

    /// List an orchard's pickers by name
    async fn list_pickers(&self, orchard_id: &str) -> Result<Vec<Picker>>;

    /// Change a picker's status; returns whether the picker exists
    async fn set_picker_status(&self, id: &str, status: PickerStatus) -> Result<bool>;

    /// Credit one bucket; returns the new daily total
    async fn increment_buckets(&self, id: &str) -> Result<u32>;

    /// Store the hours worked today
    async fn set_hours(&self, id: &str, hours: f64) -> Result<bool>;

    /// Record a check-in; returns false when the picker already checked in that day
    async fn record_check_in(&self, record: &AttendanceRecord) -> Result<bool>;

    /// Record a check-out for the picker's shift on `date`
    async fn record_check_out(&self, picker_id: &str, date: NaiveDate, at: i64) -> Result<bool>;

    /// Record the end of a break; `meal` marks the meal break as taken
    async fn record_break(
        &self,
        picker_id: &str,
        date: NaiveDate,
        ended_at: i64,
        meal: bool,
    ) -> Result<bool>;

    /// Get a picker's attendance for one day
    async fn get_attendance(&self, picker_id: &str, date: NaiveDate)
        -> Result<Option<AttendanceRecord>>;

    /// List an orchard's attendance for one day
    async fn list_attendance(&self, orchard_id: &str, date: NaiveDate)
        -> Result<Vec<AttendanceRecord>>;
}

/// libSQL implementation of `RosterRepository`
pub struct LibSqlRosterRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRosterRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_picker(row: &Row) -> Result<Picker> {
        let status: String = row.get(6)?;
        let total: i64 = row.get(4)?;

        Ok(Picker {
            id: row.get(0)?,
            picker_id: row.get(1)?,
            name: row.get(2)?,
            current_row: row.get(3)?,
            total_buckets_today: u32::try_from(total).unwrap_or_default(),
            hours: row.get(5)?,
            status: status.parse()?,
            safety_verified: row.get::<i64>(7)? != 0,
            orchard_id: row.get(8)?,
            team_leader_id: optional_string(row, 9)?,
        })
    }

    fn parse_attendance(row: &Row) -> Result<AttendanceRecord> {
        let id: String = row.get(0)?;
        let date: String = row.get(3)?;

        Ok(AttendanceRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid attendance id '{id}'")))?,
            picker_id: row.get(1)?,
            orchard_id: row.get(2)?,
            date: parse_date(&date)?,
            check_in_time: row.get(4)?,
            check_out_time: optional_integer(row, 5)?,
            last_break_at: optional_integer(row, 6)?,
            meal_break_taken: row.get::<i64>(7)? != 0,
        })
    }
}

impl RosterRepository for LibSqlRosterRepository<'_> {
    async fn upsert_picker(&self, picker: &Picker) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pickers
                    (id, picker_id, name, current_row, total_buckets_today, hours,
                     status, safety_verified, orchard_id, team_leader_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    picker_id = excluded.picker_id,
                    name = excluded.name,
                    current_row = excluded.current_row,
                    total_buckets_today = excluded.total_buckets_today,
                    hours = excluded.hours,
                    status = excluded.status,
                    safety_verified = excluded.safety_verified,
                    orchard_id = excluded.orchard_id,
                    team_leader_id = excluded.team_leader_id",
                libsql::params![
                    picker.id.clone(),
                    picker.picker_id.clone(),
                    picker.name.clone(),
                    picker.current_row,
                    i64::from(picker.total_buckets_today),
                    picker.hours,
                    picker.status.as_str(),
                    i64::from(picker.safety_verified),
                    picker.orchard_id.clone(),
                    optional_text(picker.team_leader_id.as_deref())
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_picker(&self, id: &str) -> Result<Option<Picker>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {PICKER_COLUMNS} FROM pickers WHERE id = ?"),
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_picker(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_picker_by_code(&self, orchard_id: &str, code: &str) -> Result<Option<Picker>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PICKER_COLUMNS} FROM pickers WHERE orchard_id = ? AND picker_id = ?"
                ),
                [orchard_id, code.trim()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_picker(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_pickers(&self, orchard_id: &str) -> Result<Vec<Picker>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {PICKER_COLUMNS} FROM pickers WHERE orchard_id = ?
                     ORDER BY name COLLATE NOCASE, picker_id"
                ),
                [orchard_id],
            )
            .await?;

        let mut pickers = Vec::new();
        while let Some(row) = rows.next().await? {
            pickers.push(Self::parse_picker(&row)?);
        }
        Ok(pickers)
    }

    async fn set_picker_status(&self, id: &str, status: PickerStatus) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE pickers SET status = ? WHERE id = ?",
                [status.as_str(), id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn increment_buckets(&self, id: &str) -> Result<u32> {
        let rows = self
            .conn
            .execute(
                "UPDATE pickers SET total_buckets_today = total_buckets_today + 1 WHERE id = ?",
                [id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("picker {id}")));
        }

        self.get_picker(id)
            .await?
            .map(|picker| picker.total_buckets_today)
            .ok_or_else(|| Error::NotFound(format!("picker {id}")))
    }

    async fn set_hours(&self, id: &str, hours: f64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE pickers SET hours = ? WHERE id = ?",
                libsql::params![hours, id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn record_check_in(&self, record: &AttendanceRecord) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT INTO daily_attendance
                    (id, picker_id, orchard_id, date, check_in_time,
                     check_out_time, last_break_at, meal_break_taken)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(picker_id, date) DO NOTHING",
                libsql::params![
                    record.id.as_str(),
                    record.picker_id.clone(),
                    record.orchard_id.clone(),
                    record.date.to_string(),
                    record.check_in_time,
                    record
                        .check_out_time
                        .map_or(libsql::Value::Null, libsql::Value::Integer),
                    record
                        .last_break_at
                        .map_or(libsql::Value::Null, libsql::Value::Integer),
                    i64::from(record.meal_break_taken)
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn record_check_out(&self, picker_id: &str, date: NaiveDate, at: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE daily_attendance SET check_out_time = ? WHERE picker_id = ? AND date = ?",
                libsql::params![at, picker_id, date.to_string()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn record_break(
        &self,
        picker_id: &str,
        date: NaiveDate,
        ended_at: i64,
        meal: bool,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE daily_attendance
                 SET last_break_at = ?, meal_break_taken = MAX(meal_break_taken, ?)
                 WHERE picker_id = ? AND date = ?",
                libsql::params![ended_at, i64::from(meal), picker_id, date.to_string()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn get_attendance(
        &self,
        picker_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ATTENDANCE_COLUMNS} FROM daily_attendance
                     WHERE picker_id = ? AND date = ?"
                ),
                libsql::params![picker_id, date.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_attendance(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_attendance(
        &self,
        orchard_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ATTENDANCE_COLUMNS} FROM daily_attendance
                     WHERE orchard_id = ? AND date = ?
                     ORDER BY check_in_time ASC"
                ),
                libsql::params![orchard_id, date.to_string()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_attendance(&row)?);
        }
        Ok(records)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| Error::Database(format!("invalid attendance date '{raw}'")))
}
