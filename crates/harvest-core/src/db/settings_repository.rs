//! Settings repository implementation

use crate::error::{Error, Result};
use crate::models::HarvestSettings;
use libsql::Connection;

const LAST_SYNC_AT_KEY: &str = "last_sync_at";

/// Trait for cached harvest settings and local key/value state (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load the cached settings for an orchard, falling back to defaults
    async fn load(&self, orchard_id: &str) -> Result<HarvestSettings>;

    /// Replace the cached settings for an orchard
    async fn save(&self, settings: &HarvestSettings) -> Result<()>;

    /// When the last successful drain finished (Unix ms)
    async fn last_sync_at(&self) -> Result<Option<i64>>;

    /// Record the end of a successful drain
    async fn set_last_sync_at(&self, timestamp: i64) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self, orchard_id: &str) -> Result<HarvestSettings> {
        let mut rows = self
            .conn
            .query(
                "SELECT orchard_id, piece_rate, min_wage_rate, min_buckets_per_hour,
                        target_tons, variety, updated_at
                 FROM harvest_settings WHERE orchard_id = ?",
                [orchard_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(HarvestSettings::for_orchard(orchard_id));
        };

        Ok(HarvestSettings {
            orchard_id: row.get(0)?,
            piece_rate: row.get(1)?,
            min_wage_rate: row.get(2)?,
            min_buckets_per_hour: row.get(3)?,
            target_tons: row.get(4)?,
            variety: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    async fn save(&self, settings: &HarvestSettings) -> Result<()> {
        settings.validate()?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO harvest_settings
                    (orchard_id, piece_rate, min_wage_rate, min_buckets_per_hour,
                     target_tons, variety, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    settings.orchard_id.clone(),
                    settings.piece_rate,
                    settings.min_wage_rate,
                    settings.min_buckets_per_hour,
                    settings.target_tons,
                    settings.variety.clone(),
                    settings.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn last_sync_at(&self) -> Result<Option<i64>> {
        match self.get_setting(LAST_SYNC_AT_KEY).await {
            Ok(value) => Ok(value.parse().ok()),
            Err(Error::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn set_last_sync_at(&self, timestamp: i64) -> Result<()> {
        self.set_setting(LAST_SYNC_AT_KEY, &timestamp.to_string())
            .await
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<String> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(value)
        } else {
            Err(Error::NotFound(key.to_string()))
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}
