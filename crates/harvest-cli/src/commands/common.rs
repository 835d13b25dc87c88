use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_core::config::HarvestConfig;
use harvest_core::remote::SupabaseRestClient;
use harvest_core::services::DatabaseService;
use harvest_core::util::normalize_text_option;
use harvest_core::{Picker, QueueEntryId};

use crate::error::CliError;

const APP_DIR: &str = "harvest";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "harvest.db";

/// Resolved config, paths and overrides for one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: HarvestConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl Context {
    /// Load config from disk, overlay the environment, then CLI flags.
    pub fn load(
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        orchard: Option<String>,
    ) -> Result<Self, CliError> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut config = HarvestConfig::load_from_path(&config_path)?;
        config.apply_env_overrides();
        if let Some(orchard) = normalize_text_option(orchard) {
            config.orchard_id = Some(orchard);
        }

        let db_path = match db_path.or_else(|| config.db_path.clone()) {
            Some(path) => path,
            None => default_db_path()?,
        };

        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    pub fn orchard_id(&self) -> Result<&str, CliError> {
        Ok(self.config.orchard_id()?)
    }

    pub async fn open_database(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path(self.db_path.clone()).await?)
    }

    pub fn remote_client(&self) -> Result<SupabaseRestClient, CliError> {
        if !self.config.has_remote() {
            return Err(CliError::RemoteNotConfigured);
        }
        Ok(self.config.remote_client()?)
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("could not resolve a config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join(DB_FILE_NAME))
        .ok_or_else(|| CliError::Config("could not resolve a data directory".to_string()))
}

/// Look up a picker on `orchard_id` by badge code.
pub async fn find_picker(
    db: &DatabaseService,
    orchard_id: &str,
    code: &str,
) -> Result<Picker, CliError> {
    db.find_picker_by_code(orchard_id, code)
        .await?
        .ok_or_else(|| CliError::PickerNotFound(code.trim().to_string()))
}

pub fn parse_entry_id(raw: &str) -> Result<QueueEntryId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidEntryId(raw.trim().to_string()))
}

/// Ask before a destructive action. `--yes` skips the prompt; without a
/// terminal the action is refused.
pub fn confirm(action: &str, assume_yes: bool) -> Result<(), CliError> {
    if assume_yes {
        return Ok(());
    }
    if !io::stdin().is_terminal() {
        return Err(CliError::ConfirmationRequired(action.to_string()));
    }

    print!("Really {action}? [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    if is_affirmative(&answer) {
        Ok(())
    } else {
        Err(CliError::Aborted)
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let elapsed_secs = now_ms.saturating_sub(timestamp_ms).max(0) / 1000;
    if elapsed_secs < 60 {
        return "just now".to_string();
    }
    let minutes = elapsed_secs / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

/// Write `rendered` to `path`, or to stdout when no path is given.
pub fn write_output(rendered: &str, path: Option<&Path>) -> Result<(), CliError> {
    if let Some(path) = path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }
    Ok(())
}
