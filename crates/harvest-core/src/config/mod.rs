//! Device configuration.
//!
//! `HarvestConfig` is a JSON file written once per device (`harvest config
//! init`) and optionally overridden by `HARVEST_*` environment variables. It
//! holds public endpoints and tunables only; the anon key is a publishable
//! key and the access token is a short-lived session credential.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::{ScanGuard, DEFAULT_CLOCK_SKEW_TOLERANCE_MS};
use crate::remote::SupabaseRestClient;
use crate::sync::{SyncPolicy, DEFAULT_RETRY_CEILING, DEFAULT_SYNC_INTERVAL};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_SUPABASE_URL: &str = "HARVEST_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "HARVEST_SUPABASE_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "HARVEST_ACCESS_TOKEN";
pub const ENV_ORCHARD_ID: &str = "HARVEST_ORCHARD_ID";
pub const ENV_DB_PATH: &str = "HARVEST_DB_PATH";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Per-device settings for the offline core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HarvestConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub orchard_id: Option<String>,
    /// Local database file; the CLI picks a platform data dir when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_dead_letter_threshold")]
    pub dead_letter_threshold: u32,
    #[serde(default = "default_clock_skew_tolerance_secs")]
    pub clock_skew_tolerance_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Dead-letter constraint and authorization failures immediately
    #[serde(default)]
    pub dead_letter_permanent_errors: bool,
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL.as_secs()
}

const fn default_dead_letter_threshold() -> u32 {
    DEFAULT_RETRY_CEILING
}

#[allow(clippy::cast_sign_loss)]
const fn default_clock_skew_tolerance_secs() -> u64 {
    (DEFAULT_CLOCK_SKEW_TOLERANCE_MS / 1000) as u64
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            access_token: None,
            orchard_id: None,
            db_path: None,
            sync_interval_secs: default_sync_interval_secs(),
            dead_letter_threshold: default_dead_letter_threshold(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            dead_letter_permanent_errors: false,
        }
    }
}

impl HarvestConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!("invalid config at {}: {error}", path.display()))
        })?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        normalized.validate()?;
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Overlay `HARVEST_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| normalize_text_option(lookup(key));

        if let Some(url) = read(ENV_SUPABASE_URL) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = read(ENV_SUPABASE_ANON_KEY) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(token) = read(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(orchard) = read(ENV_ORCHARD_ID) {
            self.orchard_id = Some(orchard);
        }
        if let Some(path) = read(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.supabase_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "supabase_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.dead_letter_threshold == 0 {
            return Err(Error::InvalidInput(
                "dead_letter_threshold must be at least 1".to_string(),
            ));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "sync_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The orchard this device works for.
    pub fn orchard_id(&self) -> Result<&str> {
        self.orchard_id.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "no orchard configured; set orchard_id or {ENV_ORCHARD_ID}"
            ))
        })
    }

    /// Whether enough is configured to reach the remote service.
    pub const fn has_remote(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_anon_key.is_some()
    }

    pub const fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            retry_ceiling: self.dead_letter_threshold,
            dead_letter_permanent_errors: self.dead_letter_permanent_errors,
            interval: Duration::from_secs(self.sync_interval_secs),
        }
    }

    pub fn scan_guard(&self) -> ScanGuard {
        let tolerance_ms = self.clock_skew_tolerance_secs.saturating_mul(1000);
        ScanGuard::new(i64::try_from(tolerance_ms).unwrap_or(i64::MAX))
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the REST client, if the remote is configured.
    pub fn remote_client(&self) -> Result<SupabaseRestClient> {
        let (Some(url), Some(anon_key)) = (
            self.supabase_url.as_deref(),
            self.supabase_anon_key.as_deref(),
        ) else {
            return Err(Error::InvalidInput(format!(
                "remote not configured; set supabase_url and supabase_anon_key \
                 (or {ENV_SUPABASE_URL} and {ENV_SUPABASE_ANON_KEY})"
            )));
        };

        SupabaseRestClient::new(
            url,
            anon_key,
            self.access_token.clone(),
            self.request_timeout(),
        )
        .map_err(Error::from)
    }

    fn normalize(&mut self) {
        self.supabase_url = normalize_text_option(self.supabase_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.supabase_anon_key = normalize_text_option(self.supabase_anon_key.take());
        self.access_token = normalize_text_option(self.access_token.take());
        self.orchard_id = normalize_text_option(self.orchard_id.take());
    }
}
