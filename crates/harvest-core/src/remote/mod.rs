//! Remote data service boundary.
//!
//! Every queued mutation is written through [`RemoteStore::apply`]. Writes are
//! keyed by the entry id so that replaying an already-applied entry is a no-op
//! on the server.

mod memory;
mod supabase;

use std::fmt;
use std::sync::Arc;

pub use memory::InMemoryRemote;
pub use supabase::{normalize_rest_url, SupabaseRestClient};

use crate::models::{FailureInfo, HarvestSettings, QueueOperation};

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Broad failure class of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Could not reach the service
    Network,
    /// The request timed out
    Timeout,
    /// The service answered but is temporarily unable to serve (5xx, 408, 429)
    Unavailable { status: u16 },
    /// The service refused the write (constraint, authorization, bad request)
    Rejected { status: u16 },
    /// The response could not be understood
    InvalidResponse,
    /// The request could not be built from the local record
    InvalidRequest,
    /// The client is missing or has malformed configuration
    InvalidConfiguration,
}

/// A failed remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// Backend error code (`PostgreSQL` SQLSTATE such as `23505`), when supplied
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidConfiguration, message)
    }

    /// A refusal carrying the backend's error code.
    pub fn rejected(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Rejected { status },
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether the same write could succeed later without operator action.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Network
                | RemoteErrorKind::Timeout
                | RemoteErrorKind::Unavailable { .. }
                | RemoteErrorKind::InvalidResponse
        )
    }

    /// Failure details to store against the queue entry.
    pub fn failure_info(&self) -> FailureInfo {
        FailureInfo {
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{code}]", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error.to_string())
        } else if error.is_decode() {
            Self::new(RemoteErrorKind::InvalidResponse, error.to_string())
        } else if error.is_builder() {
            Self::invalid_configuration(error.to_string())
        } else {
            Self::network(error.to_string())
        }
    }
}

/// The remote data service the sync processor writes to.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Apply one queued mutation. Must be idempotent per record id.
    async fn apply(&self, operation: &QueueOperation) -> RemoteResult<()>;

    /// Fetch the authoritative settings for an orchard.
    async fn fetch_settings(&self, orchard_id: &str) -> RemoteResult<Option<HarvestSettings>>;

    /// Write `settings` only if the stored `updated_at` still equals
    /// `expected_updated_at`.
    ///
    /// Returns the stored row on success and `None` when another writer got
    /// there first.
    async fn update_settings_if_unchanged(
        &self,
        settings: &HarvestSettings,
        expected_updated_at: i64,
    ) -> RemoteResult<Option<HarvestSettings>>;
}

impl<T: RemoteStore> RemoteStore for Arc<T> {
    async fn apply(&self, operation: &QueueOperation) -> RemoteResult<()> {
        (**self).apply(operation).await
    }

    async fn fetch_settings(&self, orchard_id: &str) -> RemoteResult<Option<HarvestSettings>> {
        (**self).fetch_settings(orchard_id).await
    }

    async fn update_settings_if_unchanged(
        &self,
        settings: &HarvestSettings,
        expected_updated_at: i64,
    ) -> RemoteResult<Option<HarvestSettings>> {
        (**self)
            .update_settings_if_unchanged(settings, expected_updated_at)
            .await
    }
}
