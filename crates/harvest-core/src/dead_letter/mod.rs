//! Operator triage of entries that keep failing to sync.
//!
//! The view merges the dead-letter store with live entries that have failed at
//! least once, grouped by how many attempts they have burned.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{
    DeadLetterEntry, QueueEntry, QueueEntryId, QueueOperation, MAX_RETRIES_EXCEEDED,
};
use crate::services::DatabaseService;
use crate::sync::SyncTrigger;
use crate::{Error, Result};

/// Retry count from which an item is critical.
pub const CRITICAL_RETRY_THRESHOLD: u32 = 50;
/// Highest retry count still considered recent.
pub const RECENT_RETRY_LIMIT: u32 = 10;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";
const ROW_LEVEL_SECURITY: &str = "42501";

static LABELLED_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i:\bcode\b|\bsqlstate\b)["'\s:=]*([0-9A-Z]{5})\b"#).ok()
});
static KNOWN_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(23503|23505|42501|MAX_RETRIES_EXCEEDED)\b").ok());

/// How urgently an item needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Recent,
}

impl Severity {
    /// `critical` at 50 or more, `warning` from 11 to 49, `recent` up to 10.
    pub const fn from_retry_count(retry_count: u32) -> Self {
        if retry_count >= CRITICAL_RETRY_THRESHOLD {
            Self::Critical
        } else if retry_count > RECENT_RETRY_LIMIT {
            Self::Warning
        } else {
            Self::Recent
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Recent => "recent",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store an item currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemLocation {
    DeadLetter,
    LiveQueue,
}

/// One row of the triage view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterItem {
    pub id: QueueEntryId,
    pub operation: QueueOperation,
    pub retry_count: u32,
    pub severity: Severity,
    pub location: ItemLocation,
    pub error_code: Option<String>,
    pub raw_error: Option<String>,
    /// Operator-readable explanation of the failure
    pub description: String,
    pub created_at: i64,
    pub moved_at: Option<i64>,
}

impl DeadLetterItem {
    fn from_dead_letter(entry: DeadLetterEntry) -> Self {
        let description = describe_error(Some(&entry.error_code), &entry.failure_reason);
        Self {
            id: entry.id,
            severity: Severity::from_retry_count(entry.retry_count),
            retry_count: entry.retry_count,
            operation: entry.operation,
            location: ItemLocation::DeadLetter,
            error_code: Some(entry.error_code),
            raw_error: Some(entry.failure_reason),
            description,
            created_at: entry.timestamp,
            moved_at: Some(entry.moved_at),
        }
    }

    fn from_live(entry: QueueEntry) -> Self {
        let (error_code, raw_error) = entry
            .last_error
            .map_or((None, None), |failure| (failure.code, Some(failure.message)));
        let description = describe_error(error_code.as_deref(), raw_error.as_deref().unwrap_or(""));
        Self {
            id: entry.id,
            severity: Severity::from_retry_count(entry.retry_count),
            retry_count: entry.retry_count,
            operation: entry.operation,
            location: ItemLocation::LiveQueue,
            error_code,
            raw_error,
            description,
            created_at: entry.timestamp,
            moved_at: None,
        }
    }
}

/// Triage view grouped by severity, most-retried first within each group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeadLetterReport {
    pub critical: Vec<DeadLetterItem>,
    pub warning: Vec<DeadLetterItem>,
    pub recent: Vec<DeadLetterItem>,
}

impl DeadLetterReport {
    fn from_items(items: impl IntoIterator<Item = DeadLetterItem>) -> Self {
        let mut report = Self::default();
        for item in items {
            match item.severity {
                Severity::Critical => report.critical.push(item),
                Severity::Warning => report.warning.push(item),
                Severity::Recent => report.recent.push(item),
            }
        }
        for group in [&mut report.critical, &mut report.warning, &mut report.recent] {
            group.sort_by(|left, right| {
                right
                    .retry_count
                    .cmp(&left.retry_count)
                    .then(left.created_at.cmp(&right.created_at))
            });
        }
        report
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.warning.len() + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// All items, critical first.
    pub fn items(&self) -> impl Iterator<Item = &DeadLetterItem> {
        self.critical
            .iter()
            .chain(self.warning.iter())
            .chain(self.recent.iter())
    }

    pub fn find(&self, id: &QueueEntryId) -> Option<&DeadLetterItem> {
        self.items().find(|item| &item.id == id)
    }
}

/// Scope of a bulk discard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardScope {
    /// Only items at or above the critical threshold
    Critical,
    /// Both stores entirely, including entries that never failed
    All,
}

/// What a retry did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Moved back from the dead-letter store; a drain was requested
    Requeued,
    /// Live entry kept its place with a fresh retry budget
    Reset,
}

/// Operator actions over the dead-letter store and failing live entries.
#[derive(Clone)]
pub struct DeadLetterOperator {
    db: DatabaseService,
    trigger: SyncTrigger,
}

impl DeadLetterOperator {
    pub const fn new(db: DatabaseService, trigger: SyncTrigger) -> Self {
        Self { db, trigger }
    }

    /// Merged triage view.
    pub async fn report(&self) -> Result<DeadLetterReport> {
        let dead = self.db.dead_letters().await?;
        let live = self.db.retried_entries().await?;

        let mut items = live
            .into_iter()
            .filter(|entry| !dead.iter().any(|item| item.id == entry.id))
            .map(DeadLetterItem::from_live)
            .collect::<Vec<_>>();
        items.extend(dead.into_iter().map(DeadLetterItem::from_dead_letter));
        Ok(DeadLetterReport::from_items(items))
    }

    /// Give an item a fresh retry budget.
    pub async fn retry(&self, id: &QueueEntryId) -> Result<RetryOutcome> {
        if self.db.get_dead_letter(id).await?.is_some() {
            let entry = self.db.restore_from_dead_letter(id).await?;
            tracing::info!("Requeued dead letter {} {}", entry.kind(), entry.id);
            self.trigger.request();
            return Ok(RetryOutcome::Requeued);
        }

        if self.db.reset_retry(id).await? {
            tracing::info!("Reset retry count of {id}");
            return Ok(RetryOutcome::Reset);
        }

        Err(Error::NotFound(format!("queue entry {id}")))
    }

    /// Drop an item from whichever store holds it.
    pub async fn discard(&self, id: &QueueEntryId) -> Result<()> {
        if self.db.discard(id).await? == 0 {
            return Err(Error::NotFound(format!("queue entry {id}")));
        }
        tracing::warn!("Discarded {id}");
        Ok(())
    }

    /// Drop every item in `scope`; returns how many were removed.
    pub async fn discard_all(&self, scope: DiscardScope) -> Result<u64> {
        let removed = match scope {
            DiscardScope::Critical => self.db.discard_at_least(CRITICAL_RETRY_THRESHOLD).await?,
            DiscardScope::All => self.db.clear_queues().await?,
        };
        tracing::warn!("Discarded {removed} failing entries ({scope:?})");
        Ok(removed)
    }
}

/// Operator-readable explanation of a sync failure.
///
/// A code missing from `code` is looked for in `raw`. Unrecognized codes fall
/// back to the raw message.
pub fn describe_error(code: Option<&str>, raw: &str) -> String {
    let raw = raw.trim();
    let code = code
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .or_else(|| extract_error_code(raw));

    match code.as_deref() {
        Some(FOREIGN_KEY_VIOLATION) => {
            "A record this depends on no longer exists on the server (foreign key violation). \
             Check that the picker and orchard still exist."
                .to_string()
        }
        Some(UNIQUE_VIOLATION) => "The server already has a conflicting record (unique \
             constraint violation). This is usually safe to discard."
            .to_string(),
        Some(ROW_LEVEL_SECURITY) => "The server refused the write for this account \
             (row-level security). Check the user's orchard access."
            .to_string(),
        Some(MAX_RETRIES_EXCEEDED) if raw.is_empty() => {
            "Sync gave up after too many failed attempts.".to_string()
        }
        _ if raw.is_empty() => "Unknown error".to_string(),
        _ => raw.to_string(),
    }
}

/// Find a backend error code embedded in a raw error message.
pub fn extract_error_code(raw: &str) -> Option<String> {
    [&*LABELLED_CODE, &*KNOWN_CODE]
        .into_iter()
        .flatten()
        .find_map(|pattern| pattern.captures(raw))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_ascii_uppercase())
}
