//! In-process remote used by tests and offline demos.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;

use super::{RemoteError, RemoteErrorKind, RemoteResult, RemoteStore};
use crate::models::{HarvestSettings, QueueEntryId, QueueOperation};

/// Deterministic stand-in for the remote data service.
///
/// Rows are keyed by `(resource, id)`, so replaying an operation overwrites
/// the row it created instead of adding another.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    rows: Mutex<HashMap<(String, String), serde_json::Value>>,
    settings: Mutex<HashMap<String, HarvestSettings>>,
    scripted: Mutex<VecDeque<RemoteError>>,
    failing: Mutex<HashMap<QueueEntryId, RemoteError>>,
    offline: AtomicBool,
    apply_calls: AtomicU64,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Fail the next `apply` call, whatever it carries.
    pub async fn fail_next(&self, error: RemoteError) {
        self.scripted.lock().await.push_back(error);
    }

    /// Fail every `apply` of this record until cleared.
    pub async fn fail_always(&self, id: QueueEntryId, error: RemoteError) {
        self.failing.lock().await.insert(id, error);
    }

    pub async fn clear_failure(&self, id: &QueueEntryId) {
        self.failing.lock().await.remove(id);
    }

    /// Number of `apply` calls received, including failed ones.
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of stored rows in `resource`.
    pub async fn row_count(&self, resource: &str) -> usize {
        self.rows
            .lock()
            .await
            .keys()
            .filter(|(table, _)| table == resource)
            .count()
    }

    /// A stored row, as written.
    pub async fn row(&self, resource: &str, id: &str) -> Option<serde_json::Value> {
        self.rows
            .lock()
            .await
            .get(&(resource.to_string(), id.to_string()))
            .cloned()
    }

    /// Store settings as if another device had written them.
    pub async fn put_settings(&self, settings: HarvestSettings) {
        self.settings
            .lock()
            .await
            .insert(settings.orchard_id.clone(), settings);
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.is_offline() {
            Err(RemoteError::network("remote unreachable (offline)"))
        } else {
            Ok(())
        }
    }
}

impl RemoteStore for InMemoryRemote {
    async fn apply(&self, operation: &QueueOperation) -> RemoteResult<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        if let Some(error) = self.scripted.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(error) = self.failing.lock().await.get(&operation.record_id()) {
            return Err(error.clone());
        }

        let (key, value) = match operation {
            QueueOperation::PickerStatusChange(change) => (
                ("pickers".to_string(), change.picker_id.clone()),
                serde_json::json!({ "id": change.picker_id, "status": change.status }),
            ),
            _ => (
                (
                    operation.resource().to_string(),
                    operation.record_id().to_string(),
                ),
                operation
                    .payload()
                    .map_err(|error| {
                        RemoteError::new(RemoteErrorKind::InvalidRequest, error.to_string())
                    })?,
            ),
        };

        self.rows.lock().await.insert(key, value);
        Ok(())
    }

    async fn fetch_settings(&self, orchard_id: &str) -> RemoteResult<Option<HarvestSettings>> {
        self.check_online()?;
        Ok(self.settings.lock().await.get(orchard_id).cloned())
    }

    async fn update_settings_if_unchanged(
        &self,
        settings: &HarvestSettings,
        expected_updated_at: i64,
    ) -> RemoteResult<Option<HarvestSettings>> {
        self.check_online()?;
        let mut stored = self.settings.lock().await;

        let current = stored
            .get(&settings.orchard_id)
            .map_or(0, |existing| existing.updated_at);
        if current != expected_updated_at {
            return Ok(None);
        }

        stored.insert(settings.orchard_id.clone(), settings.clone());
        Ok(Some(settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BucketRecord, QualityGrade};

    fn scan() -> QueueOperation {
        QueueOperation::BucketScan(BucketRecord::new(
            "picker-1",
            "orchard-1",
            QualityGrade::A,
            5,
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replayed_apply_keeps_one_row() {
        let remote = InMemoryRemote::new();
        let operation = scan();

        remote.apply(&operation).await.unwrap();
        remote.apply(&operation).await.unwrap();

        assert_eq!(remote.apply_calls(), 2);
        assert_eq!(remote.row_count("bucket_records").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_and_scripted_failures() {
        let remote = InMemoryRemote::new();
        remote.set_offline(true);
        assert!(remote.apply(&scan()).await.unwrap_err().is_retryable());

        remote.set_offline(false);
        remote
            .fail_next(RemoteError::rejected(409, Some("23505".to_string()), "dup"))
            .await;
        assert_eq!(
            remote.apply(&scan()).await.unwrap_err().code.as_deref(),
            Some("23505")
        );
        assert!(remote.apply(&scan()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn settings_compare_and_swap() {
        let remote = InMemoryRemote::new();
        let first = HarvestSettings {
            updated_at: 10,
            ..HarvestSettings::for_orchard("orchard-1")
        };

        assert!(remote
            .update_settings_if_unchanged(&first, 0)
            .await
            .unwrap()
            .is_some());

        let stale = HarvestSettings {
            piece_rate: 9.0,
            updated_at: 20,
            ..HarvestSettings::for_orchard("orchard-1")
        };
        assert!(remote
            .update_settings_if_unchanged(&stale, 0)
            .await
            .unwrap()
            .is_none());
        assert!(remote
            .update_settings_if_unchanged(&stale, 10)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            remote.fetch_settings("orchard-1").await.unwrap(),
            Some(stale)
        );
    }
}
