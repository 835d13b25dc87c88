//! Queue drain: push pending mutations to the remote service.
//!
//! A drain walks a FIFO snapshot of the live queue one entry at a time. Only
//! one drain runs per processor; a second caller waits for the first to
//! finish and then drains whatever is left.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;

use crate::models::{DeadLetterEntry, QueueEntry};
use crate::remote::{RemoteError, RemoteErrorKind, RemoteStore};
use crate::services::DatabaseService;
use crate::util::now_millis;
use crate::{Error, Result};

/// Retry count at which an entry leaves the live queue.
pub const DEFAULT_RETRY_CEILING: u32 = 50;

/// How often the run loop drains while online.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for the sync processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Entries at or above this many failed attempts are dead-lettered
    pub retry_ceiling: u32,
    /// Dead-letter permanent failures (constraint, authorization) on first
    /// sight instead of retrying them up to the ceiling
    pub dead_letter_permanent_errors: bool,
    /// Period of the background drain
    pub interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            retry_ceiling: DEFAULT_RETRY_CEILING,
            dead_letter_permanent_errors: false,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Unified sync state used by the CLI and status subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

/// Snapshot published after every state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Live entries still waiting
    pub pending: usize,
    /// Completion time of the last drain without failures (Unix ms)
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Offline,
            pending: 0,
            last_synced_at: None,
            last_error: None,
        }
    }
}

/// Outcome of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote writes attempted
    pub attempted: usize,
    pub synced: usize,
    /// Failed attempts left in the live queue
    pub retried: usize,
    pub dead_lettered: usize,
    /// Live entries after the drain
    pub remaining: usize,
    /// The drain stopped early because the remote was unreachable
    pub went_offline: bool,
}

impl SyncReport {
    pub const fn is_clean(&self) -> bool {
        self.retried == 0 && !self.went_offline
    }
}

/// Handle for requesting an immediate drain from anywhere.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger(Arc<Notify>);

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run loop to drain now. Requests made while a drain is running
    /// coalesce into one follow-up drain.
    pub fn request(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Drains the durable queue into a [`RemoteStore`].
pub struct SyncProcessor<R> {
    db: DatabaseService,
    remote: R,
    policy: SyncPolicy,
    drain_lock: Mutex<()>,
    trigger: SyncTrigger,
    status: watch::Sender<SyncStatus>,
}

impl<R: RemoteStore> SyncProcessor<R> {
    pub fn new(db: DatabaseService, remote: R, policy: SyncPolicy) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            db,
            remote,
            policy,
            drain_lock: Mutex::new(()),
            trigger: SyncTrigger::new(),
            status,
        }
    }

    pub const fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Trigger handle wired to this processor's run loop.
    pub fn trigger(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    fn publish(&self, update: impl FnOnce(&mut SyncStatus)) {
        self.status.send_modify(update);
    }

    /// Drain the live queue once.
    pub async fn drain(&self) -> Result<SyncReport> {
        let _drain = self.drain_lock.lock().await;
        self.publish(|status| status.state = SyncState::Syncing);

        match self.drain_locked().await {
            Ok(report) => {
                let finished_at = now_millis();
                if report.is_clean() {
                    self.db.set_last_sync_at(finished_at).await?;
                }
                self.publish(|status| {
                    status.pending = report.remaining;
                    if report.went_offline {
                        status.state = SyncState::Offline;
                    } else if report.retried > 0 {
                        status.state = SyncState::Error;
                    } else {
                        status.state = SyncState::Synced;
                        status.last_synced_at = Some(finished_at);
                        status.last_error = None;
                    }
                });
                tracing::info!(
                    "Sync drain: {} synced, {} retried, {} dead-lettered, {} remaining",
                    report.synced,
                    report.retried,
                    report.dead_lettered,
                    report.remaining
                );
                Ok(report)
            }
            Err(error) => {
                let message = error.to_string();
                self.publish(|status| {
                    status.state = SyncState::Error;
                    status.last_error = Some(message);
                });
                Err(error)
            }
        }
    }

    async fn drain_locked(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for queued in self.db.pending_entries().await? {
            // An operator may have discarded or retried it since the snapshot.
            let Some(entry) = self.db.get_entry(&queued.id).await? else {
                continue;
            };

            if entry.retry_count >= self.policy.retry_ceiling {
                self.dead_letter(entry, None).await?;
                report.dead_lettered += 1;
                continue;
            }

            report.attempted += 1;
            match self.remote.apply(&entry.operation).await {
                Ok(()) => {
                    self.db.mark_synced(&entry.id).await?;
                    report.synced += 1;
                }
                Err(error) => {
                    let went_offline = matches!(error.kind, RemoteErrorKind::Network);
                    self.publish(|status| status.last_error = Some(error.to_string()));

                    if self.policy.dead_letter_permanent_errors && !error.is_retryable() {
                        self.dead_letter(entry, Some(&error)).await?;
                        report.dead_lettered += 1;
                        continue;
                    }

                    if self.record_failure(&entry, &error).await? {
                        report.retried += 1;
                    }
                    if went_offline {
                        report.went_offline = true;
                        break;
                    }
                }
            }
        }

        report.remaining = self.db.queue_len().await?;
        Ok(report)
    }

    /// Bump the entry's retry count; false when the entry vanished meanwhile.
    async fn record_failure(&self, entry: &QueueEntry, error: &RemoteError) -> Result<bool> {
        match self.db.increment_retry(&entry.id, &error.failure_info()).await {
            Ok(retry_count) => {
                tracing::warn!(
                    "Sync of {} {} failed (attempt {}): {}",
                    entry.kind(),
                    entry.id,
                    retry_count,
                    error
                );
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn dead_letter(&self, entry: QueueEntry, error: Option<&RemoteError>) -> Result<()> {
        let dead = DeadLetterEntry::from_queue_entry(
            entry,
            error.map(RemoteError::failure_info),
            now_millis(),
        );
        tracing::warn!(
            "Moved {} {} to dead letters after {} attempts: {} ({})",
            dead.operation.kind(),
            dead.id,
            dead.retry_count,
            dead.failure_reason,
            dead.error_code
        );
        self.db.move_to_dead_letter(&dead).await
    }

    async fn drain_logged(&self) {
        if let Err(error) = self.drain().await {
            tracing::error!("Sync drain failed: {}", error);
        }
    }

    /// Drain periodically while online, as soon as connectivity returns, and
    /// whenever the trigger fires. Returns when `shutdown` flips to true or
    /// its sender is dropped.
    pub async fn run(
        &self,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_open = true;

        if !*connectivity.borrow_and_update() {
            self.publish(|status| status.state = SyncState::Offline);
        }

        loop {
            let online = *connectivity.borrow();
            tokio::select! {
                _ = ticker.tick() => {
                    if online {
                        self.drain_logged().await;
                    }
                }
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    if *connectivity.borrow_and_update() {
                        tracing::info!("Connectivity restored; draining queue");
                        self.drain_logged().await;
                    } else {
                        tracing::info!("Connectivity lost; pausing sync");
                        self.publish(|status| status.state = SyncState::Offline);
                    }
                }
                () = self.trigger.notified() => {
                    if online {
                        self.drain_logged().await;
                    } else {
                        tracing::debug!("Sync requested while offline; will drain on reconnect");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::{DeadLetterOperator, RetryOutcome};
    use crate::models::{
        BucketRecord, FailureInfo, HarvestSettings, QualityGrade, QueueEntryId, QueueOperation,
    };
    use crate::remote::{InMemoryRemote, RemoteResult};
    use pretty_assertions::assert_eq;

    fn scan(picker: &str) -> QueueOperation {
        QueueOperation::BucketScan(BucketRecord::new(
            picker,
            "orchard-1",
            QualityGrade::A,
            1_000,
        ))
    }

    async fn processor(policy: SyncPolicy) -> (DatabaseService, Arc<InMemoryRemote>, SyncProcessor<Arc<InMemoryRemote>>) {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let processor = SyncProcessor::new(db.clone(), Arc::clone(&remote), policy);
        (db, remote, processor)
    }

    async fn fail_times(db: &DatabaseService, entry: &QueueEntry, times: u32) {
        for _ in 0..times {
            db.increment_retry(
                &entry.id,
                &FailureInfo {
                    code: None,
                    message: "timeout".to_string(),
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_syncs_in_fifo_order_and_empties_queue() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        for picker in ["a", "b", "c"] {
            db.enqueue(scan(picker)).await.unwrap();
        }

        let report = processor.drain().await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                attempted: 3,
                synced: 3,
                remaining: 0,
                ..SyncReport::default()
            }
        );
        assert_eq!(remote.row_count("bucket_records").await, 3);
        assert_eq!(processor.status().state, SyncState::Synced);
        assert!(db.last_sync_at().await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replaying_a_synced_entry_creates_no_duplicate() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        let operation = scan("a");

        db.enqueue(operation.clone()).await.unwrap();
        processor.drain().await.unwrap();
        // Same record queued again, e.g. after a crash between write and dequeue.
        db.enqueue(operation).await.unwrap();
        processor.drain().await.unwrap();

        assert_eq!(remote.apply_calls(), 2);
        assert_eq!(remote.row_count("bucket_records").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_increments_retry_by_exactly_one() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        let entry = db.enqueue(scan("a")).await.unwrap();
        remote
            .fail_always(
                entry.id,
                RemoteError::new(RemoteErrorKind::Unavailable { status: 503 }, "busy"),
            )
            .await;

        for expected in 1..=3 {
            let report = processor.drain().await.unwrap();
            assert_eq!(report.retried, 1);
            let stored = db.get_entry(&entry.id).await.unwrap().unwrap();
            assert_eq!(stored.retry_count, expected);
            assert_eq!(stored.last_error.unwrap().message, "busy");
        }
        assert_eq!(processor.status().state, SyncState::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entry_at_ceiling_is_dead_lettered_without_remote_attempt() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        let entry = db.enqueue(scan("a")).await.unwrap();
        fail_times(&db, &entry, 49).await;
        remote
            .fail_always(
                entry.id,
                RemoteError::rejected(409, Some("23503".to_string()), "fk violation"),
            )
            .await;

        // 49 -> 50: the attempt fails and the entry stays live.
        processor.drain().await.unwrap();
        let stored = db.get_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 50);
        assert_eq!(remote.apply_calls(), 1);

        // At 50 the next drain moves it without calling the remote.
        let report = processor.drain().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.apply_calls(), 1);
        assert!(db.get_entry(&entry.id).await.unwrap().is_none());

        let dead = db.get_dead_letter(&entry.id).await.unwrap().unwrap();
        assert_eq!(dead.retry_count, 50);
        assert_eq!(dead.error_code, "23503");
        assert_eq!(dead.failure_reason, "fk violation");
    }

    /// Resets another entry's retry count through the operator while a write
    /// is in flight.
    struct ResettingRemote {
        inner: InMemoryRemote,
        operator: DeadLetterOperator,
        target: QueueEntryId,
    }

    impl RemoteStore for ResettingRemote {
        async fn apply(&self, operation: &QueueOperation) -> RemoteResult<()> {
            if operation.record_id() != self.target {
                let outcome = self.operator.retry(&self.target).await.unwrap();
                assert_eq!(outcome, RetryOutcome::Reset);
            }
            self.inner.apply(operation).await
        }

        async fn fetch_settings(&self, orchard_id: &str) -> RemoteResult<Option<HarvestSettings>> {
            self.inner.fetch_settings(orchard_id).await
        }

        async fn update_settings_if_unchanged(
            &self,
            settings: &HarvestSettings,
            expected_updated_at: i64,
        ) -> RemoteResult<Option<HarvestSettings>> {
            self.inner
                .update_settings_if_unchanged(settings, expected_updated_at)
                .await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operator_reset_during_drain_keeps_entry_live() {
        let db = DatabaseService::open_in_memory().await.unwrap();
        db.enqueue(scan("a")).await.unwrap();
        let stuck = db.enqueue(scan("b")).await.unwrap();
        fail_times(&db, &stuck, DEFAULT_RETRY_CEILING).await;

        let remote = ResettingRemote {
            inner: InMemoryRemote::new(),
            operator: DeadLetterOperator::new(db.clone(), SyncTrigger::new()),
            target: stuck.id,
        };
        let processor = SyncProcessor::new(db.clone(), remote, SyncPolicy::default());

        let report = processor.drain().await.unwrap();

        assert_eq!(report.dead_lettered, 0);
        assert_eq!(report.synced, 2);
        assert!(db.get_dead_letter(&stuck.id).await.unwrap().is_none());
        assert_eq!(processor.remote().inner.row_count("bucket_records").await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn permanent_errors_fast_path_when_enabled() {
        let policy = SyncPolicy {
            dead_letter_permanent_errors: true,
            ..SyncPolicy::default()
        };
        let (db, remote, processor) = processor(policy).await;
        let entry = db.enqueue(scan("a")).await.unwrap();
        remote
            .fail_next(RemoteError::rejected(403, Some("42501".to_string()), "rls"))
            .await;

        let report = processor.drain().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        let dead = db.get_dead_letter(&entry.id).await.unwrap().unwrap();
        assert_eq!(dead.retry_count, 0);
        assert_eq!(dead.error_code, "42501");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_stops_drain_after_first_failure() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        let first = db.enqueue(scan("a")).await.unwrap();
        let second = db.enqueue(scan("b")).await.unwrap();
        remote.set_offline(true);

        let report = processor.drain().await.unwrap();

        assert!(report.went_offline);
        assert_eq!(report.remaining, 2);
        assert_eq!(db.get_entry(&first.id).await.unwrap().unwrap().retry_count, 1);
        assert_eq!(db.get_entry(&second.id).await.unwrap().unwrap().retry_count, 0);
        assert_eq!(processor.status().state, SyncState::Offline);
        assert!(db.last_sync_at().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_drains_never_apply_an_entry_twice() {
        let (db, remote, processor) = processor(SyncPolicy::default()).await;
        for index in 0..20 {
            db.enqueue(scan(&format!("picker-{index}"))).await.unwrap();
        }

        let (first, second) = tokio::join!(processor.drain(), processor.drain());
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.synced + second.synced, 20);
        assert_eq!(remote.apply_calls(), 20);
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_loop_drains_on_reconnect_and_trigger() {
        let policy = SyncPolicy {
            interval: Duration::from_secs(3600),
            ..SyncPolicy::default()
        };
        let (db, remote, processor) = processor(policy).await;
        db.enqueue(scan("a")).await.unwrap();

        let (connectivity_tx, connectivity_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = processor.trigger();

        let driver = async {
            connectivity_tx.send(true).unwrap();
            wait_for_empty_queue(&db).await;

            db.enqueue(scan("b")).await.unwrap();
            trigger.request();
            wait_for_empty_queue(&db).await;

            shutdown_tx.send(true).unwrap();
        };

        let (result, ()) = tokio::join!(processor.run(connectivity_rx, shutdown_rx), driver);
        result.unwrap();
        assert_eq!(remote.row_count("bucket_records").await, 2);
    }

    async fn wait_for_empty_queue(db: &DatabaseService) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while db.queue_len().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
