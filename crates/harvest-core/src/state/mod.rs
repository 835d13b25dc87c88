//! In-memory application state shared by the field and manager surfaces.
//!
//! [`AppState`] holds typed slices (crew, attendance, settings, queue stats,
//! violations, sync status) loaded from the local store. Every mutation that
//! can change pay or hours recomputes the compliance violations for the whole
//! crew, then announces what changed on a broadcast channel.

pub mod optimistic;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::compliance::{
    assess_crew, calculate_payroll, ComplianceViolation, PayrollSummary, PickerShift, WageRates,
};
use crate::models::{AttendanceRecord, HarvestSettings, Picker, PickerStatus, QueueEntry};
use crate::queue::{change_picker_status, ScanReceipt};
use crate::remote::RemoteStore;
use crate::services::DatabaseService;
use crate::sync::SyncStatus;
use crate::util::{day_of, now_millis};
use crate::{Error, Result};

use self::optimistic::apply_with_rollback;

const EVENT_CAPACITY: usize = 64;

/// Counts of the two local queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub dead_letters: usize,
}

/// Point-in-time copy of the application state
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub orchard_id: String,
    pub crew: Vec<Picker>,
    /// Today's attendance for the orchard
    pub attendance: Vec<AttendanceRecord>,
    pub settings: HarvestSettings,
    pub queue: QueueStats,
    pub violations: Vec<ComplianceViolation>,
    pub sync: SyncStatus,
}

impl StateSnapshot {
    /// Read every slice for `orchard_id` from the local store as of `now`.
    pub async fn load(db: &DatabaseService, orchard_id: &str, now: i64) -> Result<Self> {
        let mut snapshot = Self {
            orchard_id: orchard_id.to_string(),
            crew: db.list_pickers(orchard_id).await?,
            attendance: db.attendance_on(orchard_id, day_of(now)).await?,
            settings: db.load_harvest_settings(orchard_id).await?,
            queue: QueueStats {
                pending: db.queue_len().await?,
                dead_letters: db.dead_letter_count().await?,
            },
            violations: Vec::new(),
            sync: SyncStatus {
                last_synced_at: db.last_sync_at().await?,
                ..SyncStatus::default()
            },
        };
        snapshot.recompute_violations(now);
        Ok(snapshot)
    }

    /// Each crew member's shift as of `now`.
    pub fn shifts(&self, now: i64) -> Vec<PickerShift> {
        self.crew
            .iter()
            .map(|picker| {
                let attendance = self
                    .attendance
                    .iter()
                    .find(|record| record.picker_id == picker.id);
                PickerShift::from_roster(picker, attendance, now)
            })
            .collect()
    }

    pub fn payroll(&self, now: i64) -> PayrollSummary {
        calculate_payroll(&self.shifts(now), WageRates::from(&self.settings))
    }

    fn recompute_violations(&mut self, now: i64) {
        self.violations = assess_crew(&self.shifts(now), WageRates::from(&self.settings));
    }
}

/// What changed in the state
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    CrewChanged,
    AttendanceChanged,
    SettingsChanged(HarvestSettings),
    QueueChanged(QueueStats),
    ViolationsChanged(Vec<ComplianceViolation>),
    SyncChanged(SyncStatus),
}

/// Shared state for one orchard
pub struct AppState<R> {
    db: DatabaseService,
    remote: R,
    clock: fn() -> i64,
    state: RwLock<StateSnapshot>,
    settings_lock: Mutex<()>,
    events: broadcast::Sender<StateEvent>,
}

impl<R: RemoteStore> AppState<R> {
    /// Load the state for `orchard_id` from the local store.
    pub async fn load(db: DatabaseService, remote: R, orchard_id: &str) -> Result<Self> {
        Self::load_with_clock(db, remote, orchard_id, now_millis).await
    }

    /// Load with an explicit clock, used to pin "today" and shift lengths.
    pub async fn load_with_clock(
        db: DatabaseService,
        remote: R,
        orchard_id: &str,
        clock: fn() -> i64,
    ) -> Result<Self> {
        let snapshot = StateSnapshot::load(&db, orchard_id, clock()).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            db,
            remote,
            clock,
            state: RwLock::new(snapshot),
            settings_lock: Mutex::new(()),
            events,
        })
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.db
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.read().await.clone()
    }

    /// Re-read every slice from the local store.
    pub async fn refresh(&self) -> Result<()> {
        let orchard_id = self.state.read().await.orchard_id.clone();
        let fresh = StateSnapshot::load(&self.db, &orchard_id, (self.clock)()).await?;

        let (queue, violations) = {
            let mut state = self.state.write().await;
            let sync = state.sync.clone();
            *state = StateSnapshot { sync, ..fresh };
            (state.queue, state.violations.clone())
        };
        self.emit(StateEvent::CrewChanged);
        self.emit(StateEvent::AttendanceChanged);
        self.emit(StateEvent::QueueChanged(queue));
        self.emit(StateEvent::ViolationsChanged(violations));
        Ok(())
    }

    /// Fold an accepted scan into the crew and queue slices.
    pub async fn record_scan(&self, receipt: &ScanReceipt) {
        let now = (self.clock)();
        let (queue, violations) = {
            let mut state = self.state.write().await;
            upsert_picker(&mut state.crew, receipt.picker.clone());
            state.queue.pending += 1;
            state.recompute_violations(now);
            (state.queue, state.violations.clone())
        };
        self.emit(StateEvent::CrewChanged);
        self.emit(StateEvent::QueueChanged(queue));
        self.emit(StateEvent::ViolationsChanged(violations));
    }

    /// Fold a check-in, check-out or break into today's attendance.
    pub async fn record_attendance(&self, record: AttendanceRecord) {
        let now = (self.clock)();
        let violations = {
            let mut state = self.state.write().await;
            if record.date != day_of(now) {
                return;
            }
            match state
                .attendance
                .iter_mut()
                .find(|existing| existing.picker_id == record.picker_id)
            {
                Some(existing) => *existing = record,
                None => state.attendance.push(record),
            }
            state.recompute_violations(now);
            state.violations.clone()
        };
        self.emit(StateEvent::AttendanceChanged);
        self.emit(StateEvent::ViolationsChanged(violations));
    }

    /// Change a picker's status at once; undone if it cannot be persisted.
    pub async fn set_picker_status(
        &self,
        picker_id: &str,
        status: PickerStatus,
    ) -> Result<QueueEntry> {
        let picker = self
            .state
            .read()
            .await
            .crew
            .iter()
            .find(|picker| picker.id == picker_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("picker {picker_id}")))?;

        let result = apply_with_rollback(
            &self.state,
            |state| {
                let previous = picker.status;
                if let Some(member) = state.crew.iter_mut().find(|p| p.id == picker.id) {
                    member.status = status;
                }
                previous
            },
            || change_picker_status(&self.db, &picker, status),
            |state, previous| {
                if let Some(member) = state.crew.iter_mut().find(|p| p.id == picker.id) {
                    member.status = previous;
                }
            },
        )
        .await;
        self.emit(StateEvent::CrewChanged);

        let entry = result?;
        let queue = {
            let mut state = self.state.write().await;
            state.queue.pending += 1;
            state.queue
        };
        self.emit(StateEvent::QueueChanged(queue));
        Ok(entry)
    }

    pub async fn set_sync_status(&self, status: SyncStatus) {
        self.state.write().await.sync = status.clone();
        self.emit(StateEvent::SyncChanged(status));
    }

    /// Re-count both queues, typically after a drain.
    pub async fn refresh_queue_stats(&self) -> Result<QueueStats> {
        let queue = QueueStats {
            pending: self.db.queue_len().await?,
            dead_letters: self.db.dead_letter_count().await?,
        };
        self.state.write().await.queue = queue;
        self.emit(StateEvent::QueueChanged(queue));
        Ok(queue)
    }

    /// Recompute violations for the current time.
    pub async fn recompute_violations(&self) -> Vec<ComplianceViolation> {
        let now = (self.clock)();
        let violations = {
            let mut state = self.state.write().await;
            state.recompute_violations(now);
            state.violations.clone()
        };
        self.emit(StateEvent::ViolationsChanged(violations.clone()));
        violations
    }

    /// Update the orchard's settings.
    ///
    /// The new values apply locally at once. The remote write only lands if
    /// nobody changed the settings since they were loaded; on a lost race the
    /// winner's values are reloaded and `Error::SettingsConflict` is returned.
    /// Any other failure restores the previous values.
    pub async fn update_settings(&self, settings: HarvestSettings) -> Result<HarvestSettings> {
        settings.validate()?;
        let _serial = self.settings_lock.lock().await;

        let (orchard_id, before) = {
            let state = self.state.read().await;
            (state.orchard_id.clone(), state.settings.clone())
        };
        let expected = before.updated_at;
        if settings.orchard_id != orchard_id {
            return Err(Error::InvalidInput(format!(
                "settings are for orchard {}, not {orchard_id}",
                settings.orchard_id
            )));
        }

        let proposed = HarvestSettings {
            updated_at: (self.clock)().max(expected + 1),
            ..settings
        };
        let stored = apply_with_rollback(
            &self.state,
            |state| std::mem::replace(&mut state.settings, proposed.clone()),
            || async {
                self.remote
                    .update_settings_if_unchanged(&proposed, expected)
                    .await
                    .map_err(Error::from)
            },
            |state, previous| state.settings = previous,
        )
        .await;

        let stored = match stored {
            Ok(stored) => stored,
            Err(error) => {
                self.emit_settings().await;
                return Err(error);
            }
        };

        match stored {
            Some(stored) => {
                self.db.save_harvest_settings(&stored).await?;
                self.replace_settings(stored.clone()).await;
                tracing::info!("Updated harvest settings for {}", orchard_id);
                Ok(stored)
            }
            None => {
                let winner = match self.remote.fetch_settings(&orchard_id).await {
                    Ok(Some(latest)) => latest,
                    Ok(None) => before,
                    Err(error) => {
                        tracing::warn!("Could not reload settings after conflict: {}", error);
                        before
                    }
                };
                self.db.save_harvest_settings(&winner).await?;
                self.replace_settings(winner).await;
                tracing::warn!("Settings update for {} lost to a concurrent write", orchard_id);
                Err(Error::SettingsConflict(orchard_id))
            }
        }
    }

    /// Replace the cached settings with the remote's, if it has any.
    pub async fn pull_settings(&self) -> Result<HarvestSettings> {
        let orchard_id = self.state.read().await.orchard_id.clone();
        if let Some(remote) = self.remote.fetch_settings(&orchard_id).await? {
            self.db.save_harvest_settings(&remote).await?;
            self.replace_settings(remote).await;
        }
        Ok(self.state.read().await.settings.clone())
    }

    async fn replace_settings(&self, settings: HarvestSettings) {
        let now = (self.clock)();
        let violations = {
            let mut state = self.state.write().await;
            state.settings = settings.clone();
            state.recompute_violations(now);
            state.violations.clone()
        };
        self.emit(StateEvent::SettingsChanged(settings));
        self.emit(StateEvent::ViolationsChanged(violations));
    }

    async fn emit_settings(&self) {
        let settings = self.state.read().await.settings.clone();
        self.emit(StateEvent::SettingsChanged(settings));
    }

    fn emit(&self, event: StateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn upsert_picker(crew: &mut Vec<Picker>, picker: Picker) {
    match crew.iter_mut().find(|member| member.id == picker.id) {
        Some(member) => *member = picker,
        None => crew.push(picker),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compliance::ViolationKind;
    use crate::queue::{check_in, BucketScanner, ScanGuard};
    use crate::remote::InMemoryRemote;
    use crate::models::QualityGrade;
    use pretty_assertions::assert_eq;

    const HOUR: i64 = 3_600_000;
    // 2023-11-14T08:20:00Z
    const SHIFT_START: i64 = 1_699_950_000_000;

    const fn five_hours_in() -> i64 {
        SHIFT_START + 5 * HOUR
    }

    async fn orchard() -> (DatabaseService, Picker) {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let picker = Picker::new("P-7", "Mere", "orchard-1");
        db.save_picker(&picker).await.unwrap();
        check_in(&db, &picker, SHIFT_START).await.unwrap();
        (db, picker)
    }

    async fn state(
        db: DatabaseService,
        remote: Arc<InMemoryRemote>,
    ) -> AppState<Arc<InMemoryRemote>> {
        AppState::load_with_clock(db, remote, "orchard-1", five_hours_in)
            .await
            .unwrap()
    }

    fn kinds(violations: &[ComplianceViolation]) -> Vec<ViolationKind> {
        let mut kinds = violations.iter().map(|v| v.kind).collect::<Vec<_>>();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_computes_violations() {
        let (db, _) = orchard().await;
        let app = state(db, Arc::new(InMemoryRemote::new())).await;
        let snapshot = app.snapshot().await;

        assert_eq!(snapshot.crew.len(), 1);
        assert_eq!(snapshot.attendance.len(), 1);
        assert_eq!(snapshot.queue.pending, 1);
        assert_eq!(
            kinds(&snapshot.violations),
            vec![
                ViolationKind::BelowMinimumWage,
                ViolationKind::MealBreak,
                ViolationKind::RestBreak,
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scans_update_crew_and_queue() {
        let (db, _) = orchard().await;
        let app = state(db.clone(), Arc::new(InMemoryRemote::new())).await;
        let mut events = app.subscribe();

        let scanner = BucketScanner::new(db, "orchard-1", ScanGuard::new(i64::MAX));
        let receipt = scanner
            .scan_at("P-7", QualityGrade::A, SHIFT_START + HOUR)
            .await
            .unwrap();
        app.record_scan(&receipt).await;

        let snapshot = app.snapshot().await;
        assert_eq!(snapshot.crew[0].total_buckets_today, 1);
        assert_eq!(snapshot.queue.pending, 2);
        assert_eq!(events.recv().await.unwrap(), StateEvent::CrewChanged);
        assert!(matches!(
            events.recv().await.unwrap(),
            StateEvent::QueueChanged(QueueStats { pending: 2, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn breaks_clear_break_violations() {
        let (db, picker) = orchard().await;
        let app = state(db.clone(), Arc::new(InMemoryRemote::new())).await;

        crate::queue::record_break(&db, &picker, five_hours_in() - 30 * 60_000, true)
            .await
            .unwrap();
        let record = db
            .attendance_for(&picker.id, day_of(SHIFT_START))
            .await
            .unwrap()
            .unwrap();
        app.record_attendance(record).await;

        assert_eq!(
            kinds(&app.snapshot().await.violations),
            vec![ViolationKind::BelowMinimumWage]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_change_is_optimistic() {
        let (db, picker) = orchard().await;
        let app = state(db.clone(), Arc::new(InMemoryRemote::new())).await;

        app.set_picker_status(&picker.id, PickerStatus::Break)
            .await
            .unwrap();
        assert_eq!(app.snapshot().await.crew[0].status, PickerStatus::Break);
        assert_eq!(
            db.get_picker(&picker.id).await.unwrap().unwrap().status,
            PickerStatus::Break
        );
        assert_eq!(app.snapshot().await.queue.pending, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_change_rolls_back_when_not_persisted() {
        let (db, _) = orchard().await;
        let app = state(db, Arc::new(InMemoryRemote::new())).await;
        let ghost = Picker::new("P-9", "Nobody", "orchard-1");
        app.state.write().await.crew.push(ghost.clone());

        let result = app
            .set_picker_status(&ghost.id, PickerStatus::Archived)
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        let snapshot = app.snapshot().await;
        let member = snapshot.crew.iter().find(|p| p.id == ghost.id).unwrap();
        assert_eq!(member.status, PickerStatus::Active);
        assert_eq!(snapshot.queue.pending, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn settings_update_lands_and_recomputes() {
        let (db, _) = orchard().await;
        let remote = Arc::new(InMemoryRemote::new());
        let app = state(db.clone(), remote.clone()).await;

        // 5 hours at a zero minimum wage owes nothing
        let stored = app
            .update_settings(HarvestSettings {
                min_wage_rate: 0.0,
                ..HarvestSettings::for_orchard("orchard-1")
            })
            .await
            .unwrap();

        assert_eq!(stored.updated_at, five_hours_in());
        assert_eq!(
            remote.fetch_settings("orchard-1").await.unwrap(),
            Some(stored.clone())
        );
        assert_eq!(db.load_harvest_settings("orchard-1").await.unwrap(), stored);
        assert!(!kinds(&app.snapshot().await.violations).contains(&ViolationKind::BelowMinimumWage));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lost_settings_race_reloads_winner() {
        let (db, _) = orchard().await;
        let remote = Arc::new(InMemoryRemote::new());
        let app = state(db.clone(), remote.clone()).await;

        let winner = HarvestSettings {
            piece_rate: 8.0,
            updated_at: 999,
            ..HarvestSettings::for_orchard("orchard-1")
        };
        remote.put_settings(winner.clone()).await;

        let result = app
            .update_settings(HarvestSettings {
                piece_rate: 7.0,
                ..HarvestSettings::for_orchard("orchard-1")
            })
            .await;

        assert!(matches!(result, Err(Error::SettingsConflict(_))));
        assert_eq!(app.snapshot().await.settings, winner);
        assert_eq!(db.load_harvest_settings("orchard-1").await.unwrap(), winner);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_settings_update_restores_previous() {
        let (db, _) = orchard().await;
        let remote = Arc::new(InMemoryRemote::new());
        let app = state(db, remote.clone()).await;
        let before = app.snapshot().await.settings;
        remote.set_offline(true);

        let result = app
            .update_settings(HarvestSettings {
                piece_rate: 9.0,
                ..HarvestSettings::for_orchard("orchard-1")
            })
            .await;

        assert!(matches!(result, Err(Error::Remote(_))));
        assert_eq!(app.snapshot().await.settings, before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn settings_for_another_orchard_are_refused() {
        let (db, _) = orchard().await;
        let app = state(db, Arc::new(InMemoryRemote::new())).await;

        let result = app
            .update_settings(HarvestSettings::for_orchard("orchard-2"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
