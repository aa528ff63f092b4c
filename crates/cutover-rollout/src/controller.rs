//! Rollout controller — drives the rollout state machine.
//!
//! The controller advances through the phase table, soaking each new phase
//! under a fixed polling schedule, and rolls back on failure.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use cutover_core::{
    epoch_millis, next_phase_after, phase_for_percentage, RolloutPhase, RolloutSettings, PHASES,
};
use cutover_flags::{FlagStore, FlagUpdate};
use cutover_health::checker::{
    build_metrics, probe_consistency, probe_join_performance, probe_legacy_read,
    probe_migrated_read,
};
use cutover_health::{HealthCheckResult, HealthThresholds, MetricsHistory, RolloutMetrics};
use cutover_scheduler::{Liveness, Scheduler, TickFn, TickFuture};
use cutover_state::MigrationStorage;

use crate::error::{RolloutError, RolloutResult};

/// Scheduler task name of the controller's metrics loop.
pub const METRICS_TASK: &str = "rollout-metrics";

/// Actor recorded on phase changes.
pub const ROLLOUT_ACTOR: &str = "rollout_controller";

/// Retention of the controller's metrics samples.
const METRICS_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Current state of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutState {
    /// Not started.
    Idle,
    /// Metrics loop running at the given phase percentage.
    Monitoring { percentage: u8 },
    /// Rolled back. Terminal until the emergency flag is cleared and the
    /// rollout started again.
    RolledBack { reason: String },
}

struct ControllerInner {
    flags: FlagStore,
    storage: Arc<dyn MigrationStorage>,
    settings: RolloutSettings,
    thresholds: HealthThresholds,
    scheduler: Scheduler,
    state: RwLock<RolloutState>,
    history: RwLock<MetricsHistory>,
    /// Serializes start_rollout.
    lifecycle: Mutex<()>,
    /// Serializes phase transitions.
    transition: Mutex<()>,
}

/// Phase-by-phase rollout driver. Clones share state.
#[derive(Clone)]
pub struct RolloutController {
    inner: Arc<ControllerInner>,
}

impl RolloutController {
    pub fn new(
        flags: FlagStore,
        storage: Arc<dyn MigrationStorage>,
        settings: RolloutSettings,
        scheduler: Scheduler,
    ) -> Self {
        let thresholds = HealthThresholds {
            max_response_time_ms: settings.query_budget_ms as f64,
            min_consistency_pct: settings.min_consistency_pct,
            ..HealthThresholds::default()
        };
        Self {
            inner: Arc::new(ControllerInner {
                flags,
                storage,
                thresholds,
                scheduler,
                state: RwLock::new(RolloutState::Idle),
                history: RwLock::new(MetricsHistory::new(METRICS_WINDOW)),
                lifecycle: Mutex::new(()),
                transition: Mutex::new(()),
                settings,
            }),
        }
    }

    pub async fn state(&self) -> RolloutState {
        self.inner.state.read().await.clone()
    }

    /// Phase derived from the persisted percentage. Phase 0 while an
    /// emergency rollback is active.
    pub async fn current_phase(&self) -> &'static RolloutPhase {
        let flags = self.inner.flags.get_flags().await;
        if flags.emergency_rollback {
            &PHASES[0]
        } else {
            phase_for_percentage(flags.percentage)
        }
    }

    /// Begin monitoring at the current phase. No-op if already monitoring.
    pub async fn start_rollout(&self) -> RolloutResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if matches!(self.state().await, RolloutState::Monitoring { .. })
            && self.inner.scheduler.is_scheduled(METRICS_TASK).await
        {
            info!("rollout already monitoring");
            return Ok(());
        }

        match self.begin().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = format!("start_rollout failed: {e}");
                if let Err(rollback_err) = self.emergency_rollback(&reason).await {
                    error!(error = %rollback_err, "emergency rollback after failed start also failed");
                }
                Err(e)
            }
        }
    }

    async fn begin(&self) -> RolloutResult<()> {
        self.inner.flags.invalidate_cache().await;
        let flags = self.inner.flags.get_flags().await;
        if flags.emergency_rollback {
            return Err(RolloutError::EmergencyActive);
        }
        let phase = phase_for_percentage(flags.percentage);

        let controller = self.clone();
        let tick: TickFn = Arc::new(move |liveness: Liveness| -> TickFuture {
            let controller = controller.clone();
            Box::pin(async move {
                controller.metrics_tick(&liveness).await;
            })
        });
        self.inner
            .scheduler
            .schedule(METRICS_TASK, self.inner.settings.metrics_interval, tick)
            .await?;

        *self.inner.state.write().await = RolloutState::Monitoring {
            percentage: phase.percentage,
        };
        info!(
            percentage = phase.percentage,
            phase = phase.description,
            "rollout started"
        );
        Ok(())
    }

    /// Move to the next phase and soak it.
    ///
    /// Returns the phase advanced to, or `None` when already at 100 %.
    pub async fn advance_to_next_phase(&self) -> RolloutResult<Option<&'static RolloutPhase>> {
        let _guard = self.inner.transition.lock().await;
        match self.try_advance().await {
            Ok(phase) => Ok(phase),
            Err(e) => {
                let reason = format!("advance_to_next_phase failed: {e}");
                if let Err(rollback_err) = self.emergency_rollback(&reason).await {
                    error!(error = %rollback_err, "emergency rollback after failed advance also failed");
                }
                Err(e)
            }
        }
    }

    async fn try_advance(&self) -> RolloutResult<Option<&'static RolloutPhase>> {
        self.inner.flags.invalidate_cache().await;
        let flags = self.inner.flags.get_flags().await;
        if flags.emergency_rollback {
            return Err(RolloutError::EmergencyActive);
        }

        let current = phase_for_percentage(flags.percentage);
        let Some(next) = next_phase_after(flags.percentage) else {
            info!(percentage = current.percentage, "already at the final phase");
            return Ok(None);
        };

        info!(
            from = current.percentage,
            to = next.percentage,
            reads = next.enable_reads,
            writes = next.enable_writes,
            "advancing rollout phase"
        );
        self.inner
            .flags
            .update_flags(
                FlagUpdate::phase(next.enable_reads, next.enable_writes, next.percentage),
                ROLLOUT_ACTOR,
            )
            .await?;
        *self.inner.state.write().await = RolloutState::Monitoring {
            percentage: next.percentage,
        };

        self.monitor_phase_transition(next.percentage).await?;
        info!(percentage = next.percentage, phase = next.description, "phase stable");
        Ok(Some(next))
    }

    /// Poll the probes across the soak window.
    ///
    /// Rolls back and fails as soon as one poll has too many failed probes
    /// or failures accumulate past the soak budget. Fails with
    /// `EmergencyActive` when the persisted flags were rolled back by
    /// someone else mid-soak.
    pub async fn monitor_phase_transition(&self, target: u8) -> RolloutResult<()> {
        let settings = &self.inner.settings;
        let poll_ms = settings.poll_interval.as_millis().max(1);
        let polls = (settings.soak_window.as_millis() / poll_ms).max(1) as u32;
        let mut cumulative = 0u32;

        debug!(target, polls, "soaking phase");
        for poll in 1..=polls {
            tokio::time::sleep(settings.poll_interval).await;

            self.inner.flags.invalidate_cache().await;
            let flags = self.inner.flags.get_flags().await;
            if flags.emergency_rollback {
                warn!(target, poll, updated_by = %flags.updated_by, "emergency rollback set during soak");
                self.observe_external_rollback(format!(
                    "emergency rollback set by {} during the transition to {target}%",
                    flags.updated_by
                ))
                .await;
                return Err(RolloutError::EmergencyActive);
            }

            let results = self.perform_health_checks().await;
            let failed = results.iter().filter(|r| !r.success()).count() as u32;
            self.record_metrics(&results, target).await;

            if failed > settings.max_failed_probes_per_poll {
                error!(target, poll, failed, "too many critical errors in soak poll");
                let reason = format!(
                    "{failed} probes failed in one soak poll of the transition to {target}%"
                );
                self.emergency_rollback(&reason).await?;
                return Err(RolloutError::TooManyCriticalErrors { target, failed });
            }

            cumulative += failed;
            for result in results.iter().filter(|r| !r.success()) {
                warn!(
                    target,
                    poll,
                    probe = %result.probe,
                    error = result.error().unwrap_or_default(),
                    "soak probe failed"
                );
            }

            if cumulative >= settings.max_soak_errors {
                let reason = format!(
                    "{cumulative} probe errors during the soak window of the transition to {target}%"
                );
                self.emergency_rollback(&reason).await?;
                return Err(RolloutError::SoakErrorsExceeded {
                    target,
                    errors: cumulative,
                });
            }
            debug!(target, poll, failed, cumulative, "soak poll completed");
        }
        Ok(())
    }

    /// The four soak probes against the effective percentage.
    pub async fn perform_health_checks(&self) -> Vec<HealthCheckResult> {
        let percentage = self.inner.flags.effective_percentage().await;
        let storage = &*self.inner.storage;
        let settings = &self.inner.settings;

        let (legacy, migrated, consistency, join) = tokio::join!(
            probe_legacy_read(storage, settings.sample_size),
            probe_migrated_read(storage, settings.sample_size),
            probe_consistency(storage, percentage, settings.min_consistency_pct),
            probe_join_performance(storage, settings.sample_size, settings.query_budget_ms as f64),
        );
        vec![legacy, migrated, consistency, join]
    }

    /// Stop the metrics loop and roll the flags back.
    ///
    /// Keeps the first reason if this controller already rolled back. The
    /// flag write itself is idempotent.
    pub async fn emergency_rollback(&self, reason: &str) -> RolloutResult<()> {
        let already = matches!(self.state().await, RolloutState::RolledBack { .. });
        if already {
            debug!(%reason, "rollout already rolled back, re-asserting flags");
        } else {
            error!(%reason, "emergency rollback");
        }

        self.inner.scheduler.cancel(METRICS_TASK).await;
        let result = self.inner.flags.emergency_rollback().await;
        if !already {
            *self.inner.state.write().await = RolloutState::RolledBack {
                reason: reason.to_string(),
            };
        }
        result?;
        Ok(())
    }

    pub async fn get_metrics_history(&self) -> Vec<RolloutMetrics> {
        self.inner.history.read().await.samples()
    }

    async fn record_metrics(&self, results: &[HealthCheckResult], percentage: u8) {
        let metrics = build_metrics(results, percentage, &self.inner.thresholds, epoch_millis());
        let mut history = self.inner.history.read().await.clone();
        history.push(metrics);
        *self.inner.history.write().await = history;
    }

    /// Stop the metrics loop after a rollback this controller did not make.
    /// The flags are already rolled back, so nothing is written.
    async fn observe_external_rollback(&self, reason: String) {
        self.inner.scheduler.cancel(METRICS_TASK).await;
        let mut state = self.inner.state.write().await;
        if !matches!(*state, RolloutState::RolledBack { .. }) {
            *state = RolloutState::RolledBack { reason };
        }
    }

    async fn metrics_tick(&self, liveness: &Liveness) {
        let flags = self.inner.flags.get_flags().await;
        if !liveness.is_alive() {
            return;
        }
        if flags.emergency_rollback {
            warn!("emergency rollback flag set, stopping rollout metrics");
            self.observe_external_rollback(format!(
                "emergency rollback set by {}",
                flags.updated_by
            ))
            .await;
            return;
        }

        let results = self.perform_health_checks().await;
        if !liveness.is_alive() {
            debug!("rollout metrics loop stopped mid-tick, discarding results");
            return;
        }
        self.record_metrics(&results, flags.percentage).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cutover_core::FlagSettings;
    use cutover_state::{
        BoxFuture, DataRecord, JoinedRow, StateError, StateResult, StateStore, StorageTable,
    };

    /// Storage where the selected operations fail.
    #[derive(Default)]
    struct FaultyStorage {
        fail_legacy: bool,
        fail_migrated: bool,
        fail_counts: bool,
        fail_join: bool,
    }

    impl FaultyStorage {
        fn all() -> Self {
            Self {
                fail_legacy: true,
                fail_migrated: true,
                fail_counts: true,
                fail_join: true,
            }
        }

        fn check<T>(fail: bool, value: T) -> StateResult<T> {
            if fail {
                Err(StateError::Unavailable("injected".into()))
            } else {
                Ok(value)
            }
        }
    }

    impl MigrationStorage for FaultyStorage {
        fn ping(&self) -> BoxFuture<'_, StateResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn count_active(&self, _table: StorageTable) -> BoxFuture<'_, StateResult<u64>> {
            Box::pin(async move { Self::check(self.fail_counts, 0) })
        }
        fn select_sample(
            &self,
            table: StorageTable,
            _limit: usize,
        ) -> BoxFuture<'_, StateResult<Vec<serde_json::Value>>> {
            let fail = match table {
                StorageTable::Legacy => self.fail_legacy,
                _ => self.fail_migrated,
            };
            Box::pin(async move { Self::check(fail, Vec::new()) })
        }
        fn probe_write(&self) -> BoxFuture<'_, StateResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn join_sample(&self, _limit: usize) -> BoxFuture<'_, StateResult<Vec<JoinedRow>>> {
            Box::pin(async move { Self::check(self.fail_join, Vec::new()) })
        }
    }

    /// Storage whose sample reads take `delay` to answer.
    struct SlowStorage {
        delay: Duration,
    }

    impl MigrationStorage for SlowStorage {
        fn ping(&self) -> BoxFuture<'_, StateResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn count_active(&self, _table: StorageTable) -> BoxFuture<'_, StateResult<u64>> {
            Box::pin(async { Ok(0) })
        }
        fn select_sample(
            &self,
            _table: StorageTable,
            _limit: usize,
        ) -> BoxFuture<'_, StateResult<Vec<serde_json::Value>>> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(Vec::new())
            })
        }
        fn probe_write(&self) -> BoxFuture<'_, StateResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn join_sample(&self, _limit: usize) -> BoxFuture<'_, StateResult<Vec<JoinedRow>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn seeded_store(legacy: usize, migrated: usize) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for (table, count) in [(StorageTable::Legacy, legacy), (StorageTable::Migrated, migrated)] {
            for i in 0..count {
                store
                    .put_record(
                        table,
                        &DataRecord {
                            id: format!("r{i}"),
                            active: true,
                            payload: serde_json::json!({ "n": i }),
                            updated_at: 1,
                        },
                    )
                    .unwrap();
            }
        }
        store
    }

    fn controller_with(
        state: &StateStore,
        storage: Arc<dyn MigrationStorage>,
    ) -> (RolloutController, FlagStore) {
        let flags = FlagStore::new(Arc::new(state.clone()), &FlagSettings::default());
        let controller = RolloutController::new(
            flags.clone(),
            storage,
            RolloutSettings::default(),
            Scheduler::new(),
        );
        (controller, flags)
    }

    #[tokio::test(start_paused = true)]
    async fn advance_is_a_noop_at_full_rollout() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        flags
            .update_flags(FlagUpdate::phase(true, true, 100), "operator")
            .await
            .unwrap();
        let before = flags.get_flags().await;
        let audit_before = state.list_flag_audit(100).unwrap().len();

        let advanced = controller.advance_to_next_phase().await.unwrap();
        assert!(advanced.is_none());
        assert_eq!(flags.get_flags().await, before);
        assert_eq!(state.list_flag_audit(100).unwrap().len(), audit_before);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_soak_advances_one_phase() {
        let state = seeded_store(100, 100);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));

        let phase = controller.advance_to_next_phase().await.unwrap().unwrap();
        assert_eq!(phase.percentage, 10);

        let current = flags.get_flags().await;
        assert_eq!(current.percentage, 10);
        assert!(current.read_enabled);
        assert!(!current.write_enabled);
        assert_eq!(current.updated_by, ROLLOUT_ACTOR);
        assert_eq!(controller.state().await, RolloutState::Monitoring { percentage: 10 });
        // 5 minute window polled every 30 seconds.
        assert_eq!(controller.get_metrics_history().await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_enable_at_fifty_percent() {
        let state = seeded_store(100, 100);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        flags
            .update_flags(FlagUpdate::phase(true, false, 25), "operator")
            .await
            .unwrap();

        let phase = controller.advance_to_next_phase().await.unwrap().unwrap();
        assert_eq!(phase.percentage, 50);
        let current = flags.get_flags().await;
        assert!(current.read_enabled && current.write_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn all_probes_failing_rolls_back_naming_target() {
        let state = seeded_store(0, 0);
        let (controller, flags) = controller_with(&state, Arc::new(FaultyStorage::all()));

        let err = controller.advance_to_next_phase().await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::TooManyCriticalErrors { target: 10, failed: 4 }
        ));

        let current = flags.get_flags().await;
        assert!(current.emergency_rollback);
        assert!(!current.read_enabled);
        assert_eq!(current.percentage, 0);

        match controller.state().await {
            RolloutState::RolledBack { reason } => assert!(reason.contains("10%"), "{reason}"),
            other => panic!("expected rolled back, got {other:?}"),
        }
        // The first poll failed, nothing after it ran.
        assert_eq!(controller.get_metrics_history().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cumulative_soak_errors_roll_back() {
        let state = seeded_store(0, 0);
        let storage = FaultyStorage {
            fail_migrated: true,
            fail_join: true,
            ..FaultyStorage::default()
        };
        let (controller, flags) = controller_with(&state, Arc::new(storage));

        let err = controller.advance_to_next_phase().await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::SoakErrorsExceeded { target: 10, errors: 10 }
        ));
        assert!(flags.is_emergency_active().await);
        // Two failures per poll reach the budget of ten on the fifth poll.
        assert_eq!(controller.get_metrics_history().await.len(), 5);
        match controller.state().await {
            RolloutState::RolledBack { reason } => assert!(reason.contains("10%"), "{reason}"),
            other => panic!("expected rolled back, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_per_poll_exhausts_budget_on_last_poll() {
        let state = seeded_store(0, 0);
        let storage = FaultyStorage {
            fail_join: true,
            ..FaultyStorage::default()
        };
        let (controller, flags) = controller_with(&state, Arc::new(storage));

        let err = controller.advance_to_next_phase().await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::SoakErrorsExceeded { target: 10, errors: 10 }
        ));
        assert!(flags.is_emergency_active().await);
        assert_eq!(controller.get_metrics_history().await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_under_budget_are_tolerated() {
        let state = seeded_store(0, 0);
        let storage = FaultyStorage {
            fail_join: true,
            ..FaultyStorage::default()
        };
        let flags = FlagStore::new(Arc::new(state.clone()), &FlagSettings::default());
        let settings = RolloutSettings {
            max_soak_errors: 11,
            ..RolloutSettings::default()
        };
        let controller =
            RolloutController::new(flags.clone(), Arc::new(storage), settings, Scheduler::new());

        let phase = controller.advance_to_next_phase().await.unwrap().unwrap();
        assert_eq!(phase.percentage, 10);
        assert!(!flags.is_emergency_active().await);
        assert_eq!(flags.get_flags().await.percentage, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_refuses_while_rolled_back() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        flags.emergency_rollback().await.unwrap();

        let err = controller.advance_to_next_phase().await.unwrap_err();
        assert!(matches!(err, RolloutError::EmergencyActive));
        assert_eq!(flags.get_flags().await.percentage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let state = seeded_store(10, 10);
        let (controller, _flags) = controller_with(&state, Arc::new(state.clone()));

        controller.start_rollout().await.unwrap();
        controller.start_rollout().await.unwrap();
        assert_eq!(controller.state().await, RolloutState::Monitoring { percentage: 0 });
        assert!(controller.inner.scheduler.is_scheduled(METRICS_TASK).await);
    }

    #[tokio::test(start_paused = true)]
    async fn start_refuses_active_emergency_and_resumes_after_clear() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        flags.emergency_rollback().await.unwrap();

        let err = controller.start_rollout().await.unwrap_err();
        assert!(matches!(err, RolloutError::EmergencyActive));
        assert!(matches!(controller.state().await, RolloutState::RolledBack { .. }));

        flags.clear_emergency_rollback("operator").await.unwrap();
        controller.start_rollout().await.unwrap();
        assert_eq!(controller.state().await, RolloutState::Monitoring { percentage: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn current_phase_follows_persisted_percentage() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        assert_eq!(controller.current_phase().await.percentage, 0);

        flags
            .update_flags(FlagUpdate::phase(true, true, 50), "operator")
            .await
            .unwrap();
        assert_eq!(controller.current_phase().await.percentage, 50);

        flags.emergency_rollback().await.unwrap();
        assert_eq!(controller.current_phase().await.percentage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_loop_records_samples() {
        let state = seeded_store(10, 10);
        let (controller, _flags) = controller_with(&state, Arc::new(state.clone()));

        controller.start_rollout().await.unwrap();
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(controller.get_metrics_history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_loop_stops_on_external_rollback() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));

        controller.start_rollout().await.unwrap();
        flags.emergency_rollback().await.unwrap();
        tokio::time::sleep(Duration::from_secs(70)).await;

        assert!(matches!(controller.state().await, RolloutState::RolledBack { .. }));
        assert!(!controller.inner.scheduler.is_scheduled(METRICS_TASK).await);
        assert!(controller.get_metrics_history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_recorded_once() {
        let state = seeded_store(10, 10);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));
        controller.start_rollout().await.unwrap();

        controller.emergency_rollback("first").await.unwrap();
        controller.emergency_rollback("second").await.unwrap();

        assert_eq!(
            controller.state().await,
            RolloutState::RolledBack { reason: "first".to_string() }
        );
        assert!(flags.is_emergency_active().await);
        assert!(!controller.inner.scheduler.is_scheduled(METRICS_TASK).await);
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_during_soak_fails_the_advance() {
        let state = seeded_store(100, 100);
        let (controller, flags) = controller_with(&state, Arc::new(state.clone()));

        let external = {
            let flags = flags.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(65)).await;
                flags.emergency_rollback().await.unwrap();
            })
        };

        let err = controller.advance_to_next_phase().await.unwrap_err();
        external.await.unwrap();
        assert!(matches!(err, RolloutError::EmergencyActive));

        match controller.state().await {
            RolloutState::RolledBack { reason } => {
                assert!(reason.contains("10%"), "{reason}");
                assert!(reason.contains(cutover_core::EMERGENCY_ACTOR), "{reason}");
            }
            other => panic!("expected rolled back, got {other:?}"),
        }
        let current = flags.get_flags().await;
        assert!(current.emergency_rollback);
        assert_eq!(current.percentage, 0);
        // Polls at 30s and 60s ran, the one at 90s saw the rollback.
        assert_eq!(controller.get_metrics_history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn soak_rolls_back_on_too_many_failures_when_called_directly() {
        let state = seeded_store(0, 0);
        let (controller, flags) = controller_with(&state, Arc::new(FaultyStorage::all()));
        flags
            .update_flags(FlagUpdate::phase(true, false, 25), "operator")
            .await
            .unwrap();

        let err = controller.monitor_phase_transition(25).await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::TooManyCriticalErrors { target: 25, failed: 4 }
        ));
        assert!(flags.is_emergency_active().await);
        assert_eq!(flags.get_flags().await.percentage, 0);
        match controller.state().await {
            RolloutState::RolledBack { reason } => assert!(reason.contains("25%"), "{reason}"),
            other => panic!("expected rolled back, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_metrics_interval_fails_start() {
        let state = seeded_store(10, 10);
        let flags = FlagStore::new(Arc::new(state.clone()), &FlagSettings::default());
        let settings = RolloutSettings {
            metrics_interval: Duration::ZERO,
            ..RolloutSettings::default()
        };
        let controller = RolloutController::new(
            flags.clone(),
            Arc::new(state.clone()),
            settings,
            Scheduler::new(),
        );

        let err = controller.start_rollout().await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::Scheduler(cutover_scheduler::SchedulerError::InvalidPeriod(_))
        ));
        assert!(!controller.inner.scheduler.is_scheduled(METRICS_TASK).await);
        assert!(matches!(controller.state().await, RolloutState::RolledBack { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_tick_in_flight_at_stop_is_discarded() {
        let state = seeded_store(0, 0);
        let storage = SlowStorage {
            delay: Duration::from_secs(30),
        };
        let (controller, _flags) = controller_with(&state, Arc::new(storage));

        controller.start_rollout().await.unwrap();
        // The first tick starts at 60s and waits on storage until 90s.
        tokio::time::sleep(Duration::from_secs(75)).await;
        controller.emergency_rollback("operator halt").await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(controller.get_metrics_history().await.is_empty());
        assert!(!controller.inner.scheduler.is_scheduled(METRICS_TASK).await);
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(RolloutState::Monitoring { percentage: 25 }).unwrap();
        assert_eq!(json["state"], "monitoring");
        assert_eq!(json["percentage"], 25);
    }
}
