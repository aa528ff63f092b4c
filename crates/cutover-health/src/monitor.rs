//! Health monitor — continuous evaluation loop with automatic rollback.
//!
//! The `HealthMonitor` runs every probe on a fixed interval, keeps a
//! time-windowed metrics history and an alert log, and rolls the migration
//! back after sustained pipeline failures.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cutover_core::{epoch_millis, MonitorSettings};
use cutover_flags::FlagStore;
use cutover_scheduler::{Liveness, Scheduler, TickFn, TickFuture};
use cutover_state::MigrationStorage;

use crate::alerts::AlertLog;
use crate::checker::{
    build_metrics, evaluate_system_health, probe_audit_log, probe_connectivity, probe_consistency,
    probe_flag_invariants, probe_read_performance, probe_write_path,
};
use crate::error::{MonitorError, MonitorResult};
use crate::events::{EventBus, EventCallback, MonitorEvent, SubscriptionId};
use crate::history::MetricsHistory;
use crate::types::{
    Alert, AlertCondition, AlertType, HealthCheckResult, HealthLevel, HealthThresholds,
    RolloutMetrics, SystemHealthStatus,
};

/// Scheduler task name of the evaluation loop.
pub const MONITOR_TASK: &str = "health-monitor";

struct MonitorInner {
    flags: FlagStore,
    storage: Arc<dyn MigrationStorage>,
    settings: MonitorSettings,
    thresholds: HealthThresholds,
    scheduler: Scheduler,
    events: EventBus,
    /// Serializes start/stop.
    lifecycle: Mutex<()>,
    history: RwLock<MetricsHistory>,
    alerts: RwLock<AlertLog>,
    latest: RwLock<Option<(RolloutMetrics, HealthLevel)>>,
    started_at: RwLock<Option<Instant>>,
    consecutive_failures: AtomicU32,
    rollback_fired: AtomicBool,
}

/// Continuous health evaluation. Clones share one loop and one state.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        flags: FlagStore,
        storage: Arc<dyn MigrationStorage>,
        settings: MonitorSettings,
        scheduler: Scheduler,
    ) -> Self {
        let thresholds = HealthThresholds::from_settings(&settings);
        let history = MetricsHistory::new(settings.metrics_window);
        Self {
            inner: Arc::new(MonitorInner {
                flags,
                storage,
                thresholds,
                scheduler,
                events: EventBus::new(),
                lifecycle: Mutex::new(()),
                history: RwLock::new(history),
                alerts: RwLock::new(AlertLog::new()),
                latest: RwLock::new(None),
                started_at: RwLock::new(None),
                consecutive_failures: AtomicU32::new(0),
                rollback_fired: AtomicBool::new(false),
                settings,
            }),
        }
    }

    /// Evaluate once immediately, then every `interval`. No-op if running.
    pub async fn start(&self) -> MonitorResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running().await {
            info!("health monitor already running");
            return Ok(());
        }

        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        self.inner.rollback_fired.store(false, Ordering::SeqCst);
        *self.inner.started_at.write().await = Some(Instant::now());

        info!(
            interval_ms = self.inner.settings.interval.as_millis() as u64,
            "health monitor starting"
        );
        self.inner.events.publish(MonitorEvent::MonitoringStarted).await;

        self.evaluate().await;
        if self.inner.rollback_fired.load(Ordering::SeqCst) {
            warn!("automatic rollback fired during the initial evaluation, loop not scheduled");
            return Ok(());
        }

        let monitor = self.clone();
        let tick: TickFn = Arc::new(move |liveness: Liveness| -> TickFuture {
            let monitor = monitor.clone();
            Box::pin(async move {
                monitor.run_tick(&liveness).await;
            })
        });
        if let Err(e) = self
            .inner
            .scheduler
            .schedule(MONITOR_TASK, self.inner.settings.interval, tick)
            .await
        {
            // Another component owns the task name.
            warn!(error = %e, "health monitor loop not scheduled");
        }
        Ok(())
    }

    /// Stop future ticks. No-op if not running.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.halt().await;
    }

    async fn halt(&self) {
        if self.inner.scheduler.cancel(MONITOR_TASK).await {
            info!("health monitor stopped");
            self.inner.events.publish(MonitorEvent::MonitoringStopped).await;
        } else {
            debug!("health monitor not running");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.scheduler.is_scheduled(MONITOR_TASK).await
    }

    /// Run one evaluation cycle now and apply its results.
    pub async fn evaluate(&self) -> SystemHealthStatus {
        let outcome = self.collect().await;
        self.apply(outcome).await
    }

    async fn run_tick(&self, liveness: &Liveness) {
        let outcome = self.collect().await;
        if !liveness.is_alive() {
            debug!("monitor stopped during evaluation, discarding results");
            return;
        }
        self.apply(outcome).await;
    }

    /// Read flags and run all probes concurrently.
    async fn collect(&self) -> MonitorResult<RolloutMetrics> {
        let flags = self.inner.flags.get_flags().await;
        let percentage = if flags.emergency_rollback {
            0
        } else {
            flags.percentage
        };
        let settings = &self.inner.settings;
        let budget_ms = settings.max_response_time_ms;
        let sample_size = settings.sample_size;
        let min_consistency = settings.min_consistency_pct;

        let mut probes: JoinSet<HealthCheckResult> = JoinSet::new();
        let storage = self.inner.storage.clone();
        probes.spawn(async move { probe_connectivity(&*storage).await });
        let storage = self.inner.storage.clone();
        probes.spawn(async move { probe_read_performance(&*storage, sample_size, budget_ms).await });
        let storage = self.inner.storage.clone();
        probes.spawn(async move { probe_write_path(&*storage, budget_ms).await });
        let storage = self.inner.storage.clone();
        probes.spawn(async move { probe_consistency(&*storage, percentage, min_consistency).await });
        let storage = self.inner.storage.clone();
        probes.spawn(async move { probe_audit_log(&*storage).await });

        let mut results = vec![probe_flag_invariants(&flags)];
        while let Some(joined) = probes.join_next().await {
            let result = joined.map_err(|e| MonitorError::ProbeTask(e.to_string()))?;
            results.push(result);
        }
        results.sort_by_key(|r| r.probe);

        for failed in results.iter().filter(|r| !r.success()) {
            debug!(probe = %failed.probe, error = failed.error().unwrap_or_default(), "probe failed");
        }

        Ok(build_metrics(&results, percentage, &self.inner.thresholds, epoch_millis()))
    }

    /// Record a cycle's outcome: history, classification, alerts, events,
    /// and escalation.
    async fn apply(&self, outcome: MonitorResult<RolloutMetrics>) -> SystemHealthStatus {
        let metrics = match outcome {
            Ok(metrics) => {
                self.inner.consecutive_failures.store(0, Ordering::SeqCst);
                metrics
            }
            Err(e) => {
                let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, failures, "health evaluation pipeline failed");
                let percentage = self.inner.flags.effective_percentage().await;
                let metrics = RolloutMetrics::pipeline_failure(percentage, epoch_millis());
                let status = self.record(metrics).await;
                if failures >= self.inner.settings.consecutive_failure_limit {
                    self.trigger_automatic_rollback(&format!(
                        "{failures} consecutive health evaluation failures, last: {e}"
                    ))
                    .await;
                }
                return status;
            }
        };

        let status = self.record(metrics).await;
        if status.status == HealthLevel::Critical && self.inner.settings.rollback_on_critical {
            self.trigger_automatic_rollback("system health classified critical")
                .await;
        }
        status
    }

    async fn record(&self, metrics: RolloutMetrics) -> SystemHealthStatus {
        let level = evaluate_system_health(&metrics, &self.inner.thresholds);

        let mut history = self.inner.history.read().await.clone();
        history.push(metrics.clone());
        *self.inner.history.write().await = history;

        let mut alerts = self.inner.alerts.read().await.clone();
        let pruned = alerts.prune(metrics.timestamp, self.inner.settings.alert_retention);
        if pruned > 0 {
            debug!(pruned, "expired alerts dropped");
        }
        let created = alerts.generate_alerts(
            &metrics,
            level,
            &self.inner.thresholds,
            self.inner.settings.dedup_alerts,
        );
        *self.inner.alerts.write().await = alerts;

        *self.inner.latest.write().await = Some((metrics.clone(), level));

        info!(
            status = %level,
            percentage = metrics.percentage,
            errors = metrics.errors_count,
            availability = metrics.system_availability_pct,
            consistency = metrics.data_consistency_pct,
            "health evaluated"
        );

        for alert in created {
            self.inner.events.publish(MonitorEvent::AlertCreated(alert)).await;
        }
        let status = self.compose(metrics, level).await;
        self.inner
            .events
            .publish(MonitorEvent::HealthChecked(status.clone()))
            .await;
        status
    }

    /// Roll the migration back, stop the loop, raise a critical alert and
    /// notify subscribers.
    ///
    /// Fires at most once per start; later calls return `None`.
    pub async fn trigger_automatic_rollback(&self, reason: &str) -> Option<Alert> {
        if self.inner.rollback_fired.swap(true, Ordering::SeqCst) {
            debug!(%reason, "automatic rollback already triggered");
            return None;
        }
        error!(%reason, "triggering automatic rollback");

        if let Err(e) = self.inner.flags.emergency_rollback().await {
            error!(error = %e, "automatic rollback could not persist flags");
        }
        self.halt().await;

        let snapshot = self
            .inner
            .latest
            .read()
            .await
            .as_ref()
            .map(|(metrics, _)| metrics.clone());
        let mut alerts = self.inner.alerts.read().await.clone();
        let alert = alerts.record(
            AlertType::Critical,
            AlertCondition::AutomaticRollback,
            format!("automatic rollback triggered: {reason}"),
            epoch_millis(),
            snapshot,
        );
        *self.inner.alerts.write().await = alerts;

        self.inner
            .events
            .publish(MonitorEvent::AlertCreated(alert.clone()))
            .await;
        self.inner
            .events
            .publish(MonitorEvent::AutomaticRollback {
                reason: reason.to_string(),
                alert: alert.clone(),
            })
            .await;
        Some(alert)
    }

    async fn compose(&self, metrics: RolloutMetrics, level: HealthLevel) -> SystemHealthStatus {
        let uptime_secs = self
            .inner
            .started_at
            .read()
            .await
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        SystemHealthStatus {
            status: level,
            last_checked: metrics.timestamp,
            metrics,
            active_alerts: self.inner.alerts.read().await.active(None),
            uptime_secs,
        }
    }

    /// Latest composite view, or `None` if never evaluated.
    pub async fn get_system_health(&self) -> Option<SystemHealthStatus> {
        let latest = self.inner.latest.read().await.clone();
        match latest {
            Some((metrics, level)) => Some(self.compose(metrics, level).await),
            None => None,
        }
    }

    /// Unresolved alerts, optionally of one type.
    pub async fn get_alerts(&self, filter: Option<AlertType>) -> Vec<Alert> {
        self.inner.alerts.read().await.active(filter)
    }

    /// Every retained alert, resolved ones included.
    pub async fn get_all_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.read().await.all()
    }

    pub async fn get_metrics_history(&self) -> Vec<RolloutMetrics> {
        self.inner.history.read().await.samples()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    pub async fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.inner.events.subscribe(callback).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id).await
    }
}
