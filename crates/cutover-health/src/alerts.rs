//! Alert generation, merging and retention.

use std::time::Duration;

use tracing::{info, warn};

use cutover_core::TimestampMs;

use crate::types::{Alert, AlertCondition, AlertType, HealthLevel, HealthThresholds, RolloutMetrics};

/// Conditions re-checked on every evaluation. Only these are resolved
/// automatically when they clear.
const METRIC_CONDITIONS: [AlertCondition; 4] = [
    AlertCondition::ResponseTime,
    AlertCondition::Availability,
    AlertCondition::Consistency,
    AlertCondition::ProbeErrors,
];

/// A threshold violated by one metrics sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub condition: AlertCondition,
    pub alert_type: AlertType,
    pub message: String,
}

/// Check the four alert conditions independently.
pub fn violated_conditions(
    metrics: &RolloutMetrics,
    status: HealthLevel,
    thresholds: &HealthThresholds,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if metrics.avg_response_time_ms > thresholds.max_response_time_ms {
        violations.push(Violation {
            condition: AlertCondition::ResponseTime,
            alert_type: AlertType::Warning,
            message: format!(
                "average response time {:.0}ms exceeds {:.0}ms",
                metrics.avg_response_time_ms, thresholds.max_response_time_ms
            ),
        });
    }

    if metrics.system_availability_pct < thresholds.alert_availability_pct {
        violations.push(Violation {
            condition: AlertCondition::Availability,
            alert_type: AlertType::Critical,
            message: format!(
                "system availability {:.1}% below {:.1}%",
                metrics.system_availability_pct, thresholds.alert_availability_pct
            ),
        });
    }

    if metrics.data_consistency_pct < thresholds.min_consistency_pct {
        violations.push(Violation {
            condition: AlertCondition::Consistency,
            alert_type: AlertType::Critical,
            message: format!(
                "data consistency {:.1}% below {:.1}%",
                metrics.data_consistency_pct, thresholds.min_consistency_pct
            ),
        });
    }

    if metrics.errors_count > 0 {
        let alert_type = if status == HealthLevel::Critical {
            AlertType::Critical
        } else {
            AlertType::Warning
        };
        violations.push(Violation {
            condition: AlertCondition::ProbeErrors,
            alert_type,
            message: format!("{} health probes failed", metrics.errors_count),
        });
    }

    violations
}

/// Every alert raised within the retention window, oldest first.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerts: Vec<Alert>,
    next_seq: u64,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new unresolved alert.
    pub fn record(
        &mut self,
        alert_type: AlertType,
        condition: AlertCondition,
        message: String,
        timestamp: TimestampMs,
        metrics_snapshot: Option<RolloutMetrics>,
    ) -> Alert {
        self.next_seq += 1;
        let alert = Alert {
            id: format!("alert-{timestamp}-{}", self.next_seq),
            alert_type,
            condition,
            message,
            timestamp,
            resolved: false,
            resolved_at: None,
            metrics_snapshot,
        };
        self.alerts.push(alert.clone());
        alert
    }

    /// Raise alerts for every condition the sample violates and return the
    /// new ones.
    ///
    /// With `dedup`, a condition that already has an open alert raises
    /// nothing new, and open alerts whose condition has cleared are
    /// resolved. Without it, every violation raises a fresh alert.
    pub fn generate_alerts(
        &mut self,
        metrics: &RolloutMetrics,
        status: HealthLevel,
        thresholds: &HealthThresholds,
        dedup: bool,
    ) -> Vec<Alert> {
        let violations = violated_conditions(metrics, status, thresholds);

        if dedup {
            for alert in self.alerts.iter_mut().filter(|a| !a.resolved) {
                let cleared = METRIC_CONDITIONS.contains(&alert.condition)
                    && !violations.iter().any(|v| v.condition == alert.condition);
                if cleared {
                    alert.resolved = true;
                    alert.resolved_at = Some(metrics.timestamp);
                    info!(alert_id = %alert.id, condition = ?alert.condition, "alert resolved");
                }
            }
        }

        let mut created = Vec::new();
        for violation in violations {
            if dedup && self.has_open(violation.condition) {
                continue;
            }
            warn!(
                condition = ?violation.condition,
                severity = ?violation.alert_type,
                message = %violation.message,
                "alert raised"
            );
            created.push(self.record(
                violation.alert_type,
                violation.condition,
                violation.message,
                metrics.timestamp,
                Some(metrics.clone()),
            ));
        }
        created
    }

    fn has_open(&self, condition: AlertCondition) -> bool {
        self.alerts
            .iter()
            .any(|a| !a.resolved && a.condition == condition)
    }

    /// Drop alerts older than `retention`. Returns how many were dropped.
    pub fn prune(&mut self, now: TimestampMs, retention: Duration) -> usize {
        let cutoff = now.saturating_sub(retention.as_millis() as u64);
        let before = self.alerts.len();
        self.alerts.retain(|a| a.timestamp >= cutoff);
        before - self.alerts.len()
    }

    /// Unresolved alerts, optionally of one type.
    pub fn active(&self, filter: Option<AlertType>) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| !a.resolved)
            .filter(|a| filter.is_none_or(|t| a.alert_type == t))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricsStatus;

    const HOUR_MS: u64 = 60 * 60 * 1000;

    fn metrics_at(timestamp: u64) -> RolloutMetrics {
        RolloutMetrics {
            timestamp,
            phase: "test".to_string(),
            percentage: 25,
            errors_count: 0,
            avg_response_time_ms: 50.0,
            system_availability_pct: 100.0,
            data_consistency_pct: 100.0,
            status: MetricsStatus::Healthy,
        }
    }

    fn failing_at(timestamp: u64) -> RolloutMetrics {
        RolloutMetrics {
            errors_count: 2,
            system_availability_pct: 66.7,
            ..metrics_at(timestamp)
        }
    }

    #[test]
    fn nominal_metrics_violate_nothing() {
        let violations =
            violated_conditions(&metrics_at(0), HealthLevel::Healthy, &HealthThresholds::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn each_condition_is_checked_independently() {
        let metrics = RolloutMetrics {
            avg_response_time_ms: 1500.0,
            system_availability_pct: 80.0,
            data_consistency_pct: 50.0,
            errors_count: 3,
            ..metrics_at(0)
        };
        let violations =
            violated_conditions(&metrics, HealthLevel::Critical, &HealthThresholds::default());
        let conditions: Vec<_> = violations.iter().map(|v| v.condition).collect();
        assert_eq!(conditions, METRIC_CONDITIONS.to_vec());

        let errors = violations
            .iter()
            .find(|v| v.condition == AlertCondition::ProbeErrors)
            .unwrap();
        assert_eq!(errors.alert_type, AlertType::Critical);
    }

    #[test]
    fn probe_errors_are_warnings_unless_critical() {
        let metrics = RolloutMetrics {
            errors_count: 1,
            ..metrics_at(0)
        };
        let violations =
            violated_conditions(&metrics, HealthLevel::Degraded, &HealthThresholds::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].alert_type, AlertType::Warning);
    }

    #[test]
    fn without_dedup_every_tick_raises_new_alerts() {
        let mut log = AlertLog::new();
        let thresholds = HealthThresholds::default();

        let first = log.generate_alerts(&failing_at(1), HealthLevel::Critical, &thresholds, false);
        let second = log.generate_alerts(&failing_at(2), HealthLevel::Critical, &thresholds, false);

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(log.active(None).len(), 4);
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn dedup_merges_ongoing_conditions() {
        let mut log = AlertLog::new();
        let thresholds = HealthThresholds::default();

        let first = log.generate_alerts(&failing_at(1), HealthLevel::Critical, &thresholds, true);
        let second = log.generate_alerts(&failing_at(2), HealthLevel::Critical, &thresholds, true);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(log.active(None).len(), 2);
    }

    #[test]
    fn dedup_resolves_cleared_conditions() {
        let mut log = AlertLog::new();
        let thresholds = HealthThresholds::default();

        log.generate_alerts(&failing_at(1), HealthLevel::Critical, &thresholds, true);
        let created = log.generate_alerts(&metrics_at(2), HealthLevel::Healthy, &thresholds, true);

        assert!(created.is_empty());
        assert!(log.active(None).is_empty());
        assert!(log.all().iter().all(|a| a.resolved && a.resolved_at == Some(2)));

        // The condition comes back: a new alert is raised.
        let again = log.generate_alerts(&failing_at(3), HealthLevel::Critical, &thresholds, true);
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn non_metric_alerts_are_not_auto_resolved() {
        let mut log = AlertLog::new();
        log.record(
            AlertType::Critical,
            AlertCondition::AutomaticRollback,
            "rolled back".to_string(),
            1,
            None,
        );
        log.generate_alerts(&metrics_at(2), HealthLevel::Healthy, &HealthThresholds::default(), true);
        assert_eq!(log.active(Some(AlertType::Critical)).len(), 1);
    }

    #[test]
    fn active_filters_by_type() {
        let mut log = AlertLog::new();
        let metrics = RolloutMetrics {
            errors_count: 1,
            system_availability_pct: 80.0,
            ..metrics_at(1)
        };
        log.generate_alerts(&metrics, HealthLevel::Degraded, &HealthThresholds::default(), true);

        assert_eq!(log.active(Some(AlertType::Critical)).len(), 1);
        assert_eq!(log.active(Some(AlertType::Warning)).len(), 1);
        assert!(log.active(Some(AlertType::Info)).is_empty());
        assert_eq!(log.active(None).len(), 2);
    }

    #[test]
    fn alerts_older_than_retention_are_pruned() {
        let mut log = AlertLog::new();
        let retention = Duration::from_secs(24 * 60 * 60);
        log.record(AlertType::Warning, AlertCondition::ProbeErrors, "old".into(), 0, None);
        log.record(
            AlertType::Warning,
            AlertCondition::ProbeErrors,
            "recent".into(),
            20 * HOUR_MS,
            None,
        );

        let dropped = log.prune(25 * HOUR_MS, retention);
        assert_eq!(dropped, 1);
        let remaining: Vec<_> = log.active(None).into_iter().map(|a| a.message).collect();
        assert_eq!(remaining, vec!["recent".to_string()]);
    }

    #[test]
    fn alert_ids_are_unique_within_a_millisecond() {
        let mut log = AlertLog::new();
        let a = log.record(AlertType::Info, AlertCondition::ProbeErrors, "a".into(), 5, None);
        let b = log.record(AlertType::Info, AlertCondition::ProbeErrors, "b".into(), 5, None);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("alert-5-"));
    }
}
