//! Probe results, metrics samples, alerts and the composite health view.

use serde::{Deserialize, Serialize};

use cutover_core::{MonitorSettings, TimestampMs};

/// Every probe either the rollout controller or the health monitor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Sample query against the legacy path.
    LegacyRead,
    /// Sample query against the migrated path.
    MigratedRead,
    /// Migrated active rows against the expected share of legacy rows.
    DataConsistency,
    /// Aggregate legacy ⋈ migrated join under a time budget.
    JoinPerformance,
    StorageConnectivity,
    ReadPerformance,
    /// Write inside a transaction that is always rolled back.
    WritePath,
    FlagInvariants,
    AuditLog,
}

impl ProbeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::LegacyRead => "legacy_read",
            ProbeKind::MigratedRead => "migrated_read",
            ProbeKind::DataConsistency => "data_consistency",
            ProbeKind::JoinPerformance => "join_performance",
            ProbeKind::StorageConnectivity => "storage_connectivity",
            ProbeKind::ReadPerformance => "read_performance",
            ProbeKind::WritePath => "write_path",
            ProbeKind::FlagInvariants => "flag_invariants",
            ProbeKind::AuditLog => "audit_log",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Passed,
    Failed { reason: String },
}

/// Inputs and output of the consistency score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub legacy_active: u64,
    pub migrated_active: u64,
    /// `floor(legacy_active × percentage / 100)`.
    pub expected: u64,
    pub score_pct: f64,
}

/// Probe-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeDetail {
    None,
    Consistency(ConsistencyReport),
    Timed { budget_ms: f64 },
}

/// Outcome of one probe within one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub probe: ProbeKind,
    pub status: ProbeStatus,
    pub response_time_ms: f64,
    pub detail: ProbeDetail,
}

impl HealthCheckResult {
    pub fn passed(probe: ProbeKind, response_time_ms: f64, detail: ProbeDetail) -> Self {
        Self {
            probe,
            status: ProbeStatus::Passed,
            response_time_ms,
            detail,
        }
    }

    pub fn failed(
        probe: ProbeKind,
        response_time_ms: f64,
        reason: impl Into<String>,
        detail: ProbeDetail,
    ) -> Self {
        Self {
            probe,
            status: ProbeStatus::Failed {
                reason: reason.into(),
            },
            response_time_ms,
            detail,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.status, ProbeStatus::Passed)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            ProbeStatus::Passed => None,
            ProbeStatus::Failed { reason } => Some(reason),
        }
    }

    /// Consistency score, for the consistency probe only.
    pub fn data_consistency(&self) -> Option<f64> {
        match &self.detail {
            ProbeDetail::Consistency(report) => Some(report.score_pct),
            _ => None,
        }
    }
}

/// Composite classification of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Degraded => write!(f, "degraded"),
            HealthLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Status recorded on a metrics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsStatus {
    Healthy,
    Warning,
    Critical,
}

impl From<HealthLevel> for MetricsStatus {
    fn from(level: HealthLevel) -> Self {
        match level {
            HealthLevel::Healthy => MetricsStatus::Healthy,
            HealthLevel::Degraded => MetricsStatus::Warning,
            HealthLevel::Critical => MetricsStatus::Critical,
        }
    }
}

/// One sample per evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutMetrics {
    pub timestamp: TimestampMs,
    /// Description of the phase the percentage falls into.
    pub phase: String,
    pub percentage: u8,
    pub errors_count: u32,
    pub avg_response_time_ms: f64,
    pub system_availability_pct: f64,
    pub data_consistency_pct: f64,
    pub status: MetricsStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Warning,
    Critical,
    Info,
}

/// What an alert is about. Used to merge alerts for an ongoing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    ResponseTime,
    Availability,
    Consistency,
    ProbeErrors,
    AutomaticRollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub condition: AlertCondition,
    pub message: String,
    pub timestamp: TimestampMs,
    pub resolved: bool,
    pub resolved_at: Option<TimestampMs>,
    pub metrics_snapshot: Option<RolloutMetrics>,
}

/// Read-only view composed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthStatus {
    pub status: HealthLevel,
    pub metrics: RolloutMetrics,
    pub active_alerts: Vec<Alert>,
    pub uptime_secs: u64,
    pub last_checked: TimestampMs,
}

/// Threshold ladder used by classification and alerting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub max_response_time_ms: f64,
    pub min_consistency_pct: f64,
    /// Below this availability the system is critical.
    pub critical_availability_pct: f64,
    /// Below this availability the system is degraded.
    pub degraded_availability_pct: f64,
    /// Below this availability an alert is raised.
    pub alert_availability_pct: f64,
    /// Added to `min_consistency_pct` for the degraded tier.
    pub consistency_margin_pct: f64,
}

impl HealthThresholds {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            max_response_time_ms: settings.max_response_time_ms,
            min_consistency_pct: settings.min_consistency_pct,
            critical_availability_pct: 90.0,
            degraded_availability_pct: 98.0,
            alert_availability_pct: 95.0,
            consistency_margin_pct: 2.0,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from_settings(&MonitorSettings::default())
    }
}
