//! Probe logic and health classification.
//!
//! Every probe converts storage errors into a failed `HealthCheckResult`;
//! nothing here returns an error to the caller.

use std::future::Future;

use tokio::time::Instant;
use tracing::debug;

use cutover_core::{phase_for_percentage, TimestampMs};
use cutover_state::{MigrationFlags, MigrationStorage, StateResult, StorageTable};

use crate::types::{
    ConsistencyReport, HealthCheckResult, HealthLevel, HealthThresholds, MetricsStatus,
    ProbeDetail, ProbeKind, RolloutMetrics,
};

/// Error count recorded on the synthetic sample of a failed pipeline.
pub const PIPELINE_FAILURE_ERRORS: u32 = 999;

/// Migrated rows the current percentage implies: `floor(legacy × pct / 100)`.
pub fn expected_migrated(legacy_active: u64, percentage: u8) -> u64 {
    legacy_active * u64::from(percentage.min(100)) / 100
}

/// Share of expected migrated rows actually present, capped at 100.
///
/// With nothing expected the path is trivially consistent.
pub fn consistency_score(legacy_active: u64, migrated_active: u64, percentage: u8) -> f64 {
    let expected = expected_migrated(legacy_active, percentage);
    if expected == 0 {
        return 100.0;
    }
    (migrated_active as f64 / expected as f64 * 100.0).min(100.0)
}

async fn timed<T>(fut: impl Future<Output = StateResult<T>>) -> (StateResult<T>, f64) {
    let started = Instant::now();
    let result = fut.await;
    (result, started.elapsed().as_secs_f64() * 1000.0)
}

async fn sample_probe(
    storage: &dyn MigrationStorage,
    probe: ProbeKind,
    table: StorageTable,
    limit: usize,
) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(storage.select_sample(table, limit)).await;
    match result {
        Ok(rows) => {
            debug!(%probe, %table, rows = rows.len(), elapsed_ms, "sample probe passed");
            HealthCheckResult::passed(probe, elapsed_ms, ProbeDetail::None)
        }
        Err(e) => HealthCheckResult::failed(
            probe,
            elapsed_ms,
            format!("{table} read failed: {e}"),
            ProbeDetail::None,
        ),
    }
}

/// Sample query against the legacy path. Must always succeed.
pub async fn probe_legacy_read(storage: &dyn MigrationStorage, limit: usize) -> HealthCheckResult {
    sample_probe(storage, ProbeKind::LegacyRead, StorageTable::Legacy, limit).await
}

/// Sample query against the migrated path. An empty sample still passes.
pub async fn probe_migrated_read(storage: &dyn MigrationStorage, limit: usize) -> HealthCheckResult {
    sample_probe(storage, ProbeKind::MigratedRead, StorageTable::Migrated, limit).await
}

/// Compare migrated active rows with the share the percentage implies.
pub async fn probe_consistency(
    storage: &dyn MigrationStorage,
    percentage: u8,
    min_consistency_pct: f64,
) -> HealthCheckResult {
    let started = Instant::now();
    let counts = async {
        let legacy = storage.count_active(StorageTable::Legacy).await?;
        let migrated = storage.count_active(StorageTable::Migrated).await?;
        Ok::<_, cutover_state::StateError>((legacy, migrated))
    }
    .await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (legacy_active, migrated_active) = match counts {
        Ok(counts) => counts,
        Err(e) => {
            return HealthCheckResult::failed(
                ProbeKind::DataConsistency,
                elapsed_ms,
                format!("consistency counts unavailable: {e}"),
                ProbeDetail::None,
            );
        }
    };

    let report = ConsistencyReport {
        legacy_active,
        migrated_active,
        expected: expected_migrated(legacy_active, percentage),
        score_pct: consistency_score(legacy_active, migrated_active, percentage),
    };

    if report.score_pct >= min_consistency_pct {
        HealthCheckResult::passed(
            ProbeKind::DataConsistency,
            elapsed_ms,
            ProbeDetail::Consistency(report),
        )
    } else {
        HealthCheckResult::failed(
            ProbeKind::DataConsistency,
            elapsed_ms,
            format!(
                "consistency {:.1}% below {:.1}% ({} of {} expected rows migrated)",
                report.score_pct, min_consistency_pct, report.migrated_active, report.expected
            ),
            ProbeDetail::Consistency(report),
        )
    }
}

fn budget_check(
    probe: ProbeKind,
    result: StateResult<()>,
    elapsed_ms: f64,
    budget_ms: f64,
) -> HealthCheckResult {
    let detail = ProbeDetail::Timed { budget_ms };
    match result {
        Err(e) => HealthCheckResult::failed(probe, elapsed_ms, format!("{probe} failed: {e}"), detail),
        Ok(()) if elapsed_ms >= budget_ms => HealthCheckResult::failed(
            probe,
            elapsed_ms,
            format!("{probe} took {elapsed_ms:.0}ms, budget {budget_ms:.0}ms"),
            detail,
        ),
        Ok(()) => HealthCheckResult::passed(probe, elapsed_ms, detail),
    }
}

/// Aggregate legacy ⋈ migrated join, passing only under `budget_ms`.
pub async fn probe_join_performance(
    storage: &dyn MigrationStorage,
    limit: usize,
    budget_ms: f64,
) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(storage.join_sample(limit)).await;
    budget_check(ProbeKind::JoinPerformance, result.map(|_| ()), elapsed_ms, budget_ms)
}

pub async fn probe_connectivity(storage: &dyn MigrationStorage) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(storage.ping()).await;
    match result {
        Ok(()) => HealthCheckResult::passed(ProbeKind::StorageConnectivity, elapsed_ms, ProbeDetail::None),
        Err(e) => HealthCheckResult::failed(
            ProbeKind::StorageConnectivity,
            elapsed_ms,
            format!("storage unreachable: {e}"),
            ProbeDetail::None,
        ),
    }
}

/// Sample reads from both paths under `budget_ms`.
pub async fn probe_read_performance(
    storage: &dyn MigrationStorage,
    limit: usize,
    budget_ms: f64,
) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(async {
        storage.select_sample(StorageTable::Legacy, limit).await?;
        storage.select_sample(StorageTable::Migrated, limit).await?;
        Ok::<_, cutover_state::StateError>(())
    })
    .await;
    budget_check(ProbeKind::ReadPerformance, result, elapsed_ms, budget_ms)
}

/// Exercise the write path without persisting anything.
pub async fn probe_write_path(storage: &dyn MigrationStorage, budget_ms: f64) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(storage.probe_write()).await;
    budget_check(ProbeKind::WritePath, result, elapsed_ms, budget_ms)
}

/// Structural invariants of the flag record.
pub fn probe_flag_invariants(flags: &MigrationFlags) -> HealthCheckResult {
    if cutover_flags::validate_flags(flags) {
        HealthCheckResult::passed(ProbeKind::FlagInvariants, 0.0, ProbeDetail::None)
    } else {
        HealthCheckResult::failed(
            ProbeKind::FlagInvariants,
            0.0,
            format!(
                "flag record violates invariants (read={}, write={}, pct={}, emergency={})",
                flags.read_enabled, flags.write_enabled, flags.percentage, flags.emergency_rollback
            ),
            ProbeDetail::None,
        )
    }
}

/// The flag audit trail is readable.
pub async fn probe_audit_log(storage: &dyn MigrationStorage) -> HealthCheckResult {
    let (result, elapsed_ms) = timed(storage.count_active(StorageTable::FlagAudit)).await;
    match result {
        Ok(_) => HealthCheckResult::passed(ProbeKind::AuditLog, elapsed_ms, ProbeDetail::None),
        Err(e) => HealthCheckResult::failed(
            ProbeKind::AuditLog,
            elapsed_ms,
            format!("audit log unreadable: {e}"),
            ProbeDetail::None,
        ),
    }
}

/// Aggregate one cycle's probe results into a metrics sample.
pub fn build_metrics(
    results: &[HealthCheckResult],
    percentage: u8,
    thresholds: &HealthThresholds,
    timestamp: TimestampMs,
) -> RolloutMetrics {
    let total = results.len();
    let successes = results.iter().filter(|r| r.success()).count();

    let timed: Vec<f64> = results
        .iter()
        .map(|r| r.response_time_ms)
        .filter(|ms| *ms > 0.0)
        .collect();
    let avg_response_time_ms = if timed.is_empty() {
        0.0
    } else {
        timed.iter().sum::<f64>() / timed.len() as f64
    };

    let system_availability_pct = if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64 * 100.0
    };

    let data_consistency_pct = results
        .iter()
        .find_map(HealthCheckResult::data_consistency)
        .unwrap_or(100.0);

    let mut metrics = RolloutMetrics {
        timestamp,
        phase: phase_for_percentage(percentage).description.to_string(),
        percentage,
        errors_count: (total - successes) as u32,
        avg_response_time_ms,
        system_availability_pct,
        data_consistency_pct,
        status: MetricsStatus::Healthy,
    };
    metrics.status = evaluate_system_health(&metrics, thresholds).into();
    metrics
}

impl RolloutMetrics {
    /// Synthetic critical sample recorded when probes could not run at all.
    pub fn pipeline_failure(percentage: u8, timestamp: TimestampMs) -> Self {
        Self {
            timestamp,
            phase: phase_for_percentage(percentage).description.to_string(),
            percentage,
            errors_count: PIPELINE_FAILURE_ERRORS,
            avg_response_time_ms: 0.0,
            system_availability_pct: 0.0,
            data_consistency_pct: 0.0,
            status: MetricsStatus::Critical,
        }
    }
}

/// Two-tier threshold ladder. The gap between tiers keeps the
/// classification from flapping.
pub fn evaluate_system_health(metrics: &RolloutMetrics, thresholds: &HealthThresholds) -> HealthLevel {
    let availability = metrics.system_availability_pct;
    let response = metrics.avg_response_time_ms;
    let consistency = metrics.data_consistency_pct;

    if availability < thresholds.critical_availability_pct
        || response > 2.0 * thresholds.max_response_time_ms
        || consistency < thresholds.min_consistency_pct
    {
        HealthLevel::Critical
    } else if availability < thresholds.degraded_availability_pct
        || response > thresholds.max_response_time_ms
        || consistency < thresholds.min_consistency_pct + thresholds.consistency_margin_pct
    {
        HealthLevel::Degraded
    } else {
        HealthLevel::Healthy
    }
}
