//! Health monitor error types.

use thiserror::Error;

/// Failures of the evaluation pipeline itself.
///
/// Individual probe failures are never errors: they become failed
/// `HealthCheckResult`s.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("probe task did not complete: {0}")]
    ProbeTask(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
