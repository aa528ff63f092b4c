//! Rollout controller error types.

use thiserror::Error;

use cutover_flags::FlagError;
use cutover_scheduler::SchedulerError;

/// Result type alias for controller operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("too many critical errors during transition to {target}%: {failed} probes failed in one poll")]
    TooManyCriticalErrors { target: u8, failed: u32 },

    #[error("{errors} probe errors during the soak window of the transition to {target}%")]
    SoakErrorsExceeded { target: u8, errors: u32 },

    #[error("emergency rollback is active, clear it before resuming the rollout")]
    EmergencyActive,

    #[error(transparent)]
    Flags(#[from] FlagError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
