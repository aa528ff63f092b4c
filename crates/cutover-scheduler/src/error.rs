//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("invalid period for task {0}: must be greater than zero")]
    InvalidPeriod(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
