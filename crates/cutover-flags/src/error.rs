//! Flag store error types.

use thiserror::Error;

/// Errors returned by flag writes. Reads never fail.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag persistence failed: {0}")]
    Persistence(#[from] cutover_state::StateError),

    #[error("update rejected: {0}")]
    InvalidUpdate(String),
}

pub type FlagResult<T> = Result<T, FlagError>;
