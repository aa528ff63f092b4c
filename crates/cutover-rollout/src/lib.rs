//! cutover-rollout — the phase-by-phase rollout state machine.
//!
//! The controller walks the static phase table (0 → 10 → 25 → 50 → 75 →
//! 100 %). Each advance is a single flag write followed by a blocking soak
//! check; any failure rolls the migration back before the error reaches
//! the caller.
//!
//! # States
//!
//! ```text
//! Idle ──start_rollout──► Monitoring(p) ──advance──► Monitoring(p')
//!                              │
//!                              └──failure──► RolledBack (until an operator
//!                                            clears the emergency flag)
//! ```

pub mod controller;
pub mod error;

pub use controller::{RolloutController, RolloutState, METRICS_TASK, ROLLOUT_ACTOR};
pub use error::{RolloutError, RolloutResult};
