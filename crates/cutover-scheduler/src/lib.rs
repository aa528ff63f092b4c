//! cutover-scheduler — periodic task scheduling for the control plane.
//!
//! The rollout controller's metrics loop and the health monitor's
//! evaluation loop both run as named tasks on a [`Scheduler`]:
//!
//! - Each tick is awaited inside the task's own loop, so a slow tick can
//!   never overlap the next one. Ticks that fall due meanwhile are skipped.
//! - Cancelling a task flips its [`Liveness`] and stops future ticks. An
//!   in-flight tick is allowed to finish and is expected to check its
//!   `Liveness` before applying results.
//!
//! ```text
//! Scheduler
//!   └── name → TaskSlot
//!       ├── JoinHandle (tick loop)
//!       ├── watch::Sender<bool> (shutdown)
//!       └── Liveness (shared with the tick)
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Liveness, Scheduler, TickFn, TickFuture};
