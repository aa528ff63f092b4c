//! cutover-health — continuous health monitoring for a data cutover.
//!
//! The [`HealthMonitor`] runs on its own interval, independently of any
//! phase transition in progress:
//!
//! ```text
//!   FlagStore ──flags──┐
//!                      ▼
//!   storage ──► six probes (JoinSet) ──► RolloutMetrics ──► history
//!                                            │
//!                                            ├─► evaluate_system_health
//!                                            ├─► alerts (merge/resolve/prune)
//!                                            └─► events to subscribers
//!
//!   3 consecutive pipeline failures ──► trigger_automatic_rollback
//! ```
//!
//! Probe logic lives in [`checker`] and is shared with the rollout
//! controller's soak checks.

pub mod alerts;
pub mod checker;
pub mod error;
pub mod events;
pub mod history;
pub mod monitor;
pub mod types;

pub use alerts::{violated_conditions, AlertLog, Violation};
pub use checker::{build_metrics, consistency_score, evaluate_system_health, expected_migrated};
pub use error::{MonitorError, MonitorResult};
pub use events::{EventBus, EventCallback, MonitorEvent, SubscriptionId};
pub use history::MetricsHistory;
pub use monitor::{HealthMonitor, MONITOR_TASK};
pub use types::*;
