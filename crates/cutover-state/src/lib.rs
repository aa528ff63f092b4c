//! cutover-state — embedded state store for the cutover control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds the persisted
//! `MigrationFlags` record, an append-only audit trail of every flag write,
//! and local copies of the legacy and migrated record tables.
//!
//! # Collaborator traits
//!
//! The control plane never talks to redb directly. It goes through two
//! object-safe traits defined in [`backend`]:
//!
//! - [`FlagPersistence`] — load/save of the single flag record
//! - [`MigrationStorage`] — counts, samples, the aborted write probe, and
//!   the aggregate join used by the health probes
//!
//! `StateStore` implements both. It is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod backend;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use backend::{BoxFuture, FlagPersistence, MigrationStorage};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
