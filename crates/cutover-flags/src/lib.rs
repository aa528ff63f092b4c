//! cutover-flags — the migration flag store.
//!
//! `FlagStore` wraps a [`FlagPersistence`](cutover_state::FlagPersistence)
//! backend with a short TTL cache. Reads never fail: when the backend
//! errors, callers get the safe-default record and every migrated path
//! stays off.
//!
//! The store is `Clone`; clones share the cache, so the rollout controller,
//! the health monitor and request routers can all hold one.

pub mod error;
pub mod store;

pub use error::{FlagError, FlagResult};
pub use store::{validate_flags, FlagStore, FlagUpdate};
