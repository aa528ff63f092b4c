//! Collaborator traits consumed by the control plane.
//!
//! Both traits return boxed futures so they stay object-safe and can be
//! shared as `Arc<dyn _>` between the flag store, the rollout controller
//! and the health monitor.

use std::future::Future;
use std::pin::Pin;

use crate::error::StateResult;
use crate::types::{JoinedRow, MigrationFlags, StorageTable};

/// Boxed future alias for collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Load/save of the single flag record.
pub trait FlagPersistence: Send + Sync {
    /// Load the flag record. `Ok(None)` means it was never written.
    fn load(&self) -> BoxFuture<'_, StateResult<Option<MigrationFlags>>>;

    /// Persist the whole record as one write.
    fn save<'a>(&'a self, flags: &'a MigrationFlags) -> BoxFuture<'a, StateResult<()>>;
}

/// Read-mostly access to the legacy and migrated data paths.
pub trait MigrationStorage: Send + Sync {
    /// Cheapest possible round trip to the backend.
    fn ping(&self) -> BoxFuture<'_, StateResult<()>>;

    /// Number of active rows in a table.
    fn count_active(&self, table: StorageTable) -> BoxFuture<'_, StateResult<u64>>;

    /// Up to `limit` rows from a table.
    fn select_sample(
        &self,
        table: StorageTable,
        limit: usize,
    ) -> BoxFuture<'_, StateResult<Vec<serde_json::Value>>>;

    /// Exercise the write path inside a transaction that is never committed.
    fn probe_write(&self) -> BoxFuture<'_, StateResult<()>>;

    /// Aggregate legacy ⋈ migrated join, up to `limit` rows.
    fn join_sample(&self, limit: usize) -> BoxFuture<'_, StateResult<Vec<JoinedRow>>>;
}
