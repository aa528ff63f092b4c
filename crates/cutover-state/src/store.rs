//! StateStore — redb-backed persistence for the cutover control plane.
//!
//! Holds the flag record, its audit trail, and the legacy/migrated record
//! tables. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::backend::{BoxFuture, FlagPersistence, MigrationStorage};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Id of the throwaway row written by the write-path probe.
const WRITE_PROBE_ID: &str = "__cutover_write_probe__";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(FLAGS).map_err(map_err!(Table))?;
        txn.open_table(FLAG_AUDIT).map_err(map_err!(Table))?;
        txn.open_table(LEGACY_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(MIGRATED_RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Flags ──────────────────────────────────────────────────────

    /// Read the flag record, if it was ever written.
    pub fn get_flags(&self) -> StateResult<Option<MigrationFlags>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FLAGS).map_err(map_err!(Table))?;
        match table.get(FLAGS_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let flags: MigrationFlags =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(flags))
            }
            None => Ok(None),
        }
    }

    /// Replace the flag record and append it to the audit trail.
    ///
    /// Both writes share one transaction, so the audit trail never disagrees
    /// with the live record. Returns the audit sequence number.
    pub fn put_flags(&self, flags: &MigrationFlags) -> StateResult<u64> {
        let value = serde_json::to_vec(flags).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let sequence;
        {
            let mut table = txn.open_table(FLAGS).map_err(map_err!(Table))?;
            table
                .insert(FLAGS_KEY, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut audit = txn.open_table(FLAG_AUDIT).map_err(map_err!(Table))?;
            sequence = match audit.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };
            let entry = FlagAuditEntry {
                sequence,
                flags: flags.clone(),
            };
            let entry = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            audit
                .insert(sequence, entry.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            sequence,
            percentage = flags.percentage,
            emergency = flags.emergency_rollback,
            updated_by = %flags.updated_by,
            "migration flags stored"
        );
        Ok(sequence)
    }

    /// Most recent flag writes, newest first.
    pub fn list_flag_audit(&self, limit: usize) -> StateResult<Vec<FlagAuditEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FLAG_AUDIT).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let audit: FlagAuditEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(audit);
        }
        Ok(results)
    }

    // ── Records ────────────────────────────────────────────────────

    /// Insert or update a record on one of the data paths.
    pub fn put_record(&self, table: StorageTable, record: &DataRecord) -> StateResult<()> {
        let def = record_table(table)?;
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(def).map_err(map_err!(Table))?;
            t.insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a record by id.
    pub fn get_record(&self, table: StorageTable, id: &str) -> StateResult<Option<DataRecord>> {
        let def = record_table(table)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(def).map_err(map_err!(Table))?;
        match t.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DataRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all records of a data path.
    pub fn list_records(&self, table: StorageTable) -> StateResult<Vec<DataRecord>> {
        let def = record_table(table)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: DataRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Count active rows. Every audit entry counts as active.
    pub fn count_active_rows(&self, table: StorageTable) -> StateResult<u64> {
        if table == StorageTable::FlagAudit {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let t = txn.open_table(FLAG_AUDIT).map_err(map_err!(Table))?;
            let mut count = 0u64;
            for entry in t.iter().map_err(map_err!(Read))? {
                entry.map_err(map_err!(Read))?;
                count += 1;
            }
            return Ok(count);
        }
        Ok(self
            .list_records(table)?
            .iter()
            .filter(|r| r.active)
            .count() as u64)
    }

    /// Up to `limit` raw rows from any table.
    pub fn sample_rows(
        &self,
        table: StorageTable,
        limit: usize,
    ) -> StateResult<Vec<serde_json::Value>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut rows = Vec::new();
        if table == StorageTable::FlagAudit {
            let t = txn.open_table(FLAG_AUDIT).map_err(map_err!(Table))?;
            for entry in t.iter().map_err(map_err!(Read))?.take(limit) {
                let (_, value) = entry.map_err(map_err!(Read))?;
                rows.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        } else {
            let t = txn.open_table(record_table(table)?).map_err(map_err!(Table))?;
            for entry in t.iter().map_err(map_err!(Read))?.take(limit) {
                let (_, value) = entry.map_err(map_err!(Read))?;
                rows.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(rows)
    }

    /// Write a probe row to the legacy table and abort the transaction.
    pub fn write_probe(&self) -> StateResult<()> {
        let probe = DataRecord {
            id: WRITE_PROBE_ID.to_string(),
            active: false,
            payload: serde_json::json!({ "probe": true }),
            updated_at: cutover_core::epoch_secs(),
        };
        let value = serde_json::to_vec(&probe).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(LEGACY_RECORDS).map_err(map_err!(Table))?;
            t.insert(WRITE_PROBE_ID, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.abort().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Left join of legacy rows against migrated rows by id.
    pub fn join_rows(&self, limit: usize) -> StateResult<Vec<JoinedRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let legacy = txn.open_table(LEGACY_RECORDS).map_err(map_err!(Table))?;
        let migrated = txn.open_table(MIGRATED_RECORDS).map_err(map_err!(Table))?;
        let mut rows = Vec::new();
        for entry in legacy.iter().map_err(map_err!(Read))?.take(limit) {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let legacy_record: DataRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            let migrated_record = match migrated.get(key.value()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<DataRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            rows.push(JoinedRow {
                id: legacy_record.id.clone(),
                legacy: legacy_record,
                migrated: migrated_record,
            });
        }
        Ok(rows)
    }

    /// Open and close a read transaction.
    pub fn check_connectivity(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        txn.open_table(FLAGS).map_err(map_err!(Table))?;
        Ok(())
    }
}

fn record_table(
    table: StorageTable,
) -> StateResult<TableDefinition<'static, &'static str, &'static [u8]>> {
    match table {
        StorageTable::Legacy => Ok(LEGACY_RECORDS),
        StorageTable::Migrated => Ok(MIGRATED_RECORDS),
        StorageTable::FlagAudit => Err(StateError::Table(format!(
            "{table} does not hold data records"
        ))),
    }
}

impl FlagPersistence for StateStore {
    fn load(&self) -> BoxFuture<'_, StateResult<Option<MigrationFlags>>> {
        Box::pin(async move { self.get_flags() })
    }

    fn save<'a>(&'a self, flags: &'a MigrationFlags) -> BoxFuture<'a, StateResult<()>> {
        Box::pin(async move { self.put_flags(flags).map(|_| ()) })
    }
}

impl MigrationStorage for StateStore {
    fn ping(&self) -> BoxFuture<'_, StateResult<()>> {
        Box::pin(async move { self.check_connectivity() })
    }

    fn count_active(&self, table: StorageTable) -> BoxFuture<'_, StateResult<u64>> {
        Box::pin(async move { self.count_active_rows(table) })
    }

    fn select_sample(
        &self,
        table: StorageTable,
        limit: usize,
    ) -> BoxFuture<'_, StateResult<Vec<serde_json::Value>>> {
        Box::pin(async move { self.sample_rows(table, limit) })
    }

    fn probe_write(&self) -> BoxFuture<'_, StateResult<()>> {
        Box::pin(async move { self.write_probe() })
    }

    fn join_sample(&self, limit: usize) -> BoxFuture<'_, StateResult<Vec<JoinedRow>>> {
        Box::pin(async move { self.join_rows(limit) })
    }
}
