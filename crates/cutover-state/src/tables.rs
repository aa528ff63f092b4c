//! redb table definitions for the cutover state store.
//!
//! Values are JSON-serialized domain types.

use redb::TableDefinition;

/// The flag record, stored under [`FLAGS_KEY`].
pub const FLAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("migration_flags");

/// The single logical key of the flag record.
pub const FLAGS_KEY: &str = "migration";

/// Flag audit entries keyed by a monotonically increasing sequence number.
pub const FLAG_AUDIT: TableDefinition<u64, &[u8]> = TableDefinition::new("flag_audit");

/// Legacy data path records keyed by record id.
pub const LEGACY_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("legacy_records");

/// Migrated data path records keyed by record id.
pub const MIGRATED_RECORDS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("migrated_records");
