//! Domain types for the cutover state store.

use serde::{Deserialize, Serialize};

/// The rollout configuration consulted by request routers.
///
/// Invariants (checked by the flag store's validator, not enforced here):
/// - `emergency_rollback` implies reads, writes and percentage are all off.
/// - `write_enabled` implies `read_enabled`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationFlags {
    pub read_enabled: bool,
    pub write_enabled: bool,
    pub validation_logging_enabled: bool,
    /// Share of traffic on the migrated path (0-100).
    pub percentage: u8,
    pub emergency_rollback: bool,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
    /// Actor that performed the last write.
    pub updated_by: String,
}

impl MigrationFlags {
    /// The fail-closed record: every migrated path off, validation logging on.
    pub fn safe_default() -> Self {
        Self {
            read_enabled: false,
            write_enabled: false,
            validation_logging_enabled: true,
            percentage: 0,
            emergency_rollback: false,
            updated_at: 0,
            updated_by: "system_default".to_string(),
        }
    }

    /// Whether the routing-relevant fields match, ignoring audit metadata.
    pub fn same_routing(&self, other: &Self) -> bool {
        self.read_enabled == other.read_enabled
            && self.write_enabled == other.write_enabled
            && self.validation_logging_enabled == other.validation_logging_enabled
            && self.percentage == other.percentage
            && self.emergency_rollback == other.emergency_rollback
    }
}

/// One persisted flag write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagAuditEntry {
    pub sequence: u64,
    pub flags: MigrationFlags,
}

/// A row on either data path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataRecord {
    pub id: String,
    /// Inactive (soft-deleted) rows are excluded from active counts.
    pub active: bool,
    pub payload: serde_json::Value,
    pub updated_at: u64,
}

/// Result row of the legacy ⋈ migrated aggregate join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinedRow {
    pub id: String,
    pub legacy: DataRecord,
    /// `None` when the row has not been migrated yet.
    pub migrated: Option<DataRecord>,
}

/// Tables addressable through the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTable {
    Legacy,
    Migrated,
    FlagAudit,
}

impl StorageTable {
    pub fn name(&self) -> &'static str {
        match self {
            StorageTable::Legacy => "legacy_records",
            StorageTable::Migrated => "migrated_records",
            StorageTable::FlagAudit => "flag_audit",
        }
    }
}

impl std::fmt::Display for StorageTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_default_is_fail_closed() {
        let flags = MigrationFlags::safe_default();
        assert!(!flags.read_enabled);
        assert!(!flags.write_enabled);
        assert!(flags.validation_logging_enabled);
        assert_eq!(flags.percentage, 0);
        assert!(!flags.emergency_rollback);
    }

    #[test]
    fn same_routing_ignores_audit_metadata() {
        let a = MigrationFlags::safe_default();
        let mut b = a.clone();
        b.updated_at = 42;
        b.updated_by = "operator".to_string();
        assert!(a.same_routing(&b));

        b.percentage = 10;
        assert!(!a.same_routing(&b));
    }

    #[test]
    fn flags_json_uses_snake_case_fields() {
        let json = serde_json::to_value(MigrationFlags::safe_default()).unwrap();
        assert_eq!(json["emergency_rollback"], false);
        assert_eq!(json["validation_logging_enabled"], true);
    }
}
