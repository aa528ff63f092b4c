//! FlagStore — TTL-cached access to the persisted migration flags.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cutover_core::{epoch_secs, FlagSettings, EMERGENCY_ACTOR};
use cutover_state::{FlagPersistence, MigrationFlags};

use crate::error::{FlagError, FlagResult};

/// A partial flag write. `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub read_enabled: Option<bool>,
    pub write_enabled: Option<bool>,
    pub validation_logging_enabled: Option<bool>,
    pub percentage: Option<u8>,
    pub emergency_rollback: Option<bool>,
}

impl FlagUpdate {
    /// Move traffic to a rollout phase.
    pub fn phase(read_enabled: bool, write_enabled: bool, percentage: u8) -> Self {
        Self {
            read_enabled: Some(read_enabled),
            write_enabled: Some(write_enabled),
            percentage: Some(percentage),
            ..Default::default()
        }
    }

    /// Everything back to the legacy path, with the rollback latch set.
    pub fn emergency() -> Self {
        Self {
            read_enabled: Some(false),
            write_enabled: Some(false),
            percentage: Some(0),
            emergency_rollback: Some(true),
            ..Default::default()
        }
    }

    /// Release the rollback latch, leaving all migrated paths off.
    pub fn clear_emergency() -> Self {
        Self {
            read_enabled: Some(false),
            write_enabled: Some(false),
            percentage: Some(0),
            emergency_rollback: Some(false),
            ..Default::default()
        }
    }

    /// Produce the whole record that results from applying this update.
    pub fn apply(&self, current: &MigrationFlags, updated_by: &str) -> MigrationFlags {
        MigrationFlags {
            read_enabled: self.read_enabled.unwrap_or(current.read_enabled),
            write_enabled: self.write_enabled.unwrap_or(current.write_enabled),
            validation_logging_enabled: self
                .validation_logging_enabled
                .unwrap_or(current.validation_logging_enabled),
            percentage: self.percentage.unwrap_or(current.percentage),
            emergency_rollback: self.emergency_rollback.unwrap_or(current.emergency_rollback),
            updated_at: epoch_secs(),
            updated_by: updated_by.to_string(),
        }
    }
}

/// Check the structural invariants of a flag record.
///
/// - percentage is within 0-100
/// - an active emergency rollback has reads, writes and percentage off
/// - writes are only enabled together with reads
pub fn validate_flags(flags: &MigrationFlags) -> bool {
    if flags.percentage > 100 {
        return false;
    }
    if flags.emergency_rollback
        && (flags.read_enabled || flags.write_enabled || flags.percentage != 0)
    {
        return false;
    }
    if flags.write_enabled && !flags.read_enabled {
        return false;
    }
    true
}

struct CachedFlags {
    flags: MigrationFlags,
    fetched_at: Instant,
}

/// Shared, cached handle to the migration flags.
#[derive(Clone)]
pub struct FlagStore {
    backend: Arc<dyn FlagPersistence>,
    cache: Arc<RwLock<Option<CachedFlags>>>,
    ttl: Duration,
}

impl FlagStore {
    /// Create a flag store over a persistence backend.
    pub fn new(backend: Arc<dyn FlagPersistence>, settings: &FlagSettings) -> Self {
        Self {
            backend,
            cache: Arc::new(RwLock::new(None)),
            ttl: settings.cache_ttl,
        }
    }

    /// Current flags. Never fails.
    ///
    /// Served from cache within the TTL; otherwise reloaded. A backend error
    /// yields the safe-default record, which is not cached so the next call
    /// retries the backend.
    pub async fn get_flags(&self) -> MigrationFlags {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return cached.flags.clone();
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another reader may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.flags.clone();
            }
        }

        match self.fetch().await {
            Ok(flags) => {
                *cache = Some(CachedFlags {
                    flags: flags.clone(),
                    fetched_at: Instant::now(),
                });
                flags
            }
            Err(e) => {
                *cache = None;
                warn!(error = %e, "flag load failed, serving safe defaults");
                MigrationFlags::safe_default()
            }
        }
    }

    /// Apply a partial update as one whole-record write.
    ///
    /// The cache is dropped before the write and stays empty until the next
    /// read, which holds the same lock, so no reader sees the old record
    /// once the write has started.
    pub async fn update_flags(
        &self,
        update: FlagUpdate,
        updated_by: &str,
    ) -> FlagResult<MigrationFlags> {
        let mut cache = self.cache.write().await;
        *cache = None;

        let current = self.fetch().await?;
        let next = update.apply(&current, updated_by);
        if !validate_flags(&next) {
            return Err(FlagError::InvalidUpdate(format!(
                "read={} write={} percentage={} emergency={}",
                next.read_enabled, next.write_enabled, next.percentage, next.emergency_rollback
            )));
        }

        self.backend.save(&next).await?;
        info!(
            %updated_by,
            read = next.read_enabled,
            write = next.write_enabled,
            percentage = next.percentage,
            emergency = next.emergency_rollback,
            "migration flags updated"
        );
        Ok(next)
    }

    /// Revert all traffic to the legacy path and latch the rollback flag.
    ///
    /// Idempotent: when the persisted record is already rolled back nothing
    /// is written. An unreadable backend does not block the rollback write.
    pub async fn emergency_rollback(&self) -> FlagResult<MigrationFlags> {
        let mut cache = self.cache.write().await;
        *cache = None;

        let current = match self.fetch().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(error = %e, "flag load failed during emergency rollback, writing anyway");
                MigrationFlags::safe_default()
            }
        };

        let next = FlagUpdate::emergency().apply(&current, EMERGENCY_ACTOR);
        if current.same_routing(&next) {
            debug!("emergency rollback already in effect");
            return Ok(current);
        }

        self.backend.save(&next).await?;
        warn!(
            previous_percentage = current.percentage,
            "emergency rollback: all traffic reverted to the legacy path"
        );
        Ok(next)
    }

    /// Operator reset after an emergency rollback. All migrated paths stay off.
    pub async fn clear_emergency_rollback(&self, operator: &str) -> FlagResult<MigrationFlags> {
        let flags = self
            .update_flags(FlagUpdate::clear_emergency(), operator)
            .await?;
        info!(%operator, "emergency rollback latch cleared");
        Ok(flags)
    }

    /// Drop the cached record so the next read hits the backend.
    pub async fn invalidate_cache(&self) {
        *self.cache.write().await = None;
    }

    /// Whether reads should go to the migrated path.
    pub async fn is_read_from_migrated(&self) -> bool {
        let flags = self.get_flags().await;
        flags.read_enabled && !flags.emergency_rollback
    }

    /// Whether writes should go to the migrated path.
    pub async fn is_write_to_migrated(&self) -> bool {
        let flags = self.get_flags().await;
        flags.write_enabled && !flags.emergency_rollback
    }

    /// Traffic percentage actually in effect.
    pub async fn effective_percentage(&self) -> u8 {
        let flags = self.get_flags().await;
        if flags.emergency_rollback {
            0
        } else {
            flags.percentage
        }
    }

    /// Whether the persisted rollback latch is set.
    pub async fn is_emergency_active(&self) -> bool {
        self.get_flags().await.emergency_rollback
    }

    pub async fn is_validation_logging_enabled(&self) -> bool {
        self.get_flags().await.validation_logging_enabled
    }

    /// See [`validate_flags`].
    pub fn validate_flags(flags: &MigrationFlags) -> bool {
        validate_flags(flags)
    }

    /// Load from the backend, creating the default record on first access.
    async fn fetch(&self) -> FlagResult<MigrationFlags> {
        match self.backend.load().await? {
            Some(flags) => Ok(flags),
            None => {
                let mut flags = MigrationFlags::safe_default();
                flags.updated_at = epoch_secs();
                self.backend.save(&flags).await?;
                info!("migration flags initialized with safe defaults");
                Ok(flags)
            }
        }
    }
}
