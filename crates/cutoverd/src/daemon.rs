//! Component assembly, the long-running `run` mode, and operator commands.
//!
//! The daemon:
//! 1. Loads `cutover.toml` (or defaults)
//! 2. Opens the redb state store
//! 3. Builds one flag store and one scheduler shared by the controller and
//!    the health monitor
//! 4. Runs until Ctrl-C, optionally advancing phases on its own

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cutover_core::{epoch_secs, next_phase_after, CutoverConfig};
use cutover_flags::FlagStore;
use cutover_health::{HealthMonitor, SystemHealthStatus};
use cutover_rollout::RolloutController;
use cutover_scheduler::Scheduler;
use cutover_state::{DataRecord, FlagAuditEntry, MigrationFlags, StateStore, StorageTable};

/// File name of the state store inside the data directory.
pub const DB_FILE: &str = "cutover.redb";

/// Everything the daemon runs, wired to one state store.
pub struct Components {
    pub state: StateStore,
    pub flags: FlagStore,
    pub scheduler: Scheduler,
    pub controller: RolloutController,
    pub monitor: HealthMonitor,
}

impl Components {
    pub fn assemble(config: &CutoverConfig, state: StateStore) -> anyhow::Result<Self> {
        let flags = FlagStore::new(Arc::new(state.clone()), &config.flag_settings()?);
        let scheduler = Scheduler::new();
        let controller = RolloutController::new(
            flags.clone(),
            Arc::new(state.clone()),
            config.rollout_settings()?,
            scheduler.clone(),
        );
        let monitor = HealthMonitor::new(
            flags.clone(),
            Arc::new(state.clone()),
            config.monitor_settings()?,
            scheduler.clone(),
        );
        Ok(Self {
            state,
            flags,
            scheduler,
            controller,
            monitor,
        })
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<CutoverConfig> {
    match path {
        Some(path) => {
            let config = CutoverConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(CutoverConfig::default()),
    }
}

/// Open the store at `[storage].path`, or `<data_dir>/cutover.redb`.
pub fn open_state(config: &CutoverConfig, data_dir: &Path) -> anyhow::Result<StateStore> {
    let db_path: PathBuf = match config.storage_path() {
        Some(path) => path.to_path_buf(),
        None => data_dir.join(DB_FILE),
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

/// Run the monitor (and the rollout metrics loop) until Ctrl-C.
pub async fn run(components: Components, auto_advance: bool) -> anyhow::Result<()> {
    info!(auto_advance, "cutover daemon starting");

    components.monitor.start().await?;
    if let Err(e) = components.controller.start_rollout().await {
        warn!(error = %e, "rollout not started, health monitor keeps running");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let advance_handle = auto_advance.then(|| {
        tokio::spawn(auto_advance_loop(
            components.controller.clone(),
            shutdown_rx,
        ))
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    components.monitor.stop().await;
    components.scheduler.cancel_all().await;
    if let Some(handle) = advance_handle {
        let _ = handle.await;
    }

    info!("cutover daemon stopped");
    Ok(())
}

/// Advance phase by phase, holding each stable phase for its estimated
/// soak time before the next one.
async fn auto_advance_loop(controller: RolloutController, mut shutdown: watch::Receiver<bool>) {
    loop {
        let outcome = tokio::select! {
            outcome = controller.advance_to_next_phase() => outcome,
            _ = shutdown.changed() => {
                warn!("shutdown during a phase transition, soak not completed");
                break;
            }
        };

        match outcome {
            Ok(Some(phase)) => {
                let hold = Duration::from_secs(u64::from(phase.estimated_soak_minutes) * 60);
                info!(
                    percentage = phase.percentage,
                    hold_minutes = phase.estimated_soak_minutes,
                    "phase stable, holding before the next advance"
                );
                tokio::select! {
                    _ = tokio::time::sleep(hold) => {}
                    _ = shutdown.changed() => break,
                }
            }
            Ok(None) => {
                info!("rollout complete");
                break;
            }
            Err(e) => {
                error!(error = %e, "auto-advance stopped");
                break;
            }
        }
    }
}

/// What `cutoverd status` prints.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub flags: MigrationFlags,
    pub phase: &'static str,
    pub next_percentage: Option<u8>,
    pub health: SystemHealthStatus,
    pub recent_flag_changes: Vec<FlagAuditEntry>,
}

/// Current flags plus one fresh health evaluation.
pub async fn status(components: &Components, audit_limit: usize) -> anyhow::Result<StatusReport> {
    let flags = components.flags.get_flags().await;
    let phase = components.controller.current_phase().await;
    let next_percentage = if flags.emergency_rollback {
        None
    } else {
        next_phase_after(flags.percentage).map(|p| p.percentage)
    };
    let health = components.monitor.evaluate().await;
    let recent_flag_changes = components.state.list_flag_audit(audit_limit)?;

    Ok(StatusReport {
        flags,
        phase: phase.description,
        next_percentage,
        health,
        recent_flag_changes,
    })
}

/// Fill the local tables: `legacy` active rows, of which the first
/// `migrated` also exist on the migrated path.
pub fn seed(state: &StateStore, legacy: usize, migrated: usize) -> anyhow::Result<()> {
    let now = epoch_secs();
    for i in 0..legacy {
        let record = DataRecord {
            id: format!("record-{i:06}"),
            active: true,
            payload: serde_json::json!({ "seq": i }),
            updated_at: now,
        };
        state.put_record(StorageTable::Legacy, &record)?;
        if i < migrated {
            state.put_record(StorageTable::Migrated, &record)?;
        }
    }
    info!(legacy, migrated = migrated.min(legacy), "records seeded");
    Ok(())
}
