//! Scheduler — named periodic tasks with cooperative cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};

/// Future returned by a tick.
pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The work performed on every tick.
pub type TickFn = Arc<dyn Fn(Liveness) -> TickFuture + Send + Sync>;

/// Shared flag telling a tick whether its task is still scheduled.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// A liveness that is never cancelled, for ticks run outside a scheduler.
    pub fn detached() -> Self {
        Self::new()
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-task state.
struct TaskSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    liveness: Liveness,
}

/// Owns the periodic tasks of one component.
#[derive(Clone, Default)]
pub struct Scheduler {
    tasks: Arc<RwLock<HashMap<String, TaskSlot>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking `tick` every `period`, first tick one period from now.
    ///
    /// Fails if a live task with the same name exists or `period` is zero.
    pub async fn schedule(
        &self,
        name: &str,
        period: Duration,
        tick: TickFn,
    ) -> SchedulerResult<Liveness> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod(name.to_string()));
        }
        let mut tasks = self.tasks.write().await;
        if let Some(slot) = tasks.get(name) {
            if !slot.handle.is_finished() && slot.liveness.is_alive() {
                return Err(SchedulerError::AlreadyScheduled(name.to_string()));
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let liveness = Liveness::new();
        let handle = tokio::spawn(run_periodic(
            name.to_string(),
            period,
            tick,
            liveness.clone(),
            shutdown_rx,
        ));

        tasks.insert(
            name.to_string(),
            TaskSlot {
                handle,
                shutdown_tx,
                liveness: liveness.clone(),
            },
        );

        info!(task = %name, period_ms = period.as_millis() as u64, "periodic task scheduled");
        Ok(liveness)
    }

    /// Stop future ticks of a task. Returns false if it was not scheduled.
    ///
    /// Does not abort a tick in flight, so it is safe to call from inside
    /// the task's own tick.
    pub async fn cancel(&self, name: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.remove(name) {
            Some(slot) => {
                slot.liveness.kill();
                let _ = slot.shutdown_tx.send(true);
                info!(task = %name, "periodic task cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every task (for graceful shutdown).
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.write().await;
        for (name, slot) in tasks.drain() {
            slot.liveness.kill();
            let _ = slot.shutdown_tx.send(true);
            debug!(task = %name, "periodic task cancelled");
        }
    }

    /// Whether a live task with this name exists.
    pub async fn is_scheduled(&self, name: &str) -> bool {
        let tasks = self.tasks.read().await;
        tasks
            .get(name)
            .is_some_and(|slot| !slot.handle.is_finished() && slot.liveness.is_alive())
    }

    /// Names of all live tasks.
    pub async fn scheduled_tasks(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished() && slot.liveness.is_alive())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// The tick loop of a single task.
async fn run_periodic(
    name: String,
    period: Duration,
    tick: TickFn,
    liveness: Liveness,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !liveness.is_alive() {
                    break;
                }
                let started = Instant::now();
                tick(liveness.clone()).await;
                let elapsed = started.elapsed();
                if elapsed > period {
                    debug!(
                        task = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "tick overran its period, missed ticks skipped"
                    );
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    debug!(task = %name, "periodic task loop exited");
}
