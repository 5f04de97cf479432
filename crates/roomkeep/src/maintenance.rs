//! The periodic maintenance task.
//!
//! One [`MaintenanceLoop`] per server. Each tick it locks the shared
//! [`SessionManager`] once and runs a whole pass under that lock, so a
//! pass never interleaves with connection events.

use std::sync::Arc;

use roomkeep_session::SessionManager;
use roomkeep_tick::{TickConfig, TickScheduler};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// Drives [`SessionManager::maintain`] from a [`TickScheduler`].
pub struct MaintenanceLoop {
    sessions: Arc<Mutex<SessionManager>>,
    scheduler: TickScheduler,
}

impl MaintenanceLoop {
    pub fn new(sessions: Arc<Mutex<SessionManager>>, tick: TickConfig) -> Self {
        Self {
            sessions,
            scheduler: TickScheduler::new(tick),
        }
    }

    /// A loop ticking at the manager's `gameLoopSpeed`.
    pub async fn for_manager(sessions: Arc<Mutex<SessionManager>>) -> Self {
        let speed = sessions.lock().await.config().tick_interval();
        Self::new(sessions, TickConfig::every(speed))
    }

    /// Spawns the loop. It runs until [`MaintenanceHandle::stop`] is
    /// called or the handle is dropped.
    pub fn spawn(self) -> MaintenanceHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        MaintenanceHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        tracing::info!(interval = ?self.scheduler.interval(), "maintenance loop started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                info = self.scheduler.wait_for_tick() => {
                    {
                        let mut sessions = self.sessions.lock().await;
                        sessions.maintain();
                    }
                    if let Some(elapsed) = self.scheduler.record_tick_end() {
                        tracing::trace!(tick = info.tick, ?elapsed, "maintenance pass done");
                    }
                }
            }
        }
        tracing::info!(ticks = self.scheduler.tick_count(), "maintenance loop stopped");
    }
}

/// Owner's side of a spawned [`MaintenanceLoop`].
pub struct MaintenanceHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stops the loop and waits for the pass in progress, if any, to end.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
