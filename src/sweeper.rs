//! Expired-entry sweeper
//!
//! Background task that periodically purges expired entries so storage does
//! not grow with keys that are never read again. Reads never depend on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache_manager::CacheManager;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to the sweeper task
///
/// Dropping the handle signals the task to stop.
pub struct Sweeper {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Sweeper {
    /// Spawn the sweeper, running every `interval`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(manager: Arc<CacheManager>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = manager.sweep_expired().await;
                        debug!(purged, "Sweep pass finished");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Sweeper shutting down...");
                        break;
                    }
                }
            }
        });

        info!(interval = ?interval, "Expired-entry sweeper started");

        Self {
            shutdown_tx,
            handle: Some(handle),
            interval,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the sweeper to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Signal shutdown and wait for the task to exit
    pub async fn stop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
