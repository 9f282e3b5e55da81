//! Background sync worker: periodic forward/backward passes under a single
//! lifecycle with graceful shutdown and broadcast events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{info, warn};

use janus_core::{defaults, Result, SyncDirection};

use crate::synchronizer::{SyncReport, Synchronizer};

/// Configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// Interval between periodic passes in seconds.
    pub interval_secs: u64,
    /// Whether the worker runs at all.
    pub enabled: bool,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SYNC_INTERVAL_SECS,
            enabled: true,
        }
    }
}

impl SyncWorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SYNC_WORKER_ENABLED` | `true` | Enable/disable periodic sync |
    /// | `SYNC_INTERVAL_SECS` | `60` | Seconds between passes |
    pub fn from_env() -> Self {
        let enabled = std::env::var("SYNC_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let interval_secs = std::env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SYNC_INTERVAL_SECS);

        Self {
            interval_secs,
            enabled,
        }
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the sync worker.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    WorkerStarted,
    PassCompleted {
        direction: SyncDirection,
        applied: u64,
        skipped: u64,
        failed: u64,
    },
    PassFailed {
        direction: SyncDirection,
        error: String,
    },
    WorkerStopped,
}

/// Handle for controlling a running sync worker.
pub struct SyncHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SyncEvent>,
}

impl SyncHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| janus_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_rx.resubscribe()
    }
}

/// Periodic driver around a [`Synchronizer`].
pub struct SyncWorker {
    synchronizer: Arc<Synchronizer>,
    config: SyncWorkerConfig,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncWorker {
    pub fn new(synchronizer: Arc<Synchronizer>, config: SyncWorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            synchronizer,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        SyncHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Sync worker is disabled, not starting");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            "Sync worker started"
        );
        let _ = self.event_tx.send(SyncEvent::WorkerStarted);

        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync worker received shutdown signal");
                    break;
                }
                _ = sleep(interval) => {
                    self.run_pass(SyncDirection::Forward).await;
                    self.run_pass(SyncDirection::Backward).await;
                }
            }
        }

        let _ = self.event_tx.send(SyncEvent::WorkerStopped);
    }

    async fn run_pass(&self, direction: SyncDirection) {
        match self.synchronizer.run(direction).await {
            Ok(report) => {
                let _ = self.event_tx.send(SyncEvent::PassCompleted {
                    direction,
                    applied: report.applied,
                    skipped: report.skipped,
                    failed: report.failed,
                });
            }
            Err(e) => {
                warn!(direction = %direction, error = %e, "Sync pass failed");
                let _ = self.event_tx.send(SyncEvent::PassFailed {
                    direction,
                    error: e.to_string(),
                });
            }
        }
    }

    /// One immediate pass, outside the periodic schedule.
    pub async fn run_now(&self, direction: SyncDirection) -> Result<SyncReport> {
        self.synchronizer.run(direction).await
    }
}
