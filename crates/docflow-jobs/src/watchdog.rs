//! Stale-cell watchdog.
//!
//! A job that is submitted but never reported leaves its document in
//! Processing forever. The watchdog fails every still-pending cell of
//! documents that have not changed for `stale_after`, which moves them to
//! Erroneous through the regular recording path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use docflow_core::defaults::{STALE_AFTER_SECS, WATCHDOG_INTERVAL_SECS};
use docflow_core::{Error, Result};

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub stale_after: Duration,
    pub interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(STALE_AFTER_SECS),
            interval: Duration::from_secs(WATCHDOG_INTERVAL_SECS),
        }
    }
}

impl WatchdogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let stale_after = std::env::var("DOCFLOW_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(STALE_AFTER_SECS);
        let interval = std::env::var("DOCFLOW_WATCHDOG_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WATCHDOG_INTERVAL_SECS)
            .max(1);
        Self {
            stale_after: Duration::from_secs(stale_after),
            interval: Duration::from_secs(interval),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub documents: usize,
    pub cells_failed: usize,
}

pub struct Watchdog {
    dispatcher: Arc<Dispatcher>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(dispatcher: Arc<Dispatcher>, config: WatchdogConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Fail the pending cells of every document stale as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| Error::Config(format!("Invalid stale_after: {}", e)))?;
        let stale = self.dispatcher.store().list_stale(now - stale_after).await?;

        let mut report = SweepReport::default();
        for document in stale {
            let pending = document.completion.pending_jobs();
            if pending.is_empty() {
                continue;
            }
            report.documents += 1;
            for job_type in pending {
                let recorded = self.dispatcher.mark_stale(document.id, job_type).await?;
                if recorded.cell_changed {
                    report.cells_failed += 1;
                }
            }
        }

        if report.documents > 0 {
            info!(
                subsystem = "jobs",
                component = "watchdog",
                op = "sweep",
                documents = report.documents,
                cells_failed = report.cells_failed,
                "Failed stale cells"
            );
        }
        Ok(report)
    }

    /// Run `sweep` on an interval until the returned sender is dropped or
    /// receives a message.
    pub fn spawn(self) -> (mpsc::Sender<()>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            error!(
                                subsystem = "jobs",
                                component = "watchdog",
                                op = "sweep",
                                error = %e,
                                "Watchdog sweep failed"
                            );
                        }
                    }
                }
            }
            info!(subsystem = "jobs", component = "watchdog", "Watchdog stopped");
        });
        (shutdown_tx, task)
    }
}
