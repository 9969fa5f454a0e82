//! Retention sweeper
//!
//! Deletes aggregate rows older than the configured horizon, once at start
//! and then every hour. Sweep errors are logged and retried next tick;
//! log_position rows are never touched.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::Store;
use crate::parser::hour_bucket;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Cleaner {
    store: Store,
    retention_days: u32,
    interval: Duration,
}

impl Cleaner {
    pub fn new(store: Store, retention_days: u32) -> Self {
        Self {
            store,
            retention_days,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sweeps immediately, then on every interval tick until cancelled.
    pub async fn run(self, token: CancellationToken) {
        if let Err(e) = self.sweep().await {
            error!(error = %e, "initial retention sweep failed");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // the immediate tick; the sweep above covered it

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let cutoff = cutoff_hour(self.retention_days);
        let counts = self.store.purge_older_than(&cutoff).await?;

        let total: u64 = counts.iter().map(|(_, n)| n).sum();
        info!(
            cutoff = %cutoff,
            total,
            detail = ?counts,
            "retention sweep complete"
        );
        Ok(())
    }
}

/// UTC hour string below which aggregate rows are deleted.
fn cutoff_hour(retention_days: u32) -> String {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
    hour_bucket(&cutoff)
}
