//! GOMODCACHE lock reaper: a periodic task guarding against a leaked
//! advisory lock left behind by a server that crashed mid-fetch. The
//! release-on-cancellation path in the toolchain fetcher is the primary
//! defense; this is a backstop.
//!
//! The lock is a single, un-keyed file (direct fetches are serialized
//! process-wide, not per-module), so there's no per-owner bookkeeping to
//! inspect. Instead the reaper watches for the lock being held continuously
//! across several consecutive checks spanning longer than the configured
//! fetch timeout — a span a live holder can never exceed, since every
//! toolchain invocation is itself bounded by that same timeout. Past that
//! point the holder can only be a crashed process, and the lock file is
//! removed so a fresh `open()` starts an unlocked lineage.

use std::path::PathBuf;
use std::time::Duration;

use fs4::tokio::AsyncFileExt;
use tokio::fs::OpenOptions;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::toolchain::LOCK_FILE_NAME;

pub struct LockReaperTask {
    gomodcache: PathBuf,
    fetch_timeout: Duration,
    reap_interval: Duration,
}

impl LockReaperTask {
    pub fn new(gomodcache: PathBuf, fetch_timeout: Duration, reap_interval: Duration) -> Self {
        Self {
            gomodcache,
            fetch_timeout,
            reap_interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval = ?self.reap_interval, "gomodcache lock reaper started");
        let mut interval = tokio::time::interval(self.reap_interval);
        let max_consecutive_busy =
            (self.fetch_timeout.as_secs_f64() / self.reap_interval.as_secs_f64()).ceil() as u32 + 1;
        let mut consecutive_busy = 0u32;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.check_once().await {
                        Ok(true) => consecutive_busy = 0,
                        Ok(false) => {
                            consecutive_busy += 1;
                            if consecutive_busy > max_consecutive_busy {
                                self.reap().await;
                                consecutive_busy = 0;
                            }
                        }
                        Err(e) => warn!(error = %e, "lock reaper failed to probe gomodcache lock"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("gomodcache lock reaper shutting down");
                    return;
                }
            }
        }
    }

    /// Returns `Ok(true)` if the lock was free (and is now released again).
    async fn check_once(&self) -> std::io::Result<bool> {
        let path = self.gomodcache.join(LOCK_FILE_NAME);
        if !path.exists() {
            return Ok(true);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let acquired = file.try_lock_exclusive()?;
        if acquired {
            AsyncFileExt::unlock_async(&file).await?;
        }
        Ok(acquired)
    }

    async fn reap(&self) {
        let path = self.gomodcache.join(LOCK_FILE_NAME);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => warn!(path = %path.display(), "removed gomodcache lock held past the fetch timeout"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale gomodcache lock"),
        }
    }
}
