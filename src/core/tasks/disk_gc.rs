//! On-disk cache size enforcement: when `cache.max-disk-size` is
//! configured, periodically scans the `DirCacher` root and evicts the
//! least-recently-accessed immutable artifacts (by mtime, since the cacher
//! keeps no in-memory index) until the total is back under the cap.
//! `list`/`@latest` artifacts are never evicted here — they're rewritten in
//! place by the refresher, not accumulated.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::state::ServerState;

pub struct DiskGcTask {
    state: Arc<ServerState>,
    interval: Duration,
}

struct Evictable {
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
}

impl DiskGcTask {
    pub fn new(state: Arc<ServerState>, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let max_disk_size = self.state.config.lock().await.cache.max_disk_size;
        if max_disk_size == 0 {
            info!("on-disk cache size enforcement disabled (cache.max-disk-size = 0)");
            return;
        }
        info!(cap = max_disk_size, interval = ?self.interval, "on-disk cache size enforcement started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.enforce(max_disk_size).await {
                        warn!(error = %e, "on-disk cache size enforcement cycle failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("on-disk cache size enforcement shutting down");
                    return;
                }
            }
        }
    }

    async fn enforce(&self, max_disk_size: u64) -> std::io::Result<()> {
        let root = self.state.cache.root().to_path_buf();
        let mut entries = Vec::new();
        collect_evictable(&root, &root, &mut entries).await?;

        let total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= max_disk_size {
            return Ok(());
        }

        info!(total, cap = max_disk_size, "on-disk cache over size cap, evicting");
        entries.sort_by_key(|e| e.mtime);

        let mut to_free = total - max_disk_size;
        let mut evicted = 0usize;
        for entry in entries {
            if to_free == 0 {
                break;
            }
            if tokio::fs::remove_file(&entry.path).await.is_ok() {
                let _ = tokio::fs::remove_file(sidecar_path(&entry.path)).await;
                to_free = to_free.saturating_sub(entry.size);
                evicted += 1;
            }
        }
        info!(evicted, "on-disk cache eviction cycle finished");
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let basename = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{basename}.etag"))
}

fn is_mutable_artifact(rel: &Path) -> bool {
    let rel = rel.to_string_lossy();
    rel.ends_with("/@v/list") || rel == "@v/list" || rel.ends_with("@latest")
}

fn collect_evictable<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<Evictable>,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                collect_evictable(root, &path, out).await?;
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Sidecars, in-flight tempfiles, and the gomodcache lock are
            // never independently evictable.
            if name.starts_with('.') {
                continue;
            }
            let rel = path.strip_prefix(root).unwrap_or(&path);
            if is_mutable_artifact(rel) {
                continue;
            }
            let metadata = entry.metadata().await?;
            out.push(Evictable {
                path,
                size: metadata.len(),
                mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutable_artifact_names_are_excluded() {
        assert!(is_mutable_artifact(Path::new("example.com/foo/@v/list")));
        assert!(is_mutable_artifact(Path::new("example.com/foo/@latest")));
        assert!(!is_mutable_artifact(Path::new("example.com/foo/@v/v1.0.0.zip")));
    }
}
