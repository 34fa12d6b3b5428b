//! Mutable-artifact refresher: drains background refresh jobs enqueued by
//! the dispatcher when it serves a stale `list` or `@latest` hit, re-runs
//! the fetch, and writes the result back via `Cache.Put` without blocking
//! the client that triggered it.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::core::dispatcher;
use crate::core::state::{RefreshJob, ServerState};

pub struct RefreshWorker {
    state: Arc<ServerState>,
    rx: mpsc::Receiver<RefreshJob>,
}

impl RefreshWorker {
    pub fn new(state: Arc<ServerState>, rx: mpsc::Receiver<RefreshJob>) -> Self {
        Self { state, rx }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("mutable-artifact refresh worker started");
        loop {
            tokio::select! {
                Some(job) = self.rx.recv() => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = refresh_one(state, job).await {
                            warn!(error = %e, "background refresh failed");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("mutable-artifact refresh worker shutting down");
                    return;
                }
            }
        }
    }
}

async fn refresh_one(state: Arc<ServerState>, job: RefreshJob) -> Result<(), crate::core::errors::ProxyError> {
    let bytes = dispatcher::run_fetch(state.clone(), job.req, job.cache_name.clone()).await?;
    state.cache.put(&job.cache_name, bytes).await
}
