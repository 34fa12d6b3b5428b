//! Server startup: builds shared state, spawns background tasks, and runs
//! the axum HTTP server until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::config::Config;
use crate::core::cache::DirCacher;
use crate::core::dispatcher;
use crate::core::fetch::UpstreamChain;
use crate::core::singleflight::SingleFlight;
use crate::core::state::{RefreshJob, ServerState};
use crate::core::sumdb::SumdbProxy;
use crate::core::tasks::{DiskGcTask, LockReaperTask, RefreshWorker};
use crate::core::toolchain::ToolchainFetcher;

const REFRESH_QUEUE_CAPACITY: usize = 256;

/// Orchestrates startup: builds the shared state, spawns every background
/// task, and serves HTTP until a shutdown signal is broadcast.
pub async fn run(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .context("invalid bind_host/bind_port")?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_CAPACITY);

    let state = Arc::new(build_state(config, refresh_tx).await?);

    spawn_background_tasks(state.clone(), refresh_rx, &shutdown_tx).await;

    let app = Router::new()
        .fallback(dispatcher::handle)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "goproxycache listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("http server shutting down");
            let _ = shutdown_tx.send(());
        })
        .await
        .context("http server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn build_state(config: Config, refresh_tx: mpsc::Sender<RefreshJob>) -> Result<ServerState> {
    let cache = DirCacher::new(PathBuf::from(&config.cache.cacher_dir));

    let direct = Arc::new(ToolchainFetcher::new(
        config.fetch.go_bin.clone(),
        PathBuf::from(&config.fetch.gomodcache),
        PathBuf::from(&config.fetch.temp_dir),
        config.fetch.fetch_timeout,
        config.fetch.max_direct_fetches,
    ));

    let http = reqwest::Client::builder()
        .connect_timeout(config.fetch.connect_timeout)
        .danger_accept_invalid_certs(config.fetch.insecure)
        .build()
        .context("failed to build http client")?;

    let upstream = UpstreamChain::new(
        &config.fetch.upstream_proxies,
        http.clone(),
        direct,
        config.fetch.fetch_timeout,
    );

    let sumdb = SumdbProxy::new(
        config.sumdb.proxied_sumdbs.clone(),
        http,
        config.fetch.fetch_timeout,
    );

    Ok(ServerState {
        config: tokio::sync::Mutex::new(config),
        cache,
        upstream,
        sumdb,
        single_flight: SingleFlight::new(),
        refresh_tx,
    })
}

async fn spawn_background_tasks(
    state: Arc<ServerState>,
    refresh_rx: mpsc::Receiver<RefreshJob>,
    shutdown_tx: &broadcast::Sender<()>,
) {
    let (gomodcache, fetch_timeout, lock_reap_interval, gc_interval) = {
        let config = state.config.lock().await;
        (
            PathBuf::from(&config.fetch.gomodcache),
            config.fetch.fetch_timeout,
            config.fetch.lock_reap_interval,
            config.cache.gc_interval,
        )
    };

    tokio::spawn(RefreshWorker::new(state.clone(), refresh_rx).run(shutdown_tx.subscribe()));
    tokio::spawn(
        LockReaperTask::new(gomodcache, fetch_timeout, lock_reap_interval).run(shutdown_tx.subscribe()),
    );
    tokio::spawn(DiskGcTask::new(state, gc_interval).run(shutdown_tx.subscribe()));
}
