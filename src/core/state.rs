//! Shared, process-wide server state handed to every request handler and
//! background task.

use crate::config::Config;
use crate::core::cache::DirCacher;
use crate::core::fetch::UpstreamChain;
use crate::core::path::ModuleRequest;
use crate::core::singleflight::SingleFlight;
use crate::core::sumdb::SumdbProxy;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// A background refresh request for a stale mutable artifact (`list` or
/// `@latest`), enqueued by the dispatcher and drained by
/// [`crate::core::tasks::refresh_worker`].
#[derive(Debug)]
pub struct RefreshJob {
    pub cache_name: String,
    pub req: ModuleRequest,
}

pub struct ServerState {
    pub config: Mutex<Config>,
    pub cache: DirCacher,
    pub upstream: UpstreamChain,
    pub sumdb: SumdbProxy,
    pub single_flight: SingleFlight<Bytes>,
    pub refresh_tx: mpsc::Sender<RefreshJob>,
}

pub type SharedState = Arc<ServerState>;
