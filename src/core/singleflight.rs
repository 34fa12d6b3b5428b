//! Generic cache-stampede protection: collapses concurrent callers racing
//! on the same key into one in-flight operation, with all callers awaiting
//! the same cloned result.

use crate::core::errors::ProxyError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, ProxyError>>>;

/// Keyed by an arbitrary string (a cache name, in practice). One leader
/// builds and inserts the shared future; followers clone it and await the
/// same result; the leader removes the entry once the future resolves.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: DashMap<String, SharedResult<T>>,
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Runs `make` (lazily) to produce the future for this key unless
    /// another caller is already in flight for it, then awaits the shared
    /// result. `make` is only invoked by the leader.
    pub async fn run<F>(&self, key: &str, make: F) -> Result<T, ProxyError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, ProxyError>>,
    {
        let shared = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                debug!(cache_name = %key, "single-flight: joining in-flight fetch");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                debug!(cache_name = %key, "single-flight: leading fetch");
                let shared = make().shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        let result = shared.await;
        self.inflight.remove(key);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let sf: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("k", || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(42u32)
                    }
                    .boxed()
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_is_removed_after_completion() {
        let sf: SingleFlight<u32> = SingleFlight::new();
        sf.run("k", || async { Ok(1u32) }.boxed()).await.unwrap();
        assert!(sf.inflight.is_empty());
    }
}
