//! Long-running background tasks (C8): mutable-artifact refresh,
//! GOMODCACHE lock reaping, and on-disk cache size enforcement. Every task
//! accepts a shutdown broadcast receiver and exits promptly on shutdown,
//! matching the supervision pattern used by the dispatcher's own
//! request-handling tasks.

pub mod disk_gc;
pub mod lock_reaper;
pub mod refresh;

pub use disk_gc::DiskGcTask;
pub use lock_reaper::LockReaperTask;
pub use refresh::RefreshWorker;
