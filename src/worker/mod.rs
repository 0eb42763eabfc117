pub mod stale_sync_worker;

pub use stale_sync_worker::run as run_stale_sync_worker;
pub use stale_sync_worker::{run_iteration, IterationStats, WorkerSettings};
