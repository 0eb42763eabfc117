mod bar;
mod date_range;
mod sync_config;
mod sync_job;
mod timeframe;

pub use bar::Bar;
pub use date_range::{Chunk, DateRange};
pub use sync_config::{BulkDownloadReport, ProviderConfig, SyncConfig, SyncReport};
pub use sync_job::{JobHandle, JobId, JobProgress, JobStatus, Period, SyncJob};
pub use timeframe::Timeframe;
