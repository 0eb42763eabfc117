pub mod calendar;
pub mod chunked_fetcher;
pub mod data_sync;
pub mod database;
pub mod dedup_writer;
pub mod job_tracker;
pub mod memory_store;
pub mod polygon_client;
pub mod provider;
pub mod staleness;
pub mod store;
pub mod sync_engine;

#[cfg(test)]
pub(crate) mod test_support;

pub use calendar::Calendar;
pub use chunked_fetcher::ChunkedFetcher;
pub use data_sync::{SyncOrchestrator, CANCELLED_MESSAGE};
pub use database::SqliteStore;
pub use dedup_writer::DedupWriter;
pub use job_tracker::JobTracker;
pub use memory_store::MemoryStore;
pub use polygon_client::PolygonClient;
pub use provider::{BarProvider, PageRequest, ProviderPage, ProviderStatus, RawBar};
pub use staleness::StalenessDetector;
pub use store::{BarStore, JobStore, Store};
pub use sync_engine::SyncEngine;
