//! Storage seams
//!
//! The engine talks to persistence only through these two traits so the
//! SQLite store and the in-memory store are interchangeable.

use crate::error::Result;
use crate::models::{Bar, DateRange, JobId, Period, SyncJob, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Bar persistence keyed by `(symbol, timestamp, timeframe)`
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Newest stored bar timestamp for the key, `None` if nothing is stored
    async fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Stored timestamps (epoch millis) for the key inside `range`
    async fn existing_timestamps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<HashSet<i64>>;

    /// Insert bars, silently skipping keys that already exist. Returns rows written.
    async fn insert_ignore(&self, bars: &[Bar]) -> Result<usize>;

    /// Number of stored bars for the key
    async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<u64>;

    /// Number of stored bars for the key inside `range`
    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<u64>;
}

/// Durable job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically insert `job` unless an `in_progress` job exists for the same
    /// `(symbol, timeframe, period)`. Returns the stored job and whether it
    /// was pre-existing.
    async fn insert_or_get_running(&self, job: SyncJob) -> Result<(SyncJob, bool)>;

    async fn get_job(&self, id: JobId) -> Result<Option<SyncJob>>;

    async fn find_running(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
    ) -> Result<Option<SyncJob>>;

    /// Persist `job` only while the stored record is still `in_progress`.
    /// Returns false when the stored job is already terminal.
    async fn update_running(&self, job: &SyncJob) -> Result<bool>;
}

/// Both halves of the store
pub trait Store: BarStore + JobStore {}

impl<T: BarStore + JobStore> Store for T {}
