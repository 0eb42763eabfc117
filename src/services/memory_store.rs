use crate::error::Result;
use crate::models::{Bar, DateRange, JobId, Period, SyncJob, Timeframe};
use crate::services::store::{BarStore, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};

type SeriesKey = (String, Timeframe);

/// In-process store with the same semantics as [`SqliteStore`](crate::services::SqliteStore)
#[derive(Debug, Default)]
pub struct MemoryStore {
    bars: RwLock<HashMap<SeriesKey, BTreeMap<i64, Bar>>>,
    jobs: Mutex<HashMap<JobId, SyncJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored bars for the key in timestamp order
    pub async fn bars(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let bars = self.bars.read().await;
        bars.get(&(symbol.to_string(), timeframe))
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BarStore for MemoryStore {
    async fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(symbol.to_string(), timeframe))
            .and_then(|series| series.values().next_back())
            .map(|bar| bar.timestamp))
    }

    async fn existing_timestamps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<HashSet<i64>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(symbol.to_string(), timeframe))
            .map(|series| {
                series
                    .range(range.from.timestamp_millis()..=range.to.timestamp_millis())
                    .map(|(ts, _)| *ts)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_ignore(&self, bars: &[Bar]) -> Result<usize> {
        let mut stored = self.bars.write().await;
        let mut written = 0;

        for bar in bars {
            let series = stored
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(bar.timestamp_ms()) {
                slot.insert(bar.clone());
                written += 1;
            }
        }

        Ok(written)
    }

    async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<u64> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.len() as u64)
            .unwrap_or(0))
    }

    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<u64> {
        Ok(self.existing_timestamps(symbol, timeframe, range).await?.len() as u64)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_or_get_running(&self, job: SyncJob) -> Result<(SyncJob, bool)> {
        let mut jobs = self.jobs.lock().await;

        let running = jobs.values().find(|existing| {
            !existing.status.is_terminal()
                && existing.symbol == job.symbol
                && existing.timeframe == job.timeframe
                && existing.period == job.period
        });

        if let Some(existing) = running {
            return Ok((existing.clone(), true));
        }

        jobs.insert(job.id, job.clone());
        Ok((job, false))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<SyncJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_running(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
    ) -> Result<Option<SyncJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .find(|job| {
                !job.status.is_terminal()
                    && job.symbol == symbol
                    && job.timeframe == timeframe
                    && job.period == period
            })
            .cloned())
    }

    async fn update_running(&self, job: &SyncJob) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job.id) {
            Some(stored) if !stored.status.is_terminal() => {
                *stored = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn daily(symbol: &str, day: u32) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap();
        Bar::new(symbol, Timeframe::Day1, ts, dec!(10), dec!(11), dec!(9), dec!(10.5), 500)
    }

    #[tokio::test]
    async fn test_insert_ignore_keeps_first_write() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_ignore(&[daily("SPY", 1), daily("SPY", 2)]).await.unwrap(), 2);

        let mut changed = daily("SPY", 2);
        changed.close = dec!(99);
        assert_eq!(store.insert_ignore(&[changed, daily("SPY", 3)]).await.unwrap(), 1);

        let bars = store.bars("SPY", Timeframe::Day1).await;
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].close, dec!(10.5));
        assert_eq!(
            store.latest_timestamp("SPY", Timeframe::Day1).await.unwrap(),
            Some(bars[2].timestamp)
        );
    }

    #[tokio::test]
    async fn test_existing_timestamps_respects_range() {
        let store = MemoryStore::new();
        store
            .insert_ignore(&[daily("QQQ", 1), daily("QQQ", 10), daily("QQQ", 20)])
            .await
            .unwrap();

        let range = DateRange::new(
            Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap(),
        );
        let existing = store.existing_timestamps("QQQ", Timeframe::Day1, range).await.unwrap();
        assert_eq!(existing.len(), 2);
        assert_eq!(store.count_in_range("QQQ", Timeframe::Day1, range).await.unwrap(), 2);
        assert_eq!(store.count("QQQ", Timeframe::Day1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_running_job_single_flight() {
        let store = MemoryStore::new();
        let range = DateRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        );

        let first = SyncJob::new("TSLA", Timeframe::Hour1, Period::Month6, range, 100);
        let (_, existed) = store.insert_or_get_running(first.clone()).await.unwrap();
        assert!(!existed);

        let second = SyncJob::new("TSLA", Timeframe::Hour1, Period::Month6, range, 100);
        let (stored, existed) = store.insert_or_get_running(second).await.unwrap();
        assert!(existed);
        assert_eq!(stored.id, first.id);

        let mut failed = first.clone();
        failed.status = JobStatus::Failed;
        assert!(store.update_running(&failed).await.unwrap());
        assert!(!store.update_running(&first).await.unwrap());
        assert!(store.find_running("TSLA", Timeframe::Hour1, Period::Month6).await.unwrap().is_none());
    }
}
