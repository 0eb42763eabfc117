use crate::error::{AppError, Result};
use crate::models::{BulkDownloadReport, Chunk, DateRange, JobId, SyncConfig, SyncReport, Timeframe};
use crate::services::calendar::Calendar;
use crate::services::chunked_fetcher::ChunkedFetcher;
use crate::services::dedup_writer::DedupWriter;
use crate::services::job_tracker::JobTracker;
use crate::services::provider::BarProvider;
use crate::services::staleness::StalenessDetector;
use crate::services::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Message recorded on jobs stopped by a caller
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Drives fetch, dedup-write and progress updates for both sync paths
pub struct SyncOrchestrator {
    config: SyncConfig,
    staleness: StalenessDetector,
    fetcher: ChunkedFetcher,
    writer: DedupWriter,
    tracker: JobTracker,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn BarProvider>,
        calendar: Calendar,
        config: SyncConfig,
    ) -> Self {
        Self {
            staleness: StalenessDetector::new(store.clone(), calendar),
            fetcher: ChunkedFetcher::from_config(provider, &config),
            writer: DedupWriter::new(store.clone(), config.write_batch_size),
            tracker: JobTracker::new(store),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn staleness(&self) -> &StalenessDetector {
        &self.staleness
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Month chunks for long minute-resolution ranges, calendar years otherwise
    pub fn plan_chunks(&self, timeframe: Timeframe, range: DateRange) -> Vec<Chunk> {
        if timeframe.is_minute() && range.span_days() > self.config.minute_chunk_threshold_days as f64 {
            range.split_by_month()
        } else {
            range.split_by_year()
        }
    }

    /// Fetch and write whatever is missing since the newest stored bar.
    ///
    /// Fresh keys are a no-op. Keys without any stored bars fail with
    /// [`AppError::NotOnboarded`].
    #[instrument(skip(self))]
    pub async fn sync_incremental(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        if !self.staleness.needs_sync(symbol, timeframe, now).await? {
            debug!("Already up to date");
            return Ok(SyncReport::up_to_date(symbol, timeframe));
        }

        let range = match self.staleness.missing_range(symbol, timeframe, now).await {
            Ok(range) => range,
            Err(AppError::RangeEmpty) => return Ok(SyncReport::up_to_date(symbol, timeframe)),
            Err(e) => return Err(e),
        };

        info!(range = %range, "Syncing missing range");
        let bars = self.fetcher.fetch(symbol, timeframe, range).await?;
        let fetched = bars.len();
        let written = self.writer.write_new(symbol, timeframe, bars).await?;

        Ok(SyncReport {
            symbol: symbol.to_string(),
            timeframe,
            range: Some(range),
            fetched,
            written,
        })
    }

    /// Download a tracked job's range chunk by chunk.
    ///
    /// A failing chunk is logged and skipped. The job stays `in_progress`
    /// until the last chunk, then ends `completed` (possibly partial, even
    /// with every chunk failed) unless `cancel` fired.
    /// `on_progress` receives `(percent of chunks done, chunk label)`.
    #[instrument(skip(self, cancel, on_progress))]
    pub async fn run_bulk<F>(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<BulkDownloadReport>
    where
        F: FnMut(f64, &str) + Send,
    {
        let job = self.tracker.get(job_id).await?;
        let chunks = self.plan_chunks(job.timeframe, job.range());
        let started = Instant::now();

        let mut report = BulkDownloadReport {
            job_id: Some(job_id),
            chunks_total: chunks.len(),
            ..BulkDownloadReport::default()
        };

        info!(
            symbol = %job.symbol,
            timeframe = %job.timeframe,
            period = %job.period,
            chunks = chunks.len(),
            expected = job.expected_records,
            "Starting bulk download"
        );

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(self.config.chunk_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return self.finish_cancelled(job_id, report).await;
            }

            debug!(chunk = %chunk.label, range = %chunk.range, "Downloading chunk");

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return self.finish_cancelled(job_id, report).await,
                fetched = self.fetcher.fetch(&job.symbol, job.timeframe, chunk.range) => fetched,
            };

            let written = match fetched {
                Ok(bars) => self.writer.write_new(&job.symbol, job.timeframe, bars).await,
                Err(e) => Err(e),
            };

            match written {
                Ok(count) => report.records_written += count,
                Err(e) => {
                    report.chunks_failed += 1;
                    error!(chunk = %chunk.label, error = %e, "Chunk failed, continuing with next chunk");
                }
            }

            if let Err(e) = self.tracker.report_chunk_progress(job_id, &chunk.label).await {
                warn!(chunk = %chunk.label, error = %e, "Failed to record progress");
            }

            let percent = (index + 1) as f64 * 100.0 / chunks.len() as f64;
            on_progress(percent, &chunk.label);
        }

        if report.chunks_total > 0 && report.chunks_failed == report.chunks_total {
            warn!(chunks = report.chunks_total, "Every chunk failed, completing with no new data");
        }
        let final_state = self.tracker.complete(job_id).await?;

        info!(
            status = %final_state.status,
            records_written = report.records_written,
            chunks_failed = report.chunks_failed,
            current = final_state.current_records,
            expected = final_state.expected_records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bulk download finished"
        );
        Ok(report)
    }

    async fn finish_cancelled(&self, job_id: JobId, mut report: BulkDownloadReport) -> Result<BulkDownloadReport> {
        report.cancelled = true;
        self.tracker.fail(job_id, CANCELLED_MESSAGE).await?;
        info!(records_written = report.records_written, "Bulk download cancelled");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, JobStatus, Period};
    use crate::services::memory_store::MemoryStore;
    use crate::services::provider::ProviderPage;
    use crate::services::store::BarStore;
    use crate::services::test_support::{synthetic_bars, FnProvider};
    use chrono::{Datelike, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn orchestrator(store: Arc<MemoryStore>, provider: Arc<FnProvider>) -> SyncOrchestrator {
        SyncOrchestrator::new(store, provider, Calendar::default(), SyncConfig::default())
    }

    fn five_years() -> DateRange {
        DateRange::new(
            Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_plan_chunks() {
        let sync = orchestrator(Arc::new(MemoryStore::new()), Arc::new(FnProvider::synthetic()));

        let long = DateRange::new(
            Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 19, 0, 0, 0).unwrap(),
        );
        let chunks = sync.plan_chunks(Timeframe::Minute1, long);
        assert_eq!(chunks.len(), 14);
        assert_eq!(chunks[0].label, "2023-01");

        let short = DateRange::new(long.from, long.from + chrono::Duration::days(60));
        assert_eq!(sync.plan_chunks(Timeframe::Minute5, short).len(), 1);

        let labels: Vec<_> = sync
            .plan_chunks(Timeframe::Day1, five_years())
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["2019", "2020", "2021", "2022", "2023"]);
        assert_eq!(sync.plan_chunks(Timeframe::Hour1, long).len(), 2);
    }

    #[tokio::test]
    async fn test_incremental_sync_fills_gap_then_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let friday = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        let seed = Bar::new("AAPL", Timeframe::Day1, friday, dec!(1), dec!(1), dec!(1), dec!(1), 1);
        store.insert_ignore(&[seed]).await.unwrap();

        let provider = Arc::new(FnProvider::synthetic());
        let sync = orchestrator(store.clone(), provider.clone());
        let tuesday_evening = Utc.with_ymd_and_hms(2024, 3, 12, 22, 0, 0).unwrap();

        let report = sync.sync_incremental("AAPL", Timeframe::Day1, tuesday_evening).await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.count("AAPL", Timeframe::Day1).await.unwrap(), 3);

        let again = sync.sync_incremental("AAPL", Timeframe::Day1, tuesday_evening).await.unwrap();
        assert_eq!(again, SyncReport::up_to_date("AAPL", Timeframe::Day1));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.count("AAPL", Timeframe::Day1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incremental_sync_requires_onboarding() {
        let provider = Arc::new(FnProvider::synthetic());
        let sync = orchestrator(Arc::new(MemoryStore::new()), provider.clone());
        let now = Utc.with_ymd_and_hms(2024, 3, 12, 22, 0, 0).unwrap();

        let err = sync.sync_incremental("NEW", Timeframe::Minute1, now).await.unwrap_err();
        assert!(matches!(err, AppError::NotOnboarded(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_download_survives_failing_chunk() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::new(|request, _| {
            if request.range.from.year() == 2021 {
                return Err(AppError::ProviderUnavailable("503 for 2021".to_string()));
            }
            Ok(ProviderPage::ok(synthetic_bars(request.timeframe, request.range), None))
        }));
        let sync = orchestrator(store.clone(), provider.clone());

        let handle = sync
            .tracker()
            .create_or_attach("AAPL", Timeframe::Day1, Period::Year5, five_years())
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = sync
            .run_bulk(handle.job_id, &CancellationToken::new(), move |pct, label| {
                sink.lock().unwrap().push((pct, label.to_string()));
            })
            .await
            .unwrap();

        assert_eq!(report.chunks_total, 5);
        assert_eq!(report.chunks_failed, 1);
        assert!(!report.cancelled);
        assert_eq!(provider.call_count(), 5);

        let job = sync.tracker().get(handle.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100.0);
        assert!(job.current_records < job.expected_records);
        assert!(job.is_partial());
        assert_eq!(job.current_records as usize, report.records_written);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], (20.0, "2019".to_string()));
        assert_eq!(seen[4], (100.0, "2023".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_download_all_chunks_failing_still_completes() {
        let provider = Arc::new(FnProvider::new(|_, _| {
            Err(AppError::ProviderUnavailable("down".to_string()))
        }));
        let sync = orchestrator(Arc::new(MemoryStore::new()), provider);
        let handle = sync
            .tracker()
            .create_or_attach("AAPL", Timeframe::Day1, Period::Year5, five_years())
            .await
            .unwrap();

        let report = sync.run_bulk(handle.job_id, &CancellationToken::new(), |_, _| {}).await.unwrap();
        assert_eq!(report.chunks_total, 5);
        assert_eq!(report.chunks_failed, 5);
        assert_eq!(report.records_written, 0);

        let job = sync.tracker().get(handle.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percentage, 100.0);
        assert_eq!(job.current_records, 0);
        assert!(job.is_partial());
        assert_eq!(job.error_message, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_chunks_and_keeps_data() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::synthetic());
        let sync = orchestrator(store.clone(), provider.clone());
        let handle = sync
            .tracker()
            .create_or_attach("AAPL", Timeframe::Day1, Period::Year5, five_years())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let report = sync
            .run_bulk(handle.job_id, &cancel, move |_, _| trigger.cancel())
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(provider.call_count(), 1);
        assert!(report.records_written > 0);

        let job = sync.tracker().get(handle.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(job.current_records as usize, report.records_written);
        assert_eq!(store.count("AAPL", Timeframe::Day1).await.unwrap() as usize, report.records_written);
    }
}
