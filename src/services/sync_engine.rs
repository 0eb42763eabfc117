use crate::error::{AppError, Result};
use crate::models::{JobHandle, JobId, JobProgress, Period, SyncConfig, SyncReport, Timeframe};
use crate::services::calendar::Calendar;
use crate::services::data_sync::{SyncOrchestrator, CANCELLED_MESSAGE};
use crate::services::provider::BarProvider;
use crate::services::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type RunningJobs = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Caller-facing entry point: incremental syncs, background bulk downloads,
/// progress polling and cancellation.
#[derive(Clone)]
pub struct SyncEngine {
    orchestrator: Arc<SyncOrchestrator>,
    running: RunningJobs,
}

impl SyncEngine {
    /// Engine using the exchange timezone named in `config`
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn BarProvider>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let calendar = Calendar::new(&config.exchange_timezone)?;
        Ok(Self::with_calendar(store, provider, calendar, config))
    }

    pub fn with_calendar(
        store: Arc<dyn Store>,
        provider: Arc<dyn BarProvider>,
        calendar: Calendar,
        config: SyncConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(SyncOrchestrator::new(store, provider, calendar, config)),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Bring `(symbol, timeframe)` up to the most recent session close
    pub async fn sync_if_stale(&self, symbol: &str, timeframe: Timeframe) -> Result<SyncReport> {
        self.sync_if_stale_at(symbol, timeframe, Utc::now()).await
    }

    pub async fn sync_if_stale_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        self.orchestrator.sync_incremental(symbol, timeframe, now).await
    }

    /// Start a background download of `period`, or attach to the one already
    /// running for the same key.
    pub async fn start_bulk_download(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
    ) -> Result<JobHandle> {
        self.start_bulk_download_with_progress(symbol, timeframe, period, Utc::now(), |_, _| {})
            .await
    }

    /// Like [`start_bulk_download`](Self::start_bulk_download) with an explicit
    /// clock and a callback receiving `(percent, chunk label)` after each chunk.
    /// The callback only fires for a newly created job.
    pub async fn start_bulk_download_with_progress<F>(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
        now: DateTime<Utc>,
        mut on_progress: F,
    ) -> Result<JobHandle>
    where
        F: FnMut(f64, &str) + Send + 'static,
    {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AppError::InvalidInput("symbol must not be empty".to_string()));
        }

        let end = self.orchestrator.staleness().calendar().most_recent_session_close(now);
        let range = period.range_ending_at(end, self.orchestrator.config().history_start);

        let handle = self
            .orchestrator
            .tracker()
            .create_or_attach(&symbol, timeframe, period, range)
            .await?;
        if handle.attached {
            return Ok(handle);
        }

        let job_id = handle.job_id;
        let cancel = CancellationToken::new();
        self.running.lock().await.insert(job_id, cancel.clone());

        let orchestrator = self.orchestrator.clone();
        let download = tokio::spawn(async move {
            orchestrator
                .run_bulk(job_id, &cancel, |percent, label| {
                    debug!(job_id = %job_id, percent, label, "Chunk completed");
                    on_progress(percent, label);
                })
                .await
        });

        // Supervisor: settles the job and frees the registry slot even if the download panics
        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let failure = match download.await {
                Ok(Ok(report)) => {
                    info!(
                        job_id = %job_id,
                        chunks = report.chunks_total,
                        failed = report.chunks_failed,
                        written = report.records_written,
                        cancelled = report.cancelled,
                        "Background download finished"
                    );
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_error) => Some(format!("download task aborted: {}", join_error)),
            };

            if let Some(message) = failure {
                error!(job_id = %job_id, error = %message, "Background download aborted");
                if let Err(fail_err) = orchestrator.tracker().fail(job_id, &message).await {
                    warn!(job_id = %job_id, error = %fail_err, "Could not mark job failed");
                }
            }

            running.lock().await.remove(&job_id);
        });

        info!(job_id = %job_id, symbol = %symbol, timeframe = %timeframe, period = %period, "Bulk download started");
        Ok(handle)
    }

    pub async fn get_job_progress(&self, job_id: JobId) -> Result<JobProgress> {
        self.orchestrator.tracker().progress(job_id).await
    }

    /// Stop a running download after its current request. Bars already
    /// written stay. Cancelling a finished job returns its final state.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<JobProgress> {
        if let Some(token) = self.running.lock().await.get(&job_id) {
            token.cancel();
        }
        self.orchestrator.tracker().fail(job_id, CANCELLED_MESSAGE).await
    }

    /// Jobs with a live background task in this process
    pub async fn running_jobs(&self) -> Vec<JobId> {
        self.running.lock().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, DateRange, JobStatus};
    use crate::services::memory_store::MemoryStore;
    use crate::services::store::BarStore;
    use crate::services::test_support::{synthetic_bars, FnProvider};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn engine(store: Arc<MemoryStore>, provider: Arc<FnProvider>) -> SyncEngine {
        SyncEngine::new(store, provider, SyncConfig::default()).unwrap()
    }

    async fn wait_terminal(engine: &SyncEngine, job_id: JobId) -> JobProgress {
        loop {
            let progress = engine.get_job_progress(job_id).await.unwrap();
            if progress.status.is_terminal() && engine.running_jobs().await.is_empty() {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_share_one_job() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::synthetic());
        let engine = engine(store.clone(), provider.clone());

        let (a, b) = tokio::join!(
            engine.start_bulk_download("AAPL", Timeframe::Day1, Period::Year5),
            engine.start_bulk_download("AAPL", Timeframe::Day1, Period::Year5),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.job_id, b.job_id);
        assert!(a.attached != b.attached);

        let done = wait_terminal(&engine, a.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.percentage, 100.0);
        assert!(store.count("AAPL", Timeframe::Day1).await.unwrap() > 1000);

        // Every year was fetched exactly once
        assert_eq!(provider.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_job_marks_failed_and_stops_requests() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::synthetic());
        let engine = engine(store.clone(), provider.clone());

        let handle = engine
            .start_bulk_download("MSFT", Timeframe::Day1, Period::Year10)
            .await
            .unwrap();
        let cancelled = engine.cancel_job(handle.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_MESSAGE));

        let done = wait_terminal(&engine, handle.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(provider.call_count() <= 1);

        // The key is free again
        let next = engine
            .start_bulk_download("MSFT", Timeframe::Day1, Period::Year10)
            .await
            .unwrap();
        assert!(!next.attached);
        engine.cancel_job(next.job_id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_callback_reports_chunk_labels() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(FnProvider::synthetic()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();

        let handle = engine
            .start_bulk_download_with_progress("SPY", Timeframe::Minute1, Period::Month6, now, move |pct, label| {
                let _ = tx.send((pct, label.to_string()));
            })
            .await
            .unwrap();

        wait_terminal(&engine, handle.job_id).await;

        let mut labels = Vec::new();
        while let Ok((pct, label)) = rx.try_recv() {
            assert!((0.0..=100.0).contains(&pct));
            labels.push(label);
        }
        // 2023-12-28 .. 2024-06-28 in month chunks
        assert_eq!(labels.first().map(String::as_str), Some("2023-12"));
        assert_eq!(labels.last().map(String::as_str), Some("2024-06"));
        assert_eq!(labels.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_attaches_while_download_still_running() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::synthetic());
        let engine = engine(store.clone(), provider.clone());
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();

        // Everything already stored, so the first chunk reaches the estimate
        let history = DateRange::new(Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(), now);
        let bars: Vec<Bar> = synthetic_bars(Timeframe::Day1, history)
            .into_iter()
            .map(|raw| raw.into_bar("AAPL", Timeframe::Day1).unwrap())
            .collect();
        store.insert_ignore(&bars).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let first = engine
            .start_bulk_download_with_progress("AAPL", Timeframe::Day1, Period::Year5, now, move |_, label| {
                let _ = tx.send(label.to_string());
            })
            .await
            .unwrap();
        rx.recv().await.unwrap();

        let progress = engine.get_job_progress(first.job_id).await.unwrap();
        assert_eq!(progress.status, JobStatus::InProgress);
        assert_eq!(progress.percentage, 100.0);
        assert_eq!(provider.call_count(), 1);

        let second = engine
            .start_bulk_download_with_progress("AAPL", Timeframe::Day1, Period::Year5, now, |_, _| {})
            .await
            .unwrap();
        assert!(second.attached);
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(engine.running_jobs().await.len(), 1);

        let done = wait_terminal(&engine, first.job_id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(provider.call_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_download_releases_job() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::new(|_, _| panic!("provider blew up")));
        let engine = engine(store, provider);

        let handle = engine
            .start_bulk_download("AAPL", Timeframe::Day1, Period::Year1)
            .await
            .unwrap();

        let done = wait_terminal(&engine, handle.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.unwrap().contains("download task aborted"));
        assert!(engine.running_jobs().await.is_empty());

        let next = engine
            .start_bulk_download("AAPL", Timeframe::Day1, Period::Year1)
            .await
            .unwrap();
        assert!(!next.attached);
        engine.cancel_job(next.job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_if_stale_noop_when_fresh() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FnProvider::synthetic());
        let engine = engine(store.clone(), provider.clone());

        let friday = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        let bar = Bar::new("AAPL", Timeframe::Day1, friday, dec!(1), dec!(1), dec!(1), dec!(1), 1);
        store.insert_ignore(&[bar]).await.unwrap();

        let saturday = Utc.with_ymd_and_hms(2024, 3, 9, 15, 0, 0).unwrap();
        let report = engine.sync_if_stale_at("AAPL", Timeframe::Day1, saturday).await.unwrap();
        assert_eq!(report.range, None);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(store.count("AAPL", Timeframe::Day1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_progress() {
        let engine = engine(Arc::new(MemoryStore::new()), Arc::new(FnProvider::synthetic()));
        assert!(matches!(
            engine.get_job_progress(JobId::new()).await,
            Err(AppError::JobNotFound(_))
        ));
        assert!(matches!(engine.cancel_job(JobId::new()).await, Err(AppError::JobNotFound(_))));
    }
}
