use crate::constants::TRADING_DAYS_PER_YEAR;
use crate::error::{AppError, Result};
use crate::models::{DateRange, JobHandle, JobId, JobProgress, JobStatus, Period, SyncJob, Timeframe};
use crate::services::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Attempts at resolving an insert race against a job that finished in between
const ATTACH_ATTEMPTS: usize = 3;

/// Durable job records for bulk downloads.
///
/// Lifecycle is `in_progress -> {completed, failed}`; every write goes through
/// [`JobStore::update_running`](crate::services::JobStore::update_running), so
/// a terminal job is never reopened.
pub struct JobTracker {
    store: Arc<dyn Store>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Estimated bar count for `range`: trading days in the span times bars per session
    pub fn expected_records(timeframe: Timeframe, range: DateRange) -> u64 {
        let trading_days = TRADING_DAYS_PER_YEAR * range.span_days() / 365.0;
        let expected = (trading_days * timeframe.bars_per_session() as f64).ceil();
        (expected as u64).max(1)
    }

    /// Start tracking a download, or attach to the running one for the same key
    pub async fn create_or_attach(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
        range: DateRange,
    ) -> Result<JobHandle> {
        let expected = Self::expected_records(timeframe, range);

        for _ in 0..ATTACH_ATTEMPTS {
            let job = SyncJob::new(symbol, timeframe, period, range, expected);
            match self.store.insert_or_get_running(job).await {
                Ok((job, attached)) => {
                    if attached {
                        info!(job_id = %job.id, symbol, timeframe = %timeframe, period = %period, "Attached to running job");
                    } else {
                        info!(job_id = %job.id, symbol, timeframe = %timeframe, period = %period, expected, "Created job");
                    }
                    return Ok(JobHandle {
                        job_id: job.id,
                        attached,
                    });
                }
                Err(AppError::StoreConflict(message)) => {
                    warn!(symbol, timeframe = %timeframe, "Job insert raced, retrying: {}", message);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::StoreConflict(format!(
            "could not create or attach job for {} {} {}",
            symbol, timeframe, period
        )))
    }

    pub async fn get(&self, job_id: JobId) -> Result<SyncJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
    }

    pub async fn progress(&self, job_id: JobId) -> Result<JobProgress> {
        Ok(JobProgress::from(&self.get(job_id).await?))
    }

    /// Recount stored bars in the job's range and update the percentage.
    ///
    /// The percentage never decreases and reaching the expected count
    /// completes the job. Terminal jobs are returned unchanged.
    pub async fn report_progress(&self, job_id: JobId, label: Option<&str>) -> Result<JobProgress> {
        self.refresh(job_id, label, true).await
    }

    /// Progress update for a job whose download is still running.
    ///
    /// Same bookkeeping as [`report_progress`](Self::report_progress) but the
    /// job stays `in_progress` at most 100% until [`complete`](Self::complete)
    /// or [`fail`](Self::fail), so it keeps holding its single-flight slot.
    pub async fn report_chunk_progress(&self, job_id: JobId, label: &str) -> Result<JobProgress> {
        self.refresh(job_id, Some(label), false).await
    }

    async fn refresh(&self, job_id: JobId, label: Option<&str>, complete_when_reached: bool) -> Result<JobProgress> {
        let mut job = self.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(JobProgress::from(&job));
        }

        let current = self
            .store
            .count_in_range(&job.symbol, job.timeframe, job.range())
            .await?;
        let percentage = (current as f64 / job.expected_records.max(1) as f64 * 100.0).min(100.0);

        job.current_records = current;
        job.progress_percentage = job.progress_percentage.max(percentage);
        if let Some(label) = label {
            job.current_label = Some(label.to_string());
        }
        let reached = current >= job.expected_records || job.progress_percentage >= 100.0;
        if reached && complete_when_reached {
            job.status = JobStatus::Completed;
            job.progress_percentage = 100.0;
        }
        job.updated_at = Utc::now();

        self.persist(job).await
    }

    /// Mark completed at 100%, recording the final bar count
    pub async fn complete(&self, job_id: JobId) -> Result<JobProgress> {
        let mut job = self.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(JobProgress::from(&job));
        }

        job.current_records = self
            .store
            .count_in_range(&job.symbol, job.timeframe, job.range())
            .await?;
        job.status = JobStatus::Completed;
        job.progress_percentage = 100.0;
        job.updated_at = Utc::now();

        if job.is_partial() {
            warn!(
                job_id = %job.id,
                current = job.current_records,
                expected = job.expected_records,
                "Job completed with partial data"
            );
        }
        self.persist(job).await
    }

    /// Mark failed. Bars already written stay in place.
    pub async fn fail(&self, job_id: JobId, message: &str) -> Result<JobProgress> {
        let mut job = self.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(JobProgress::from(&job));
        }

        job.current_records = self
            .store
            .count_in_range(&job.symbol, job.timeframe, job.range())
            .await?;
        job.status = JobStatus::Failed;
        job.error_message = Some(message.to_string());
        job.updated_at = Utc::now();

        warn!(job_id = %job.id, current = job.current_records, "Job failed: {}", message);
        self.persist(job).await
    }

    /// Write `job` if still running, otherwise return whatever is stored
    async fn persist(&self, job: SyncJob) -> Result<JobProgress> {
        if self.store.update_running(&job).await? {
            if job.status.is_terminal() {
                info!(job_id = %job.id, status = %job.status, records = job.current_records, "Job finished");
            }
            Ok(JobProgress::from(&job))
        } else {
            self.progress(job.id).await
        }
    }
}
