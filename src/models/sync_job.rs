use crate::models::{DateRange, Timeframe};
use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a tracked download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| format!("Invalid job id '{}': {}", s, e))
    }
}

/// Job lifecycle: `InProgress -> {Completed, Failed}`. Terminal states never reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested download span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Month1,
    Month3,
    Month6,
    Year1,
    Year2,
    Year5,
    Year10,
    /// Everything since the configured history start
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Month1 => "1M",
            Period::Month3 => "3M",
            Period::Month6 => "6M",
            Period::Year1 => "1Y",
            Period::Year2 => "2Y",
            Period::Year5 => "5Y",
            Period::Year10 => "10Y",
            Period::Max => "max",
        }
    }

    fn months(&self) -> Option<u32> {
        match self {
            Period::Month1 => Some(1),
            Period::Month3 => Some(3),
            Period::Month6 => Some(6),
            Period::Year1 => Some(12),
            Period::Year2 => Some(24),
            Period::Year5 => Some(60),
            Period::Year10 => Some(120),
            Period::Max => None,
        }
    }

    /// Absolute range ending at `end`.
    ///
    /// The start is midnight UTC of the calendar date `months` before `end`,
    /// or `history_start` for [`Period::Max`].
    pub fn range_ending_at(&self, end: DateTime<Utc>, history_start: NaiveDate) -> DateRange {
        let start_date = match self.months() {
            Some(months) => end
                .date_naive()
                .checked_sub_months(Months::new(months))
                .unwrap_or(history_start),
            None => history_start,
        };

        let from = start_date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(end - Duration::days(365));

        DateRange::new(from, end)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(' ', "").as_str() {
            "1m" | "1month" => Ok(Period::Month1),
            "3m" | "3months" => Ok(Period::Month3),
            "6m" | "6months" => Ok(Period::Month6),
            "1y" | "1year" => Ok(Period::Year1),
            "2y" | "2years" => Ok(Period::Year2),
            "5y" | "5years" => Ok(Period::Year5),
            "10y" | "10years" => Ok(Period::Year10),
            "max" | "maxavailable" | "all" => Ok(Period::Max),
            _ => Err(format!(
                "Invalid period: {}. Valid options: 1M, 3M, 6M, 1Y, 2Y, 5Y, 10Y, max",
                s
            )),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one bulk download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub period: Period,
    pub status: JobStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub expected_records: u64,
    pub current_records: u64,
    pub progress_percentage: f64,
    /// Last chunk completed, e.g. "2023-07"
    pub current_label: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    /// New `in_progress` job for `range`
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        period: Period,
        range: DateRange,
        expected_records: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            symbol: symbol.into(),
            timeframe,
            period,
            status: JobStatus::InProgress,
            start_date: range.from,
            end_date: range.to,
            expected_records,
            current_records: 0,
            progress_percentage: 0.0,
            current_label: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// Completed with fewer bars than estimated. Callers must treat this as partial data.
    pub fn is_partial(&self) -> bool {
        self.status == JobStatus::Completed && self.current_records < self.expected_records
    }
}

/// Snapshot returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub percentage: f64,
    pub status: JobStatus,
    pub label: Option<String>,
    pub current_records: u64,
    pub expected_records: u64,
    pub error_message: Option<String>,
}

impl From<&SyncJob> for JobProgress {
    fn from(job: &SyncJob) -> Self {
        Self {
            job_id: job.id,
            percentage: job.progress_percentage,
            status: job.status,
            label: job.current_label.clone(),
            current_records: job.current_records,
            expected_records: job.expected_records,
            error_message: job.error_message.clone(),
        }
    }
}

/// Result of `create_or_attach`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: JobId,
    /// An equivalent job was already running and this call attached to it
    pub attached: bool,
}
