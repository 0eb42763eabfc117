use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Closed time range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One bounded sub-range of a larger download, fetched and written as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub range: DateRange,
    /// Human readable name, e.g. "2024-03" or "2024"
    pub label: String,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// `from >= to` means there is nothing to fetch
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Span length in whole days
    pub fn num_days(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    /// Span length in fractional days, used for record estimation
    pub fn span_days(&self) -> f64 {
        (self.to - self.from).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Partition into calendar-month chunks (UTC boundaries)
    pub fn split_by_month(&self) -> Vec<Chunk> {
        self.split_with(|d| {
            let (year, month) = if d.month() == 12 {
                (d.year() + 1, 1)
            } else {
                (d.year(), d.month() + 1)
            };
            (
                NaiveDate::from_ymd_opt(year, month, 1),
                format!("{}-{:02}", d.year(), d.month()),
            )
        })
    }

    /// Partition into calendar-year chunks (UTC boundaries)
    pub fn split_by_year(&self) -> Vec<Chunk> {
        self.split_with(|d| {
            (
                NaiveDate::from_ymd_opt(d.year() + 1, 1, 1),
                d.year().to_string(),
            )
        })
    }

    /// Walks from `from` to `to`; `next` maps the current chunk's start date to
    /// the first day of the following chunk plus the current chunk's label.
    fn split_with<F>(&self, next: F) -> Vec<Chunk>
    where
        F: Fn(NaiveDate) -> (Option<NaiveDate>, String),
    {
        let mut chunks = Vec::new();
        if self.is_empty() {
            return chunks;
        }

        let mut current = self.from;
        while current <= self.to {
            let (next_start, label) = next(current.date_naive());
            let next_start = match next_start.and_then(|d| d.and_hms_opt(0, 0, 0)) {
                Some(naive) => Utc.from_utc_datetime(&naive),
                None => break,
            };

            let end = (next_start - Duration::milliseconds(1)).min(self.to);
            chunks.push(Chunk {
                range: DateRange::new(current, end),
                label,
            });
            current = next_start;
        }

        chunks
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {}", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}
