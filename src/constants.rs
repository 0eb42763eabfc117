//! Engine Constants
//!
//! Defaults for pagination, batching and job estimation. Every tunable here
//! has a matching field on [`crate::models::SyncConfig`] that can override it
//! from the environment.

/// Approximate number of trading sessions in a year, used to estimate
/// `expected_records` for a bulk download.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Length of the regular session in minutes (09:30 - 16:00).
pub const SESSION_MINUTES: u32 = 390;

/// Safety cap on provider requests issued for one chunk.
pub const DEFAULT_MAX_PAGE_REQUESTS: usize = 50;

/// Delay between successive paginated requests.
pub const DEFAULT_PAGE_DELAY_MS: u64 = 100;

/// Delay between chunk iterations of a bulk download.
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 250;

/// Rows per insert transaction.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 1000;

/// Minute-resolution downloads spanning more than this many days are
/// partitioned by month instead of by year.
pub const MINUTE_CHUNK_THRESHOLD_DAYS: i64 = 90;

/// Start of history for `Period::Max`.
pub const DEFAULT_HISTORY_START: &str = "2004-01-02";

/// Exchange timezone and regular session window.
pub const DEFAULT_EXCHANGE_TZ: &str = "America/New_York";
pub const SESSION_OPEN: (u32, u32) = (9, 30);
pub const SESSION_CLOSE: (u32, u32) = (16, 0);

/// Upstream provider defaults
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.polygon.io";
pub const DEFAULT_PROVIDER_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
/// Page size requested from the aggregates endpoint.
pub const PROVIDER_PAGE_LIMIT: u32 = 50_000;
