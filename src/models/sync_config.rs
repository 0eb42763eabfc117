use crate::constants::*;
use crate::error::{AppError, Result};
use crate::models::{DateRange, JobId, Timeframe};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Safety cap on paginated requests per chunk
    pub max_page_requests: usize,

    /// Delay between paginated requests
    pub page_delay: Duration,

    /// Delay between chunk iterations of a bulk download
    pub chunk_delay: Duration,

    /// Rows per insert transaction
    pub write_batch_size: usize,

    /// Minute downloads longer than this are partitioned by month
    pub minute_chunk_threshold_days: i64,

    /// Start of history for `Period::Max`
    pub history_start: NaiveDate,

    /// IANA name of the exchange timezone
    pub exchange_timezone: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("market_data/bars.db"),
            max_page_requests: DEFAULT_MAX_PAGE_REQUESTS,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            chunk_delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            minute_chunk_threshold_days: MINUTE_CHUNK_THRESHOLD_DAYS,
            history_start: NaiveDate::from_ymd_opt(2004, 1, 2).unwrap_or(NaiveDate::MIN),
            exchange_timezone: DEFAULT_EXCHANGE_TZ.to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `BARSYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let history_start = match std::env::var("BARSYNC_HISTORY_START") {
            Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
                AppError::Config(format!("BARSYNC_HISTORY_START '{}': {}", raw, e))
            })?,
            Err(_) => NaiveDate::parse_from_str(DEFAULT_HISTORY_START, "%Y-%m-%d")
                .unwrap_or(defaults.history_start),
        };

        let config = Self {
            database_path: std::env::var("BARSYNC_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            max_page_requests: env_or("BARSYNC_MAX_PAGE_REQUESTS", defaults.max_page_requests)?,
            page_delay: Duration::from_millis(env_or(
                "BARSYNC_PAGE_DELAY_MS",
                DEFAULT_PAGE_DELAY_MS,
            )?),
            chunk_delay: Duration::from_millis(env_or(
                "BARSYNC_CHUNK_DELAY_MS",
                DEFAULT_CHUNK_DELAY_MS,
            )?),
            write_batch_size: env_or("BARSYNC_WRITE_BATCH_SIZE", defaults.write_batch_size)?,
            minute_chunk_threshold_days: env_or(
                "BARSYNC_MINUTE_CHUNK_THRESHOLD_DAYS",
                defaults.minute_chunk_threshold_days,
            )?,
            history_start,
            exchange_timezone: std::env::var("BARSYNC_EXCHANGE_TZ")
                .unwrap_or(defaults.exchange_timezone),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_page_requests == 0 {
            return Err(AppError::Config("max_page_requests must be at least 1".to_string()));
        }
        if self.write_batch_size == 0 {
            return Err(AppError::Config("write_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Upstream provider credentials and endpoint, injected into the client
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

// Hand-written so the key never reaches logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            max_retries: DEFAULT_PROVIDER_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }

    /// Reads `MARKET_DATA_*` variables; the API key is required
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MARKET_DATA_API_KEY")
            .map_err(|_| AppError::Config("MARKET_DATA_API_KEY is not set".to_string()))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("MARKET_DATA_BASE_URL") {
            config.base_url = base_url;
        }
        config.max_retries = env_or("MARKET_DATA_MAX_RETRIES", config.max_retries)?;
        config.timeout = Duration::from_secs(env_or(
            "MARKET_DATA_TIMEOUT_SECS",
            DEFAULT_PROVIDER_TIMEOUT_SECS,
        )?);
        Ok(config)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{} '{}': {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

/// Outcome of one incremental sync
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Range that was fetched, `None` when nothing was missing
    pub range: Option<DateRange>,
    pub fetched: usize,
    pub written: usize,
}

impl SyncReport {
    pub fn up_to_date(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            range: None,
            fetched: 0,
            written: 0,
        }
    }
}

/// Outcome of one bulk download run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkDownloadReport {
    pub job_id: Option<JobId>,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub records_written: usize,
    pub cancelled: bool,
}

impl BulkDownloadReport {
    pub fn chunks_succeeded(&self) -> usize {
        self.chunks_total - self.chunks_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.max_page_requests, 50);
        assert_eq!(config.page_delay, Duration::from_millis(100));
        assert_eq!(config.write_batch_size, 1000);
        assert_eq!(config.minute_chunk_threshold_days, 90);
        assert_eq!(config.history_start, NaiveDate::from_ymd_opt(2004, 1, 2).unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let config = SyncConfig {
            max_page_requests: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_provider_config_debug_masks_key() {
        let config = ProviderConfig::new("secret-key");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret-key"));
        assert!(printed.contains("***"));
    }
}
