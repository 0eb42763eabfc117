use crate::error::{AppError, Result};
use crate::models::{Bar, DateRange, JobId, Period, SyncJob, Timeframe};
use crate::services::store::{BarStore, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite store for bars and sync jobs
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    database_path: PathBuf,
}

/// Database schema version for migrations
const DB_SCHEMA_VERSION: &str = "1";

const JOB_COLUMNS: &str = "id, symbol, timeframe, period, status, start_ms, end_ms, \
     expected_records, current_records, progress_percentage, current_label, error_message, \
     created_at_ms, updated_at_ms";

impl SqliteStore {
    /// Open (or create) the database file and apply the schema
    pub async fn new(database_path: impl AsRef<Path>) -> Result<Self> {
        let database_path = database_path.as_ref().to_path_buf();
        info!("Initializing SQLite database at: {:?}", database_path);

        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to create {:?}: {}", parent, e)))?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal) // Enable concurrent reads/writes
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30)); // Wait 30s for locked DB

        let pool = SqlitePool::connect_with(connect_options).await?;

        let store = Self { pool, database_path };
        store.initialize_database().await?;

        info!("SQLite database initialized successfully");
        Ok(store)
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;

        let store = Self {
            pool,
            database_path: PathBuf::from(":memory:"),
        };
        store.initialize_database().await?;
        Ok(store)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    async fn initialize_database(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                period TEXT NOT NULL,
                status TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                expected_records INTEGER NOT NULL,
                current_records INTEGER NOT NULL DEFAULT 0,
                progress_percentage REAL NOT NULL DEFAULT 0,
                current_label TEXT,
                error_message TEXT,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            // Dedup key
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_bars_key ON bars(symbol, timeframe, ts_ms)",
            // Single-flight guard: at most one running job per key
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_running ON sync_jobs(symbol, timeframe, period) WHERE status = 'in_progress'",
            "CREATE INDEX IF NOT EXISTS idx_sync_jobs_key ON sync_jobs(symbol, timeframe, period, created_at_ms DESC)",
        ];

        for index in indexes {
            sqlx::query(index).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)")
            .bind(DB_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Stored bars for the key inside `range`, oldest first
    pub async fn load_bars(&self, symbol: &str, timeframe: Timeframe, range: DateRange) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            r#"
            SELECT ts_ms, open, high, low, close, volume
            FROM bars
            WHERE symbol = ?1 AND timeframe = ?2 AND ts_ms BETWEEN ?3 AND ?4
            ORDER BY ts_ms ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(range.from.timestamp_millis())
        .bind(range.to.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Bar> {
                Ok(Bar::new(
                    symbol,
                    timeframe,
                    ms_to_datetime(row.try_get("ts_ms")?)?,
                    decimal_column(row, "open")?,
                    decimal_column(row, "high")?,
                    decimal_column(row, "low")?,
                    decimal_column(row, "close")?,
                    row.try_get::<i64, _>("volume")?.max(0) as u64,
                ))
            })
            .collect()
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQLite database connection pool closed");
    }
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AppError::Parse(format!("Invalid timestamp {}", ms)))
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| AppError::Parse(format!("Invalid {} '{}': {}", column, raw, e)))
}

fn row_to_job(row: &SqliteRow) -> Result<SyncJob> {
    let id: String = row.try_get("id")?;
    let timeframe: String = row.try_get("timeframe")?;
    let period: String = row.try_get("period")?;
    let status: String = row.try_get("status")?;

    Ok(SyncJob {
        id: id.parse().map_err(AppError::Parse)?,
        symbol: row.try_get("symbol")?,
        timeframe: timeframe.parse().map_err(AppError::Parse)?,
        period: period.parse().map_err(AppError::Parse)?,
        status: status.parse().map_err(AppError::Parse)?,
        start_date: ms_to_datetime(row.try_get("start_ms")?)?,
        end_date: ms_to_datetime(row.try_get("end_ms")?)?,
        expected_records: row.try_get::<i64, _>("expected_records")?.max(0) as u64,
        current_records: row.try_get::<i64, _>("current_records")?.max(0) as u64,
        progress_percentage: row.try_get("progress_percentage")?,
        current_label: row.try_get("current_label")?,
        error_message: row.try_get("error_message")?,
        created_at: ms_to_datetime(row.try_get("created_at_ms")?)?,
        updated_at: ms_to_datetime(row.try_get("updated_at_ms")?)?,
    })
}

#[async_trait]
impl BarStore for SqliteStore {
    async fn latest_timestamp(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(ts_ms) FROM bars WHERE symbol = ?1 AND timeframe = ?2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await?;

        latest.map(ms_to_datetime).transpose()
    }

    async fn existing_timestamps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<HashSet<i64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT ts_ms FROM bars WHERE symbol = ?1 AND timeframe = ?2 AND ts_ms BETWEEN ?3 AND ?4",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(range.from.timestamp_millis())
        .bind(range.to.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn insert_ignore(&self, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.pool.begin().await?;
        let mut affected_rows = 0;

        for bar in bars {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO bars
                (symbol, timeframe, ts_ms, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.timeframe.as_str())
            .bind(bar.timestamp_ms())
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(i64::try_from(bar.volume).unwrap_or(i64::MAX))
            .execute(&mut *transaction)
            .await?;

            affected_rows += result.rows_affected() as usize;
        }

        transaction.commit().await?;
        Ok(affected_rows)
    }

    async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND timeframe = ?2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND timeframe = ?2 AND ts_ms BETWEEN ?3 AND ?4",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(range.from.timestamp_millis())
        .bind(range.to.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_or_get_running(&self, job: SyncJob) -> Result<(SyncJob, bool)> {
        // The partial unique index turns a second running job for the key into a no-op insert
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_jobs
            (id, symbol, timeframe, period, status, start_ms, end_ms,
             expected_records, current_records, progress_percentage, current_label, error_message,
             created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.symbol)
        .bind(job.timeframe.as_str())
        .bind(job.period.as_str())
        .bind(job.status.as_str())
        .bind(job.start_date.timestamp_millis())
        .bind(job.end_date.timestamp_millis())
        .bind(job.expected_records as i64)
        .bind(job.current_records as i64)
        .bind(job.progress_percentage)
        .bind(&job.current_label)
        .bind(&job.error_message)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok((job, false));
        }

        match self.find_running(&job.symbol, job.timeframe, job.period).await? {
            Some(existing) => Ok((existing, true)),
            // The running job finished between the insert and the lookup
            None => Err(AppError::StoreConflict(format!(
                "running job for {} {} {} changed state concurrently",
                job.symbol, job.timeframe, job.period
            ))),
        }
    }

    async fn get_job(&self, id: JobId) -> Result<Option<SyncJob>> {
        let row = sqlx::query(&format!("SELECT {} FROM sync_jobs WHERE id = ?1", JOB_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn find_running(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: Period,
    ) -> Result<Option<SyncJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sync_jobs \
             WHERE symbol = ?1 AND timeframe = ?2 AND period = ?3 AND status = 'in_progress'",
            JOB_COLUMNS
        ))
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn update_running(&self, job: &SyncJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = ?2, expected_records = ?3, current_records = ?4,
                progress_percentage = ?5, current_label = ?6, error_message = ?7,
                updated_at_ms = ?8
            WHERE id = ?1 AND status = 'in_progress'
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.expected_records as i64)
        .bind(job.current_records as i64)
        .bind(job.progress_percentage)
        .bind(&job.current_label)
        .bind(&job.error_message)
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn bar(symbol: &str, minute: i64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 3, 14, 14, 30, 0).unwrap() + chrono::Duration::minutes(minute);
        Bar::new(symbol, Timeframe::Minute1, ts, dec!(100.5), dec!(101), dec!(99.75), dec!(100.25), 1200)
    }

    fn range() -> DateRange {
        DateRange::new(
            Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("bars.db");

        let store = SqliteStore::new(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert_eq!(store.database_path(), db_path.as_path());
        store.close().await;
    }

    #[tokio::test]
    async fn test_insert_ignore_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("bars.db")).await.unwrap();

        let bars = vec![bar("AAPL", 0), bar("AAPL", 1), bar("AAPL", 2)];
        assert_eq!(store.insert_ignore(&bars).await.unwrap(), 3);
        assert_eq!(store.insert_ignore(&bars).await.unwrap(), 0);
        assert_eq!(store.count("AAPL", Timeframe::Minute1).await.unwrap(), 3);
        assert_eq!(store.count("AAPL", Timeframe::Day1).await.unwrap(), 0);

        store.close().await;
    }

    #[tokio::test]
    async fn test_latest_and_existing_timestamps() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.latest_timestamp("MSFT", Timeframe::Minute1).await.unwrap(), None);

        let bars = vec![bar("MSFT", 5), bar("MSFT", 1), bar("MSFT", 3)];
        store.insert_ignore(&bars).await.unwrap();

        let latest = store.latest_timestamp("MSFT", Timeframe::Minute1).await.unwrap();
        assert_eq!(latest, Some(bars[0].timestamp));

        let existing = store
            .existing_timestamps("MSFT", Timeframe::Minute1, range())
            .await
            .unwrap();
        assert_eq!(existing.len(), 3);
        assert!(existing.contains(&bars[1].timestamp_ms()));
        assert_eq!(store.count_in_range("MSFT", Timeframe::Minute1, range()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_decimal_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_ignore(&[bar("IBM", 0)]).await.unwrap();

        let bars = store.load_bars("IBM", Timeframe::Minute1, range()).await.unwrap();
        assert_eq!(bars, vec![bar("IBM", 0)]);
        assert_eq!(bars[0].open, dec!(100.5));
        assert_eq!(bars[0].low, dec!(99.75));
    }

    #[tokio::test]
    async fn test_single_running_job_per_key() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = SyncJob::new("AAPL", Timeframe::Day1, Period::Year5, range(), 1260);
        let (stored, existed) = store.insert_or_get_running(first.clone()).await.unwrap();
        assert!(!existed);
        assert_eq!(stored.id, first.id);

        let second = SyncJob::new("AAPL", Timeframe::Day1, Period::Year5, range(), 1260);
        let (stored, existed) = store.insert_or_get_running(second).await.unwrap();
        assert!(existed);
        assert_eq!(stored.id, first.id);

        // A different period is a different key
        let other = SyncJob::new("AAPL", Timeframe::Day1, Period::Year1, range(), 252);
        let (_, existed) = store.insert_or_get_running(other).await.unwrap();
        assert!(!existed);
    }

    #[tokio::test]
    async fn test_terminal_job_is_never_reopened() {
        let store = SqliteStore::in_memory().await.unwrap();
        let job = SyncJob::new("AAPL", Timeframe::Day1, Period::Year1, range(), 252);
        store.insert_or_get_running(job.clone()).await.unwrap();

        let mut completed = job.clone();
        completed.status = JobStatus::Completed;
        completed.progress_percentage = 100.0;
        assert!(store.update_running(&completed).await.unwrap());

        let mut reopened = completed.clone();
        reopened.status = JobStatus::InProgress;
        assert!(!store.update_running(&reopened).await.unwrap());

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress_percentage, 100.0);

        // With the old job terminal a new one may start for the same key
        let next = SyncJob::new("AAPL", Timeframe::Day1, Period::Year1, range(), 252);
        let (_, existed) = store.insert_or_get_running(next).await.unwrap();
        assert!(!existed);
    }
}
