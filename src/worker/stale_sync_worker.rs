use crate::error::AppError;
use crate::models::{Period, Timeframe};
use crate::services::SyncEngine;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

// Session open: 60 seconds, closed: 15 minutes
const OPEN_INTERVAL_SECS: u64 = 60;
const CLOSED_INTERVAL_SECS: u64 = 900;

/// What the background worker keeps fresh
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    /// Start a bulk download of this period for keys with no stored bars
    pub onboard_period: Option<Period>,
    pub open_interval: Duration,
    pub closed_interval: Duration,
}

impl WorkerSettings {
    pub fn new(symbols: Vec<String>, timeframes: Vec<Timeframe>) -> Self {
        Self {
            symbols,
            timeframes,
            onboard_period: None,
            open_interval: Duration::from_secs(OPEN_INTERVAL_SECS),
            closed_interval: Duration::from_secs(CLOSED_INTERVAL_SECS),
        }
    }
}

/// Outcome counts of one pass over all keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationStats {
    pub synced: usize,
    pub up_to_date: usize,
    pub onboarding: usize,
    pub failed: usize,
    pub bars_written: usize,
}

/// Run `sync_if_stale` for every configured key once
pub async fn run_iteration(engine: &SyncEngine, settings: &WorkerSettings, now: DateTime<Utc>) -> IterationStats {
    let mut stats = IterationStats::default();

    for symbol in &settings.symbols {
        for &timeframe in &settings.timeframes {
            match engine.sync_if_stale_at(symbol, timeframe, now).await {
                Ok(report) if report.range.is_none() => stats.up_to_date += 1,
                Ok(report) => {
                    stats.synced += 1;
                    stats.bars_written += report.written;
                }
                Err(AppError::NotOnboarded(key)) => match settings.onboard_period {
                    Some(period) => match engine
                        .start_bulk_download_with_progress(symbol, timeframe, period, now, |_, _| {})
                        .await
                    {
                        Ok(handle) => {
                            stats.onboarding += 1;
                            info!(job_id = %handle.job_id, attached = handle.attached, "Onboarding {}", key);
                        }
                        Err(e) => {
                            stats.failed += 1;
                            error!(symbol = %symbol, timeframe = %timeframe, error = %e, "Failed to start onboarding");
                        }
                    },
                    None => {
                        stats.failed += 1;
                        warn!("{} has no stored bars, run a bulk download first", key);
                    }
                },
                Err(e) => {
                    stats.failed += 1;
                    error!(symbol = %symbol, timeframe = %timeframe, error = %e, "Sync failed");
                }
            }
        }
    }

    stats
}

/// Keep every configured key fresh until `shutdown` fires
#[instrument(skip_all)]
pub async fn run(engine: SyncEngine, settings: WorkerSettings, shutdown: CancellationToken) {
    info!(
        symbols = settings.symbols.len(),
        timeframes = settings.timeframes.len(),
        "Starting stale sync worker - Session open: {}s, Session closed: {}s",
        settings.open_interval.as_secs(),
        settings.closed_interval.as_secs()
    );

    let mut iteration_count = 0u64;

    loop {
        iteration_count += 1;
        let loop_start = std::time::Instant::now();
        let now = Utc::now();
        let calendar = engine.orchestrator().staleness().calendar();
        let is_open = calendar.is_session_open(now);

        info!(iteration = iteration_count, session_open = is_open, "Stale sync worker: Starting sync");

        let stats = run_iteration(&engine, &settings, now).await;

        let sync_interval = calendar.sync_interval(Utc::now(), settings.open_interval, settings.closed_interval);

        info!(
            iteration = iteration_count,
            synced = stats.synced,
            up_to_date = stats.up_to_date,
            onboarding = stats.onboarding,
            failed = stats.failed,
            bars_written = stats.bars_written,
            loop_duration_secs = loop_start.elapsed().as_secs_f64(),
            next_sync_secs = sync_interval.as_secs(),
            "Stale sync worker: Iteration completed"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(iteration = iteration_count, "Stale sync worker: Shutting down");
                return;
            }
            _ = sleep(sync_interval) => {}
        }
    }
}
