use crate::error::{AppError, Result};
use crate::models::{DateRange, Timeframe};
use crate::services::calendar::Calendar;
use crate::services::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Compares stored data against the trading calendar
pub struct StalenessDetector {
    store: Arc<dyn Store>,
    calendar: Calendar,
}

impl StalenessDetector {
    pub fn new(store: Arc<dyn Store>, calendar: Calendar) -> Self {
        Self { store, calendar }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// True when the newest stored bar is older than the most recent session
    /// close. A key with no stored bars always needs a sync.
    pub async fn needs_sync(&self, symbol: &str, timeframe: Timeframe, now: DateTime<Utc>) -> Result<bool> {
        let latest = self.store.latest_timestamp(symbol, timeframe).await?;
        let close = self.calendar.most_recent_session_close(now);

        let stale = match latest {
            None => true,
            // A bar is stale only if the next one would open before the close
            Some(ts) => ts + timeframe.duration() < close,
        };

        debug!(symbol, timeframe = %timeframe, ?latest, %close, stale, "Staleness check");
        Ok(stale)
    }

    /// Range between the newest stored bar and the most recent close.
    ///
    /// Fails with [`AppError::NotOnboarded`] when nothing is stored and with
    /// [`AppError::RangeEmpty`] when nothing is missing.
    pub async fn missing_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<DateRange> {
        let latest = self
            .store
            .latest_timestamp(symbol, timeframe)
            .await?
            .ok_or_else(|| AppError::NotOnboarded(format!("{} {}", symbol, timeframe)))?;

        let range = DateRange::new(
            latest + timeframe.duration(),
            self.calendar.most_recent_session_close(now),
        );

        if range.is_empty() {
            return Err(AppError::RangeEmpty);
        }
        Ok(range)
    }
}
