use crate::constants::{DEFAULT_EXCHANGE_TZ, SESSION_CLOSE, SESSION_OPEN};
use crate::error::{AppError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration as StdDuration;

/// Exchange session calendar.
///
/// Weekdays only with a fixed session window in the exchange's local time.
/// Exchange holidays are not modelled: a holiday looks like a normal session
/// whose bars simply never arrive.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl Default for Calendar {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open: session_time(SESSION_OPEN),
            close: session_time(SESSION_CLOSE),
        }
    }
}

fn session_time((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

impl Calendar {
    /// Calendar for an IANA timezone name with the default session window
    pub fn new(timezone: &str) -> Result<Self> {
        Self::with_session(timezone, SESSION_OPEN, SESSION_CLOSE)
    }

    pub fn with_session(timezone: &str, open: (u32, u32), close: (u32, u32)) -> Result<Self> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| AppError::Config(format!("Failed to parse timezone '{}': {}", timezone, e)))?;

        let open = NaiveTime::from_hms_opt(open.0, open.1, 0)
            .ok_or_else(|| AppError::Config(format!("Invalid session open {:?}", open)))?;
        let close = NaiveTime::from_hms_opt(close.0, close.1, 0)
            .ok_or_else(|| AppError::Config(format!("Invalid session close {:?}", close)))?;
        if open >= close {
            return Err(AppError::Config("Session open must precede close".to_string()));
        }

        Ok(Self { timezone, open, close })
    }

    /// Default exchange calendar, falling back to New York when the name does not parse
    pub fn from_name_or_default(timezone: &str) -> Self {
        match Self::new(timezone) {
            Ok(calendar) => calendar,
            Err(e) => {
                tracing::warn!(error = %e, fallback = DEFAULT_EXCHANGE_TZ, "Using default exchange timezone");
                Self::default()
            }
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// True only Monday-Friday inside `[open, close)` local time
    pub fn is_session_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        if !is_weekday(local.date_naive()) {
            return false;
        }

        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Close of the latest session that has fully ended at `now`.
    ///
    /// Today's close once it has passed on a weekday, otherwise the close of
    /// the previous weekday. Weekends are always skipped.
    pub fn most_recent_session_close(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone);
        let mut date = local.date_naive();

        if !(is_weekday(date) && local.time() >= self.close) {
            date = previous_day(date);
            while !is_weekday(date) {
                date = previous_day(date);
            }
        }

        self.session_close_on(date)
    }

    /// Session close instant for a local calendar date
    pub fn session_close_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.close);
        match self.timezone.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            // A DST gap never covers the close; treat the wall time as UTC rather than fail
            None => Utc.from_utc_datetime(&naive),
        }
    }

    /// Pick the polling interval for background syncs based on whether the session is open
    pub fn sync_interval(
        &self,
        now: DateTime<Utc>,
        open_interval: StdDuration,
        closed_interval: StdDuration,
    ) -> StdDuration {
        if self.is_session_open(now) {
            open_interval
        } else {
            closed_interval
        }
    }
}

fn previous_day(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date - Duration::days(1))
}
