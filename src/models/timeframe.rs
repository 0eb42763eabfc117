use crate::constants::SESSION_MINUTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1-minute bars
    Minute1,
    /// 5-minute bars
    Minute5,
    /// 15-minute bars
    Minute15,
    /// 30-minute bars
    Minute30,
    /// 1-hour bars
    Hour1,
    /// Daily bars
    Day1,
}

impl Timeframe {
    /// Storage and display representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
        }
    }

    /// Bar length in minutes (a trading day counts as one full day)
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Minute15 => 15,
            Timeframe::Minute30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Day1 => 24 * 60,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes() as i64)
    }

    /// Number of bars one regular session produces.
    ///
    /// Partial trailing bars count as a full bar, so 1h gives 7 (09:30 .. 15:30).
    pub fn bars_per_session(&self) -> u32 {
        match self {
            Timeframe::Day1 => 1,
            other => SESSION_MINUTES.div_ceil(other.minutes()),
        }
    }

    /// Minute-resolution timeframes get month-sized chunks on long downloads
    pub fn is_minute(&self) -> bool {
        matches!(
            self,
            Timeframe::Minute1 | Timeframe::Minute5 | Timeframe::Minute15 | Timeframe::Minute30
        )
    }

    /// Provider aggregate `(multiplier, timespan)` pair
    pub fn provider_range(&self) -> (u32, &'static str) {
        match self {
            Timeframe::Minute1 => (1, "minute"),
            Timeframe::Minute5 => (5, "minute"),
            Timeframe::Minute15 => (15, "minute"),
            Timeframe::Minute30 => (30, "minute"),
            Timeframe::Hour1 => (1, "hour"),
            Timeframe::Day1 => (1, "day"),
        }
    }

    /// Get all available timeframes
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Minute30,
            Timeframe::Hour1,
            Timeframe::Day1,
        ]
    }

    /// Parse a comma-separated list or "all"
    pub fn parse_list(s: &str) -> Result<Vec<Self>, String> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        s.split(',').map(|part| part.trim().parse()).collect()
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "1min" | "minute" => Ok(Timeframe::Minute1),
            "5m" | "5min" => Ok(Timeframe::Minute5),
            "15m" | "15min" => Ok(Timeframe::Minute15),
            "30m" | "30min" => Ok(Timeframe::Minute30),
            "1h" | "hour" | "hourly" => Ok(Timeframe::Hour1),
            "1d" | "day" | "daily" => Ok(Timeframe::Day1),
            _ => Err(format!(
                "Invalid timeframe: {}. Valid options: 1m, 5m, 15m, 30m, 1h, 1d",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Day1
    }
}
