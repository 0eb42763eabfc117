//! Upstream provider seam and its wire types

use crate::error::{AppError, Result};
use crate::models::{Bar, DateRange, Timeframe};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// One page request. `cursor` is `None` for the first page of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub range: DateRange,
    pub cursor: Option<String>,
}

/// Status flag the provider attaches to every page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Ok,
    /// Data is delayed but usable
    Delayed,
    Error(String),
}

impl ProviderStatus {
    /// Map the provider's status string. Unknown values are treated as errors.
    pub fn from_wire(status: &str, message: Option<&str>) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "OK" => ProviderStatus::Ok,
            "DELAYED" => ProviderStatus::Delayed,
            other => ProviderStatus::Error(
                message
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("provider status {}", other)),
            ),
        }
    }
}

/// One page of bars as returned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPage {
    pub bars: Vec<RawBar>,
    pub next_cursor: Option<String>,
    pub status: ProviderStatus,
}

impl ProviderPage {
    pub fn ok(bars: Vec<RawBar>, next_cursor: Option<String>) -> Self {
        Self {
            bars,
            next_cursor,
            status: ProviderStatus::Ok,
        }
    }
}

/// Aggregate bar in provider wire format
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBar {
    #[serde(rename = "o", with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(rename = "h", with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(rename = "c", with = "rust_decimal::serde::float")]
    pub close: Decimal,
    /// Some feeds report fractional volume
    #[serde(rename = "v")]
    pub volume: f64,
    /// Bar open, epoch millis
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
}

impl RawBar {
    pub fn into_bar(self, symbol: &str, timeframe: Timeframe) -> Result<Bar> {
        let timestamp = Utc
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .ok_or_else(|| AppError::Parse(format!("Invalid bar timestamp {}", self.timestamp_ms)))?;

        Ok(Bar::new(
            symbol,
            timeframe,
            timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume.max(0.0).round() as u64,
        ))
    }
}

/// Paginated read API for historical bars
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// Fetch one page. Transport failures map to [`AppError::ProviderUnavailable`];
    /// an explicit error status is returned in the page for the caller to judge.
    async fn fetch_page(&self, request: &PageRequest) -> Result<ProviderPage>;
}
