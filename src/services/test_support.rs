//! Provider doubles shared by the service tests

use crate::error::Result;
use crate::models::{DateRange, Timeframe};
use crate::services::provider::{BarProvider, PageRequest, ProviderPage, RawBar};
use async_trait::async_trait;
use chrono::{Datelike, Duration, TimeZone, Utc, Weekday};
use rust_decimal_macros::dec;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&PageRequest, usize) -> Result<ProviderPage> + Send + Sync>;

/// Provider answering each request with a closure of `(request, call_index)`
pub struct FnProvider {
    responder: Responder,
    requests: Mutex<Vec<PageRequest>>,
}

impl FnProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&PageRequest, usize) -> Result<ProviderPage> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serves [`synthetic_bars`] for whatever range is asked, in a single page
    pub fn synthetic() -> Self {
        Self::new(|request, _| {
            Ok(ProviderPage::ok(
                synthetic_bars(request.timeframe, request.range),
                None,
            ))
        })
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl BarProvider for FnProvider {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ProviderPage> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.responder)(request, index)
    }
}

pub fn raw_bar(timestamp_ms: i64) -> RawBar {
    RawBar {
        open: dec!(100),
        high: dec!(101),
        low: dec!(99),
        close: dec!(100.5),
        volume: 1000.0,
        timestamp_ms,
    }
}

/// Weekday bars inside `range`. Daily bars sit at midnight UTC, intraday bars
/// cover 14:30..21:00 UTC.
pub fn synthetic_bars(timeframe: Timeframe, range: DateRange) -> Vec<RawBar> {
    let mut bars = Vec::new();
    let mut day = range.from.date_naive();
    let last = range.to.date_naive();

    while day <= last {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            let midnight = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
            let stamps: Vec<_> = match timeframe {
                Timeframe::Day1 => vec![midnight],
                other => {
                    let open = midnight + Duration::minutes(14 * 60 + 30);
                    (0..other.bars_per_session() as i64)
                        .map(|i| open + other.duration() * i as i32)
                        .collect()
                }
            };
            bars.extend(
                stamps
                    .into_iter()
                    .filter(|ts| *ts >= range.from && *ts <= range.to)
                    .map(|ts| raw_bar(ts.timestamp_millis())),
            );
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    bars
}
