//! Idempotent bar writes
//!
//! The store's `(symbol, timeframe, timestamp)` uniqueness constraint is the
//! real guarantee; filtering here only avoids sending rows that would be
//! ignored anyway.

use crate::error::{AppError, Result};
use crate::models::{Bar, DateRange, Timeframe};
use crate::services::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DedupWriter {
    store: Arc<dyn Store>,
    batch_size: usize,
}

impl DedupWriter {
    pub fn new(store: Arc<dyn Store>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Collapse bars sharing a timestamp, keeping the last occurrence, and
    /// return them in timestamp order.
    pub fn dedup_batch(bars: Vec<Bar>) -> Vec<Bar> {
        let mut by_timestamp: HashMap<i64, Bar> = HashMap::with_capacity(bars.len());
        for bar in bars {
            by_timestamp.insert(bar.timestamp_ms(), bar);
        }

        let mut unique: Vec<Bar> = by_timestamp.into_values().collect();
        unique.sort_by_key(|bar| bar.timestamp);
        unique
    }

    /// Write the bars whose key is not already stored. Returns rows written.
    ///
    /// Bars for a different symbol or timeframe than requested are dropped.
    /// Running this twice with the same input writes nothing the second time.
    pub async fn write_new(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) -> Result<usize> {
        let received = bars.len();
        let bars: Vec<Bar> = bars
            .into_iter()
            .filter(|bar| bar.symbol == symbol && bar.timeframe == timeframe)
            .collect();
        if bars.is_empty() {
            return Ok(0);
        }

        let bars = Self::dedup_batch(bars);

        let span = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => DateRange::new(first.timestamp, last.timestamp),
            _ => return Ok(0),
        };

        let existing = self.store.existing_timestamps(symbol, timeframe, span).await?;
        let fresh: Vec<Bar> = bars
            .into_iter()
            .filter(|bar| !existing.contains(&bar.timestamp_ms()))
            .collect();

        let mut written = 0;
        for batch in fresh.chunks(self.batch_size) {
            match self.store.insert_ignore(batch).await {
                Ok(count) => written += count,
                // A concurrent writer got there first
                Err(AppError::StoreConflict(message)) => {
                    debug!(symbol, timeframe = %timeframe, "Ignoring store conflict: {}", message);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            symbol,
            timeframe = %timeframe,
            received,
            already_stored = existing.len(),
            written,
            "Wrote new bars"
        );
        Ok(written)
    }
}
