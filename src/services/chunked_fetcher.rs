use crate::error::{AppError, Result};
use crate::models::{Bar, DateRange, SyncConfig, Timeframe};
use crate::services::provider::{BarProvider, PageRequest, ProviderPage, ProviderStatus};
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Pagination position: `Some(None)` before the first request,
/// `Some(Some(cursor))` for follow-ups and `None` once exhausted.
type Cursor = Option<Option<String>>;

/// Fetches one chunk from the provider, following cursors up to a request cap
pub struct ChunkedFetcher {
    provider: Arc<dyn BarProvider>,
    max_requests: usize,
    page_delay: Duration,
}

impl ChunkedFetcher {
    pub fn new(provider: Arc<dyn BarProvider>, max_requests: usize, page_delay: Duration) -> Self {
        Self {
            provider,
            max_requests: max_requests.max(1),
            page_delay,
        }
    }

    pub fn from_config(provider: Arc<dyn BarProvider>, config: &SyncConfig) -> Self {
        Self::new(provider, config.max_page_requests, config.page_delay)
    }

    /// Lazy, finite sequence of pages for `range`.
    ///
    /// Ends when the provider stops returning a cursor, after `max_requests`
    /// requests, or after the first error (which is yielded).
    pub fn pages<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        range: DateRange,
    ) -> impl Stream<Item = Result<ProviderPage>> + 'a {
        let start: (Cursor, usize) = (Some(None), 0);

        stream::unfold(start, move |(cursor, issued)| async move {
            let Some(cursor) = cursor else {
                return None;
            };

            if issued >= self.max_requests {
                warn!(
                    symbol,
                    timeframe = %timeframe,
                    max_requests = self.max_requests,
                    "Pagination cap reached, returning partial chunk"
                );
                return None;
            }

            if issued > 0 {
                sleep(self.page_delay).await;
            }

            let request = PageRequest {
                symbol: symbol.to_string(),
                timeframe,
                range,
                cursor,
            };

            let page = match self.provider.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) => return Some((Err(e), (None, issued + 1))),
            };

            match &page.status {
                ProviderStatus::Ok => {}
                ProviderStatus::Delayed => {
                    warn!(symbol, timeframe = %timeframe, "Provider returned delayed data, using it");
                }
                ProviderStatus::Error(message) => {
                    let err = AppError::ProviderUnavailable(format!(
                        "{} {} {}: {}",
                        symbol, timeframe, range, message
                    ));
                    return Some((Err(err), (None, issued + 1)));
                }
            }

            debug!(
                symbol,
                page = issued + 1,
                bars = page.bars.len(),
                has_next = page.next_cursor.is_some(),
                "Fetched page"
            );

            let next = page.next_cursor.clone().map(Some);
            Some((Ok(page), (next, issued + 1)))
        })
    }

    /// All bars for `range` in provider order. Any page failure fails the chunk.
    #[instrument(skip(self, range), fields(range = %range))]
    pub async fn fetch(&self, symbol: &str, timeframe: Timeframe, range: DateRange) -> Result<Vec<Bar>> {
        let pages = self.pages(symbol, timeframe, range);
        futures::pin_mut!(pages);

        let mut bars = Vec::new();
        let mut page_count = 0;
        while let Some(page) = pages.next().await {
            let page = page?;
            page_count += 1;
            for raw in page.bars {
                bars.push(raw.into_bar(symbol, timeframe)?);
            }
        }

        info!(symbol, timeframe = %timeframe, pages = page_count, bars = bars.len(), "Chunk fetched");
        Ok(bars)
    }
}
