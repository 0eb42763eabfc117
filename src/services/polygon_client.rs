use crate::constants::PROVIDER_PAGE_LIMIT;
use crate::error::{AppError, Result};
use crate::models::ProviderConfig;
use crate::services::provider::{BarProvider, PageRequest, ProviderPage, ProviderStatus, RawBar};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Aggregates endpoint response body
#[derive(Debug, Deserialize)]
struct AggregatesResponse {
    status: String,
    #[serde(default)]
    results: Vec<RawBar>,
    next_url: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

/// Error body returned alongside 4xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    status: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn summary(&self) -> Option<String> {
        let detail = self.error.as_deref().or(self.message.as_deref());
        match (self.status.as_deref(), detail) {
            (Some(status), Some(detail)) => Some(format!("{}: {}", status, detail)),
            (Some(status), None) => Some(status.to_string()),
            (None, Some(detail)) => Some(detail.to_string()),
            (None, None) => None,
        }
    }
}

/// HTTP client for a Polygon-style aggregates API
pub struct PolygonClient {
    config: ProviderConfig,
    client: reqwest::Client,
    retry_base_delay: Duration,
}

impl PolygonClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "Invalid base_url: must start with http:// or https://, got: '{}'",
                base_url
            )));
        }
        if config.api_key.trim().is_empty() {
            return Err(AppError::Config("Provider API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Created PolygonClient: base_url='{}', max_retries={}",
            base_url, config.max_retries
        );

        Ok(Self {
            config: ProviderConfig { base_url, ..config },
            client,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Base delay of the exponential backoff between retries
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// First page URL, without credentials
    fn first_page_url(&self, request: &PageRequest) -> String {
        let (multiplier, timespan) = request.timeframe.provider_range();
        format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}?adjusted=true&sort=asc&limit={}",
            self.config.base_url,
            request.symbol,
            multiplier,
            timespan,
            request.range.from.timestamp_millis(),
            request.range.to.timestamp_millis(),
            PROVIDER_PAGE_LIMIT
        )
    }

    fn with_api_key(&self, url: &str) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{}{}apiKey={}", url, separator, self.config.api_key)
    }

    fn redact(&self, text: &str) -> String {
        text.replace(self.config.api_key.as_str(), "***")
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_base_delay.as_secs_f64();
        let delay = base * 2.0_f64.powi(attempt as i32 - 1) + base * rand::random::<f64>();
        Duration::from_secs_f64(delay).min(Duration::from_secs(60))
    }

    /// GET with retries on 429, 5xx and transport errors. Other 4xx fail at once.
    async fn get_with_retry(&self, url: &str) -> Result<AggregatesResponse> {
        let authorized = self.with_api_key(url);
        let mut last_error: Option<String> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                let reason = last_error.as_deref().unwrap_or("unknown error");
                info!(
                    "Provider retry backoff: attempt {}/{} - reason: {}, waiting {:.2}s before retry",
                    attempt + 1,
                    self.config.max_retries + 1,
                    reason,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
            }

            debug!(attempt = attempt + 1, url = %url, "Sending provider request");

            let response = match self.client.get(&authorized).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("Network error: {}", e.without_url()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let body = response.text().await?;
                return serde_json::from_str(&body)
                    .map_err(|e| AppError::Parse(format!("Failed to parse aggregates response: {}", e)));
            }

            let status_text = status.canonical_reason().unwrap_or("Unknown");
            if status == StatusCode::TOO_MANY_REQUESTS {
                last_error = Some("Too Many Requests (429) - rate limited".to_string());
            } else if status.is_server_error() {
                last_error = Some(format!("Server error ({}) - {}", status.as_u16(), status_text));
            } else {
                let body = response.text().await.unwrap_or_default();
                let detail = serde_json::from_str::<ErrorBody>(&body)
                    .ok()
                    .and_then(|parsed| parsed.summary())
                    .map(|summary| format!(" - {}", self.redact(&summary)))
                    .unwrap_or_default();
                return Err(AppError::ProviderUnavailable(format!(
                    "Client error ({}) - {}{} - not retryable",
                    status.as_u16(),
                    status_text,
                    detail
                )));
            }
        }

        warn!("Provider request failed after {} attempts", self.config.max_retries + 1);
        Err(AppError::ProviderUnavailable(format!(
            "Max retries exceeded: {}",
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}

#[async_trait]
impl BarProvider for PolygonClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ProviderPage> {
        let url = match &request.cursor {
            Some(next_url) => next_url.clone(),
            None => self.first_page_url(request),
        };

        let response = self.get_with_retry(&url).await?;
        let status = ProviderStatus::from_wire(
            &response.status,
            response.error.as_deref().or(response.message.as_deref()),
        );

        Ok(ProviderPage {
            bars: response.results,
            next_cursor: response.next_url.filter(|next| !next.is_empty()),
            status,
        })
    }
}
