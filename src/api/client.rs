//! Request building and the total-count probe.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use reqwest::Client;
use serde_json::Value;
use url::form_urlencoded;

use super::{create_shared_client, DataSource, PageStream};
use crate::config::{Config, DownloadConfig, MAX_DATE_RANGE_DAYS};
use crate::error::ApiError;

/// Transport-level attempts for the single count probe before the run
/// degrades to zero items.
const COUNT_ATTEMPTS: u32 = 3;

/// An optional last-modification window for incremental runs. The API
/// rejects spans wider than 120 days, so [`DateWindow::capped`] shrinks
/// the end date when needed.
#[derive(Debug, Clone, Copy)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateWindow {
    /// Cap the window to the API's maximum span, warning when the
    /// requested range had to shrink.
    pub fn capped(self) -> Self {
        let span = self.end - self.start;
        if span.num_days() > MAX_DATE_RANGE_DAYS {
            let excess = span.num_days() - MAX_DATE_RANGE_DAYS;
            let end = self.end - ChronoDuration::days(excess);
            tracing::warn!(
                requested_days = span.num_days(),
                new_end = %end,
                "requested timeframe exceeds the 120 day limit; capping the date range"
            );
            return Self { end, ..self };
        }
        self
    }
}

/// Client for the NVD 2.0 REST API.
pub struct ApiClient {
    client: Arc<Client>,
    base_url: String,
    no_rejected: bool,
    has_api_key: bool,
    download: DownloadConfig,
    batch_range: usize,
    semaphore_permits: usize,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = create_shared_client(config.api.api_key.as_deref())?;
        Ok(Self::with_client(client, config))
    }

    /// Build a client around an existing HTTP client. Lets tests point at
    /// a mock server via `config.api.base_url`.
    pub fn with_client(client: Arc<Client>, config: &Config) -> Self {
        Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            no_rejected: config.api.no_rejected,
            has_api_key: config.api.api_key.is_some(),
            download: config.download.clone(),
            batch_range: config.batch_range(),
            semaphore_permits: config.semaphore_permits(),
        }
    }

    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    pub(crate) fn download_config(&self) -> &DownloadConfig {
        &self.download
    }

    pub(crate) fn batch_range(&self) -> usize {
        self.batch_range
    }

    pub(crate) fn semaphore_permits(&self) -> usize {
        self.semaphore_permits
    }

    pub fn has_api_key(&self) -> bool {
        self.has_api_key
    }

    /// Build the page URL for one request.
    pub fn build_url(
        &self,
        source: DataSource,
        start_index: u64,
        results_per_page: u64,
        window: Option<DateWindow>,
    ) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("resultsPerPage", &results_per_page.to_string());
        query.append_pair("startIndex", &start_index.to_string());
        if let Some(window) = window {
            query.append_pair(
                "lastModStartDate",
                &window.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            );
            query.append_pair(
                "lastModEndDate",
                &window.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            );
        }
        let query = query.finish();

        // `noRejected` is a bare flag without a value; only valid for CVEs.
        let flag = if self.no_rejected && source == DataSource::Cve {
            "noRejected&"
        } else {
            ""
        };

        format!(
            "{}/rest/json/{}/2.0/?{}{}",
            self.base_url,
            source.path(),
            flag,
            query
        )
    }

    /// Query the total result count with a single-item probe. Retries the
    /// transport a bounded number of times, then surfaces
    /// [`ApiError::MaxRetriesExceeded`] for the caller to degrade on.
    pub async fn total_count(
        &self,
        source: DataSource,
        window: Option<DateWindow>,
    ) -> Result<u64, ApiError> {
        let window = window.map(DateWindow::capped);
        let url = self.build_url(source, 0, 1, window);
        tracing::debug!(%source, "querying total result count");

        for attempt in 0..COUNT_ATTEMPTS {
            match self.try_count(&url).await {
                Ok(total) => return Ok(total),
                Err(err) => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max = COUNT_ATTEMPTS,
                        error = %err,
                        "count probe failed"
                    );
                    let backoff = self.download.backoff_base_secs * f64::from(1 << attempt);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(backoff)).await;
                }
            }
        }

        Err(ApiError::MaxRetriesExceeded)
    }

    async fn try_count(&self, url: &str) -> Result<u64, ApiError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::RetrievalFailed {
                url: url.to_string(),
            });
        }
        let body: Value = response.json().await?;
        body.get("totalResults")
            .and_then(Value::as_u64)
            .ok_or(ApiError::DataShape)
    }

    /// Start a paginated download of every matching record. A failed count
    /// probe degrades to zero items for the run rather than aborting the
    /// source update.
    pub async fn fetch_all(&self, source: DataSource, window: Option<DateWindow>) -> PageStream<'_> {
        let window = window.map(DateWindow::capped);
        let total = match self.total_count(source, window).await {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(%source, error = %err, "failed to obtain result count; continuing with zero items");
                0
            }
        };

        tracing::info!(%source, total_results = total, "preparing download");
        PageStream::new(self, source, total, window)
    }
}
