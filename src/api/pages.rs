//! Batched, rate-limited page retrieval.
//!
//! Pages are grouped into batches; within a batch every page is fetched
//! concurrently under a bounded semaphore, and all fetch tasks are joined
//! before the batch is handed to the caller. Between batches the stream
//! sleeps out the remainder of the rolling rate window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::client::{ApiClient, DateWindow};
use super::{DataSource, PageResult, RawPage};
use crate::config::RATE_WINDOW_SECS;
use crate::error::ApiError;

/// Lazy sequence of page batches for one source download. Restartable per
/// call to [`ApiClient::fetch_all`], not resumable mid-iteration.
pub struct PageStream<'a> {
    api: &'a ApiClient,
    source: DataSource,
    window: Option<DateWindow>,
    total_results: u64,
    pending: VecDeque<u64>,
    last_batch_start: Option<Instant>,
}

impl<'a> PageStream<'a> {
    pub(super) fn new(
        api: &'a ApiClient,
        source: DataSource,
        total_results: u64,
        window: Option<DateWindow>,
    ) -> Self {
        let page_size = source.page_size();
        let mut pending = VecDeque::new();
        let mut start = 0;
        while start < total_results {
            pending.push_back(start);
            start += page_size;
        }

        Self {
            api,
            source,
            window,
            total_results,
            pending,
            last_batch_start: None,
        }
    }

    pub fn total_results(&self) -> u64 {
        self.total_results
    }

    /// Number of pages not yet requested.
    pub fn pages_remaining(&self) -> usize {
        self.pending.len()
    }

    /// Fetch the next batch of pages. Returns `None` once every page has
    /// been requested. Each entry is either a raw page or a failed-page
    /// marker carrying the originating URL.
    pub async fn next_batch(&mut self) -> Option<Vec<PageResult>> {
        if self.pending.is_empty() {
            return None;
        }

        self.enforce_rate_window().await;
        self.last_batch_start = Some(Instant::now());

        let batch_range = self.api.batch_range();
        let mut urls = Vec::with_capacity(batch_range);
        for _ in 0..batch_range {
            let Some(start_index) = self.pending.pop_front() else {
                break;
            };
            urls.push(self.api.build_url(
                self.source,
                start_index,
                self.source.page_size(),
                self.window,
            ));
        }

        tracing::debug!(
            source = %self.source,
            pages = urls.len(),
            remaining = self.pending.len(),
            "starting download run"
        );

        let semaphore = Arc::new(Semaphore::new(self.api.semaphore_permits()));
        // Shared reborrow: every fetch future holds the same `&PageStream`.
        let this = &*self;
        let fetches = urls.iter().map(|url| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // Closed only on drop, acquire cannot fail here.
                let Ok(_permit) = semaphore.acquire().await else {
                    return PageResult::Failed { url: url.clone() };
                };
                this.fetch_page(url).await
            }
        });

        let results = futures::future::join_all(fetches).await;

        if let Some(started) = self.last_batch_start {
            tracing::debug!(elapsed = ?started.elapsed(), "download run finished");
        }

        Some(results)
    }

    /// Sleep out whatever remains of the rolling rate window since the
    /// previous batch started.
    async fn enforce_rate_window(&self) {
        let Some(last_start) = self.last_batch_start else {
            return;
        };
        let window = Duration::from_secs(RATE_WINDOW_SECS);
        let elapsed = last_start.elapsed();
        if elapsed < window {
            let deficit = window - elapsed;
            tracing::debug!(
                sleep = ?deficit,
                "rate window not expired; sleeping for the remainder"
            );
            tokio::time::sleep(deficit).await;
        }
    }

    /// Fetch one page, retrying data-shape mismatches with exponential
    /// backoff up to the configured attempt cap. Failures come back as a
    /// marker, never an error.
    async fn fetch_page(&self, url: &str) -> PageResult {
        let download = self.api.download_config();
        let mut fails: u32 = 0;

        loop {
            let outcome = self.try_fetch(url).await;
            self.jitter_sleep().await;

            match outcome {
                Ok(page) => return PageResult::Page(page),
                Err(ApiError::DataShape) => {
                    fails += 1;
                    if fails >= download.max_retries {
                        tracing::warn!(url, attempts = fails, "page retries exhausted");
                        return PageResult::Failed {
                            url: url.to_string(),
                        };
                    }
                    let backoff = download.backoff_base_secs * f64::from(1u32 << fails.min(16))
                        + rand::thread_rng().gen_range(0.0..=1.0) * download.backoff_base_secs;
                    tracing::debug!(
                        url,
                        attempt = fails,
                        max = download.max_retries,
                        backoff_secs = backoff,
                        "malformed page payload; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
                Err(err) => {
                    tracing::debug!(url, error = %err, "page retrieval failed");
                    return PageResult::Failed {
                        url: url.to_string(),
                    };
                }
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<RawPage, ApiError> {
        let response = self.api.http_client().get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::FORBIDDEN {
                tracing::debug!(url, "request forbidden by administrative rules");
            }
            return Err(ApiError::RetrievalFailed {
                url: url.to_string(),
            });
        }

        // An incomplete or non-JSON body is a transient payload problem.
        let body: Value = response.json().await.map_err(|_| ApiError::DataShape)?;
        self.validate_page(body)
    }

    /// A valid page carries the expected `format` tag and the matching
    /// item-list key; anything else is retryable.
    fn validate_page(&self, body: Value) -> Result<RawPage, ApiError> {
        let format = body.get("format").and_then(Value::as_str);
        if format != Some(self.source.format_tag()) {
            tracing::debug!(
                expected = self.source.format_tag(),
                got = ?format,
                "page format tag mismatch"
            );
            return Err(ApiError::DataShape);
        }

        let Some(items) = body.get(self.source.items_key()).and_then(Value::as_array) else {
            tracing::debug!(
                key = self.source.items_key(),
                "page payload is missing its item list"
            );
            return Err(ApiError::DataShape);
        };

        Ok(RawPage {
            source: self.source,
            start_index: body.get("startIndex").and_then(Value::as_u64).unwrap_or(0),
            total_results: body
                .get("totalResults")
                .and_then(Value::as_u64)
                .unwrap_or(self.total_results),
            items: items.clone(),
        })
    }

    /// Small random pause after each fetch to avoid request bursts.
    async fn jitter_sleep(&self) {
        let download = self.api.download_config();
        if download.sleep_max_secs <= 0.0 {
            return;
        }
        let min = download.sleep_min_secs.min(download.sleep_max_secs);
        let secs = rand::thread_rng().gen_range(min..=download.sleep_max_secs);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}
