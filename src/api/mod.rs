//! Rate-limited client for the NVD 2.0 REST API.
//!
//! The client builds paginated requests, enforces the rolling request-rate
//! window, fetches page batches concurrently with bounded parallelism and
//! exponential-backoff retry, and yields raw page payloads. It knows
//! nothing about record normalization; that happens downstream in the
//! correlation engine.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

pub mod client;
pub mod pages;

pub use client::{ApiClient, DateWindow};
pub use pages::PageStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const USER_AGENT: &str = concat!("nvd-mirror/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client: connection reuse, pooled TLS, fixed per-connection
/// timeouts. One instance serves every request of an update run.
pub fn create_shared_client(api_key: Option<&str>) -> anyhow::Result<Arc<Client>> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(key) = api_key {
        let mut value = reqwest::header::HeaderValue::from_str(key)?;
        value.set_sensitive(true);
        headers.insert("apiKey", value);
    }

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;

    Ok(Arc::new(client))
}

/// The two NVD API data sources this mirror pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    Cve,
    Cpe,
}

impl DataSource {
    /// REST path segment for this source.
    pub fn path(self) -> &'static str {
        match self {
            DataSource::Cve => "cves",
            DataSource::Cpe => "cpes",
        }
    }

    /// Maximum `resultsPerPage` the API accepts for this source.
    pub fn page_size(self) -> u64 {
        match self {
            DataSource::Cve => 2_000,
            DataSource::Cpe => 10_000,
        }
    }

    /// Expected `format` discriminator in a valid page payload.
    pub fn format_tag(self) -> &'static str {
        match self {
            DataSource::Cve => "NVD_CVE",
            DataSource::Cpe => "NVD_CPE",
        }
    }

    /// Key under which a valid page carries its item list.
    pub fn items_key(self) -> &'static str {
        match self {
            DataSource::Cve => "vulnerabilities",
            DataSource::Cpe => "products",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DataSource::Cve => "CVE",
            DataSource::Cpe => "CPE",
        })
    }
}

/// One page of raw upstream results. Ephemeral: produced by the client,
/// consumed immediately by the per-record transform.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub source: DataSource,
    pub start_index: u64,
    pub total_results: u64,
    pub items: Vec<Value>,
}

/// Outcome of one page fetch. A failed page is a value, not an error:
/// the batch continues and the caller decides how to log the gap.
#[derive(Debug)]
pub enum PageResult {
    Page(RawPage),
    /// The page could not be fetched after exhausting retries, or the
    /// server refused it (non-2xx, including 403).
    Failed {
        url: String,
    },
}
