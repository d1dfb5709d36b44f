//! Bulk feed retrieval (CWE catalog, CAPEC catalog, EPSS scores).
//!
//! Feeds are single-file downloads rather than paginated API sources. The
//! fetch short-circuits on the `Last-Modified` response header when the
//! store already holds that revision, and transparently unpacks zip and
//! gzip payloads by content type.

use std::io::Read;

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use reqwest::Client;

use crate::error::UpdateError;

pub mod capec;
pub mod cwe;
pub mod epss;

/// Outcome of a conditional feed fetch.
pub enum FeedPayload {
    /// Remote revision matches the stored one; nothing to process.
    Unchanged,
    /// Fresh content, already decompressed.
    Fetched {
        last_modified: NaiveDateTime,
        body: Vec<u8>,
    },
}

pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self { client })
    }

    /// Download a feed unless the remote `Last-Modified` stamp equals
    /// `previous`. `always_process` skips the short-circuit for feeds that
    /// must run every time regardless of the header.
    pub async fn fetch(
        &self,
        url: &str,
        previous: Option<NaiveDateTime>,
        always_process: bool,
    ) -> Result<FeedPayload, UpdateError> {
        tracing::debug!(url, "downloading feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| UpdateError::Feed(format!("download of {url} failed: {err}")))?;
        if !response.status().is_success() {
            return Err(UpdateError::Feed(format!(
                "download of {url} failed with status {}",
                response.status()
            )));
        }

        let last_modified = match header_date(&response) {
            Some(stamp) => stamp,
            None => {
                // No header means we cannot compare revisions; force the
                // update with an epoch stamp.
                tracing::warn!(url, "response carries no last-modified header; forcing update");
                NaiveDateTime::default()
            }
        };
        tracing::debug!(url, %last_modified, "feed last-modified value");

        if !always_process && previous == Some(last_modified) {
            tracing::info!(url, "feed not modified since the last update");
            return Ok(FeedPayload::Unchanged);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let raw = response
            .bytes()
            .await
            .map_err(|err| UpdateError::Feed(format!("reading body of {url} failed: {err}")))?;

        let body = unpack(&raw, &content_type, url)?;
        Ok(FeedPayload::Fetched {
            last_modified,
            body,
        })
    }
}

fn header_date(response: &reqwest::Response) -> Option<NaiveDateTime> {
    let value = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)?
        .to_str()
        .ok()?;
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Decompress a feed body according to its content type. Zip archives are
/// expected to hold exactly one data file.
fn unpack(raw: &[u8], content_type: &str, url: &str) -> Result<Vec<u8>, UpdateError> {
    let feed_err = |err: String| UpdateError::Feed(format!("unpacking {url} failed: {err}"));

    if content_type.contains("zip") && !content_type.contains("gzip") {
        let cursor = std::io::Cursor::new(raw);
        let mut archive = zip::ZipArchive::new(cursor).map_err(|e| feed_err(e.to_string()))?;
        if archive.is_empty() {
            return Err(feed_err("archive holds no files".to_string()));
        }
        let mut file = archive.by_index(0).map_err(|e| feed_err(e.to_string()))?;
        let mut body = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut body)
            .map_err(|e| feed_err(e.to_string()))?;
        return Ok(body);
    }

    if content_type.contains("gzip") || url.ends_with(".gz") {
        let mut decoder = GzDecoder::new(raw);
        let mut body = Vec::new();
        decoder
            .read_to_end(&mut body)
            .map_err(|e| feed_err(e.to_string()))?;
        return Ok(body);
    }

    Ok(raw.to_vec())
}
