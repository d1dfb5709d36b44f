//! Update orchestration across all mirrored sources.
//!
//! [`MainUpdater`] drives each source through either a full populate or an
//! incremental update. API sources (CPE, CVE) decide between the two by
//! whether their collection already holds data; feed sources (CWE, EPSS)
//! are single-file downloads. Every completed run ends with an index
//! rebuild and a schema-version stamp.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};

use crate::api::client::DateWindow;
use crate::api::{ApiClient, DataSource, PageResult};
use crate::config::{Config, MAX_DATE_RANGE_DAYS};
use crate::correlate::{CpeProcessor, CveProcessor};
use crate::error::UpdateError;
use crate::feeds::{capec, cwe, epss, FeedClient, FeedPayload};
use crate::model::{ProductRecord, VulnerabilityRecord};
use crate::store::{Collection, MirrorStore};

/// Updatable sources, in the order a full run processes them. CPE must
/// precede CVE so range resolution sees a current product inventory.
const SOURCE_ORDER: [Collection; 5] = [
    Collection::Cpe,
    Collection::Cve,
    Collection::Cwe,
    Collection::Capec,
    Collection::Epss,
];

pub struct MainUpdater<S: MirrorStore> {
    store: Arc<S>,
    api: ApiClient,
    feeds: FeedClient,
    config: Config,
}

impl<S: MirrorStore> MainUpdater<S> {
    pub fn new(store: Arc<S>, config: Config) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config)?;
        let feeds = FeedClient::new()?;
        Ok(Self::with_clients(store, api, feeds, config))
    }

    /// Assemble from prebuilt clients. Lets tests point both the API and
    /// feed clients at mock servers.
    pub fn with_clients(store: Arc<S>, api: ApiClient, feeds: FeedClient, config: Config) -> Self {
        Self {
            store,
            api,
            feeds,
            config,
        }
    }

    /// Incrementally update the named sources, or all of them. Unknown
    /// source names abort before any source runs.
    pub async fn update(&self, sources: Option<&[String]>) -> Result<(), UpdateError> {
        tracing::info!("starting database update");
        let started = Instant::now();
        let collections = self.resolve(sources)?;

        let mut outcome = Ok(());
        for collection in collections {
            if let Err(err) = self.update_source(collection).await {
                tracing::error!(source = %collection, error = %err, "source update failed");
                outcome = Err(err);
                break;
            }
        }

        // Indexes and the schema stamp are refreshed even when a source
        // failed partway; only an unresolvable source name skips this.
        self.finish_run()?;
        outcome?;
        tracing::info!(elapsed = ?started.elapsed(), "database update complete");
        Ok(())
    }

    /// Rebuild the named sources, or all of them, from scratch.
    pub async fn populate(&self, sources: Option<&[String]>) -> Result<(), UpdateError> {
        tracing::info!("starting database population");
        let started = Instant::now();
        let collections = self.resolve(sources)?;

        let mut outcome = Ok(());
        for collection in collections {
            if let Err(err) = self.populate_source(collection).await {
                tracing::error!(source = %collection, error = %err, "source population failed");
                outcome = Err(err);
                break;
            }
        }

        self.finish_run()?;
        outcome?;
        tracing::info!(elapsed = ?started.elapsed(), "database population complete");
        Ok(())
    }

    /// Set up a fresh mirror: populate the API sources, then run a full
    /// update to pick up the feeds.
    pub async fn initialize(&self) -> Result<(), UpdateError> {
        tracing::info!("starting database initialization");
        let started = Instant::now();

        self.populate_source(Collection::Cpe).await?;

        tracing::info!("pausing between product and vulnerability population");
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        self.populate_source(Collection::Cve).await?;
        self.update(None).await?;

        tracing::info!(elapsed = ?started.elapsed(), "database initialization complete");
        Ok(())
    }

    /// Map requested source names onto collections, in canonical order.
    /// A name that matches nothing is fatal for the whole run.
    fn resolve(&self, sources: Option<&[String]>) -> Result<Vec<Collection>, UpdateError> {
        let Some(names) = sources else {
            return Ok(SOURCE_ORDER.to_vec());
        };

        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let found = Collection::from_source_name(name)
                .ok_or_else(|| UpdateError::SourceNotFound(name.clone()))?;
            if !resolved.contains(&found) {
                resolved.push(found);
            }
        }
        resolved.sort_by_key(|c| SOURCE_ORDER.iter().position(|o| o == c));
        Ok(resolved)
    }

    async fn update_source(&self, collection: Collection) -> Result<(), UpdateError> {
        tracing::info!(source = %collection, "source update started");
        let started = Instant::now();

        match collection {
            Collection::Cpe | Collection::Cve => {
                if !self.store.collection_exists(collection)? {
                    tracing::info!(
                        source = %collection,
                        "collection holds no data; falling back to a full populate"
                    );
                    self.sync_api_source(collection, None).await?;
                } else if let Some(window) = self.incremental_window(collection)? {
                    self.sync_api_source(collection, Some(window)).await?;
                }
            }
            Collection::Cwe => self.sync_weaknesses(false).await?,
            Collection::Capec => self.sync_attack_patterns(false).await?,
            Collection::Epss => self.sync_epss().await?,
        }

        tracing::info!(source = %collection, elapsed = ?started.elapsed(), "source update finished");
        Ok(())
    }

    async fn populate_source(&self, collection: Collection) -> Result<(), UpdateError> {
        tracing::info!(source = %collection, "source population started");
        let started = Instant::now();

        self.store.clear_watermark(collection)?;
        self.store.drop_collection(collection)?;

        match collection {
            Collection::Cpe | Collection::Cve => self.sync_api_source(collection, None).await?,
            Collection::Cwe => self.sync_weaknesses(true).await?,
            Collection::Capec => self.sync_attack_patterns(true).await?,
            Collection::Epss => self.sync_epss().await?,
        }

        tracing::info!(source = %collection, elapsed = ?started.elapsed(), "source population finished");
        Ok(())
    }

    /// Compute the modification window for an incremental run: from one
    /// second past the newest stored record (or a configured number of
    /// days back) until now. `None` means there is nothing to update from.
    fn incremental_window(&self, collection: Collection) -> Result<Option<DateWindow>, UpdateError> {
        let end = Utc::now().naive_utc();

        if let Some(days) = self.config.download.max_days_back {
            // Cap the day count itself so the window stays anchored at
            // now instead of losing its newest span to the end-date cap.
            let days = if days > MAX_DATE_RANGE_DAYS {
                tracing::warn!(
                    requested_days = days,
                    "requested days-back exceeds the 120 day limit; capping"
                );
                MAX_DATE_RANGE_DAYS
            } else {
                days
            };
            let start = end - ChronoDuration::days(days);
            return Ok(Some(DateWindow { start, end }));
        }

        match self.store.latest_modified(collection)? {
            // One second past the newest record, to keep it out of the
            // next result set.
            Some(latest) => Ok(Some(DateWindow {
                start: latest + ChronoDuration::seconds(1),
                end,
            })),
            None => {
                tracing::warn!(
                    source = %collection,
                    "no records with a modification stamp found; skipping incremental update"
                );
                Ok(None)
            }
        }
    }

    /// Drive a paginated API download to completion and bulk-write each
    /// page as it lands. Failed pages are logged and skipped; the run
    /// itself keeps going.
    async fn sync_api_source(
        &self,
        collection: Collection,
        window: Option<DateWindow>,
    ) -> Result<(), UpdateError> {
        let run_start = Utc::now().naive_utc();
        let source = match collection {
            Collection::Cpe => DataSource::Cpe,
            _ => DataSource::Cve,
        };

        let mut stream = self.api.fetch_all(source, window).await;
        let mut stored = 0usize;
        let mut failed_pages = 0usize;

        match collection {
            Collection::Cpe => {
                let processor = CpeProcessor::new(self.config.sources.cpe_filter_deprecated);
                while let Some(batch) = stream.next_batch().await {
                    for result in batch {
                        match result {
                            PageResult::Page(page) => {
                                let records: Vec<ProductRecord> = page
                                    .items
                                    .iter()
                                    .filter_map(|item| processor.process_the_item(item))
                                    .collect();
                                stored += self.store.upsert_products(&records)?;
                            }
                            PageResult::Failed { url } => {
                                failed_pages += 1;
                                tracing::error!(url, "retrieval of api data failed");
                            }
                        }
                    }
                }
            }
            _ => {
                let mut processor = CveProcessor::new(self.store.as_ref());
                while let Some(batch) = stream.next_batch().await {
                    for result in batch {
                        match result {
                            PageResult::Page(page) => {
                                let mut records: Vec<VulnerabilityRecord> =
                                    Vec::with_capacity(page.items.len());
                                for item in &page.items {
                                    if let Some(record) = processor.process_the_item(item)? {
                                        records.push(record);
                                    }
                                }
                                stored += self.store.upsert_vulnerabilities(&records)?;
                            }
                            PageResult::Failed { url } => {
                                failed_pages += 1;
                                tracing::error!(url, "retrieval of api data failed");
                            }
                        }
                    }
                }
                processor.into_stats().log_summary();
            }
        }

        tracing::info!(
            source = %collection,
            stored,
            failed_pages,
            "download and processing finished"
        );
        self.store.set_watermark(collection, run_start)?;
        Ok(())
    }

    async fn sync_weaknesses(&self, force: bool) -> Result<(), UpdateError> {
        let previous = self.store.watermark(Collection::Cwe)?;
        let payload = self
            .feeds
            .fetch(&self.config.sources.cwe_url, previous, force)
            .await?;

        match payload {
            FeedPayload::Unchanged => Ok(()),
            FeedPayload::Fetched {
                last_modified,
                body,
            } => {
                let records = cwe::parse_catalog(&body)?;
                let stored = self.store.upsert_weaknesses(&records)?;
                tracing::info!(stored, "weakness catalog processed");
                self.set_feed_watermark(Collection::Cwe, last_modified)
            }
        }
    }

    async fn sync_attack_patterns(&self, force: bool) -> Result<(), UpdateError> {
        let previous = self.store.watermark(Collection::Capec)?;
        let payload = self
            .feeds
            .fetch(&self.config.sources.capec_url, previous, force)
            .await?;

        match payload {
            FeedPayload::Unchanged => Ok(()),
            FeedPayload::Fetched {
                last_modified,
                body,
            } => {
                let records = capec::parse_catalog(&body)?;
                let stored = self.store.upsert_attack_patterns(&records)?;
                tracing::info!(stored, "attack pattern catalog processed");
                self.set_feed_watermark(Collection::Capec, last_modified)
            }
        }
    }

    /// EPSS republishes daily and newly inserted CVEs may lack scores, so
    /// the revision short-circuit never applies here.
    async fn sync_epss(&self) -> Result<(), UpdateError> {
        let payload = self
            .feeds
            .fetch(&self.config.sources.epss_url, None, true)
            .await?;

        match payload {
            FeedPayload::Unchanged => Ok(()),
            FeedPayload::Fetched {
                last_modified,
                body,
            } => {
                let scores = epss::parse_scores(&body)?;
                let stored = self.store.upsert_epss(&scores)?;
                tracing::info!(stored, "EPSS scores processed");
                self.set_feed_watermark(Collection::Epss, last_modified)
            }
        }
    }

    /// The epoch default means the revision was unknown; storing it would
    /// make the next short-circuit comparison meaningless.
    fn set_feed_watermark(
        &self,
        collection: Collection,
        stamp: NaiveDateTime,
    ) -> Result<(), UpdateError> {
        if stamp == NaiveDateTime::default() {
            return Ok(());
        }
        self.store.set_watermark(collection, stamp)
    }

    fn finish_run(&self) -> Result<(), UpdateError> {
        self.store.create_indexes()?;
        self.store.update_schema_version()?;
        Ok(())
    }
}
