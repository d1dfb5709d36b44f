//! Storage contract and the SQLite backend.
//!
//! The core only depends on the read/write contract below: a stem-keyed
//! padded-version range lookup for the correlation engine, upsert-batch
//! writes keyed by record id, and a per-collection watermark. The SQLite
//! backend in [`sqlite`] satisfies it.

use chrono::NaiveDateTime;

use crate::error::UpdateError;
use crate::model::{
    AttackPatternRecord, EpssScore, ProductRecord, VulnerabilityRecord, WeaknessRecord,
};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// The mirrored collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Cpe,
    Cve,
    Cwe,
    Capec,
    Epss,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Cpe => "cpe",
            Collection::Cve => "cves",
            Collection::Cwe => "cwe",
            Collection::Capec => "capec",
            Collection::Epss => "epss",
        }
    }

    /// Resolve a user-facing source name. `cve` is the documented name;
    /// the stored collection name `cves` is accepted as an alias.
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name {
            "cpe" => Some(Collection::Cpe),
            "cve" | "cves" => Some(Collection::Cve),
            "cwe" => Some(Collection::Cwe),
            "capec" => Some(Collection::Capec),
            "epss" => Some(Collection::Epss),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A product inventory lookup: stem equality plus an optional padded-version
/// range. Bounds hold already-padded keys; excluding bounds (`gt`/`lt`) take
/// precedence over including ones when both ends are given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductRangeQuery {
    pub stem: String,
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
}

impl ProductRangeQuery {
    /// True when at least one version bound is set. An unbounded query
    /// means the criterion had no range modifiers and no lookup happens.
    pub fn is_bounded(&self) -> bool {
        self.gt.is_some() || self.gte.is_some() || self.lt.is_some() || self.lte.is_some()
    }
}

/// Read interface into the product inventory, consumed by the correlation
/// engine. Results exclude deprecated products and come back sorted
/// ascending by padded version.
pub trait ProductInventory: Send + Sync {
    fn find_products(&self, query: &ProductRangeQuery) -> Result<Vec<ProductRecord>, UpdateError>;
}

/// Full read/write contract the orchestrator drives.
pub trait MirrorStore: ProductInventory {
    /// Whether a collection holds any data yet. Decides full populate vs.
    /// incremental update.
    fn collection_exists(&self, collection: Collection) -> Result<bool, UpdateError>;

    /// Most recent `lastModified` among stored records of a collection.
    fn latest_modified(&self, collection: Collection) -> Result<Option<NaiveDateTime>, UpdateError>;

    /// Insert-or-replace batches keyed by record id.
    fn upsert_products(&self, records: &[ProductRecord]) -> Result<usize, UpdateError>;
    fn upsert_vulnerabilities(
        &self,
        records: &[VulnerabilityRecord],
    ) -> Result<usize, UpdateError>;
    fn upsert_weaknesses(&self, records: &[WeaknessRecord]) -> Result<usize, UpdateError>;
    fn upsert_attack_patterns(
        &self,
        records: &[AttackPatternRecord],
    ) -> Result<usize, UpdateError>;
    fn upsert_epss(&self, records: &[EpssScore]) -> Result<usize, UpdateError>;

    /// Drop all rows of a collection (full populate starts clean).
    fn drop_collection(&self, collection: Collection) -> Result<(), UpdateError>;

    /// Per-collection synchronization watermark.
    fn watermark(&self, collection: Collection) -> Result<Option<NaiveDateTime>, UpdateError>;
    fn set_watermark(
        &self,
        collection: Collection,
        stamp: NaiveDateTime,
    ) -> Result<(), UpdateError>;
    fn clear_watermark(&self, collection: Collection) -> Result<(), UpdateError>;

    /// (Re)build secondary indexes.
    fn create_indexes(&self) -> Result<(), UpdateError>;

    /// Record the schema version this binary writes.
    fn update_schema_version(&self) -> Result<(), UpdateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Cpe.name(), "cpe");
        assert_eq!(Collection::Cve.name(), "cves");
        assert_eq!(Collection::Cwe.name(), "cwe");
        assert_eq!(Collection::Capec.name(), "capec");
        assert_eq!(Collection::Epss.name(), "epss");
    }

    #[test]
    fn test_source_name_resolution() {
        assert_eq!(Collection::from_source_name("cve"), Some(Collection::Cve));
        assert_eq!(Collection::from_source_name("cves"), Some(Collection::Cve));
        assert_eq!(
            Collection::from_source_name("capec"),
            Some(Collection::Capec)
        );
        assert_eq!(Collection::from_source_name("via4"), None);
    }

    #[test]
    fn test_range_query_boundedness() {
        let mut query = ProductRangeQuery {
            stem: "cpe:2.3:a:vendor:product".to_string(),
            ..Default::default()
        };
        assert!(!query.is_bounded());

        query.gte = Some("00001.00000".to_string());
        assert!(query.is_bounded());
    }
}
