//! Pooled SQLite backend for the mirror.
//!
//! Records are stored as JSON payloads next to the handful of columns the
//! correlation engine and orchestrator query on (stem, padded version,
//! deprecated flag, last-modified). Padded-version range queries compile
//! to plain string comparisons, which is the whole point of the padding.

use std::path::PathBuf;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use super::{Collection, MirrorStore, ProductInventory, ProductRangeQuery};
use crate::config::StoreConfig;
use crate::error::UpdateError;
use crate::model::{
    AttackPatternRecord, EpssScore, ProductRecord, VulnerabilityRecord, WeaknessRecord,
};

/// Bump when adding tables or changing columns.
const SCHEMA_VERSION: u32 = 1;

/// Stored timestamp format; lexicographic order matches chronological.
const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[cfg(test)]
static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct SqliteStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteStore {
    /// Open (or create) the store at the configured path, defaulting to
    /// `~/.local/share/nvd-mirror/mirror.db`.
    pub fn open(config: &StoreConfig) -> Result<Self, UpdateError> {
        let path = match &config.path {
            Some(path) => PathBuf::from(path),
            None => {
                let dir = dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("nvd-mirror");
                std::fs::create_dir_all(&dir)?;
                dir.join("mirror.db")
            }
        };
        Self::open_at(path, config)
    }

    pub fn open_at(path: PathBuf, config: &StoreConfig) -> Result<Self, UpdateError> {
        let busy_timeout = config.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout={busy_timeout};
                 PRAGMA synchronous=NORMAL;"
            ))
        });

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .build(manager)?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.init_schema()?;
        store.check_schema_version()?;

        tracing::debug!(path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    /// Shared in-memory store for tests; each call gets its own database.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, UpdateError> {
        let db_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let uri = format!("file:mirrordb{db_id}?mode=memory&cache=shared");
        let manager = SqliteConnectionManager::file(&uri).with_init(|conn| {
            conn.execute_batch("PRAGMA busy_timeout=5000; PRAGMA synchronous=NORMAL;")
        });

        let pool = Pool::builder().max_size(5).build(manager)?;
        let store = Self {
            pool: Arc::new(pool),
        };
        store.init_schema()?;
        store.check_schema_version()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, UpdateError> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cpe (
                id TEXT PRIMARY KEY,
                stem TEXT NOT NULL,
                padded_version TEXT NOT NULL,
                deprecated INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cves (
                id TEXT PRIMARY KEY,
                last_modified TEXT,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cwe (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS capec (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS epss (
                cve_id TEXT PRIMARY KEY,
                epss REAL NOT NULL,
                percentile REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS info (
                collection TEXT PRIMARY KEY,
                last_modified TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS schema_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Refuse to touch a store written at a different schema version.
    /// Surfaced before any write.
    fn check_schema_version(&self) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM schema_info WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored.and_then(|v| v.parse::<u32>().ok()) {
            Some(found) if found != SCHEMA_VERSION => Err(UpdateError::SchemaVersion {
                found,
                supported: SCHEMA_VERSION,
            }),
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
        }
    }

    /// Look up a stored vulnerability by CVE id.
    pub fn vulnerability(&self, id: &str) -> Result<Option<VulnerabilityRecord>, UpdateError> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM cves WHERE id = ?", [id], |row| row.get(0))
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Look up a stored weakness by CWE id.
    pub fn weakness(&self, id: &str) -> Result<Option<WeaknessRecord>, UpdateError> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM cwe WHERE id = ?", [id], |row| row.get(0))
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Look up a stored attack pattern by CAPEC id.
    pub fn attack_pattern(&self, id: &str) -> Result<Option<AttackPatternRecord>, UpdateError> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM capec WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Look up the EPSS score for a CVE id.
    pub fn epss_score(&self, cve_id: &str) -> Result<Option<EpssScore>, UpdateError> {
        let conn = self.conn()?;
        let score = conn
            .query_row(
                "SELECT cve_id, epss, percentile FROM epss WHERE cve_id = ?",
                [cve_id],
                |row| {
                    Ok(EpssScore {
                        cve_id: row.get(0)?,
                        epss: row.get(1)?,
                        percentile: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(score)
    }

    fn format_stamp(stamp: NaiveDateTime) -> String {
        stamp.format(STAMP_FORMAT).to_string()
    }

    fn parse_stamp(value: &str) -> Option<NaiveDateTime> {
        crate::model::parse_nvd_datetime(value)
    }
}

impl ProductInventory for SqliteStore {
    fn find_products(&self, query: &ProductRangeQuery) -> Result<Vec<ProductRecord>, UpdateError> {
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT data FROM cpe WHERE deprecated = 0 AND stem = ?",
        );
        let mut params: Vec<&str> = vec![&query.stem];

        if let Some(bound) = &query.gt {
            sql.push_str(" AND padded_version > ?");
            params.push(bound);
        }
        if let Some(bound) = &query.gte {
            sql.push_str(" AND padded_version >= ?");
            params.push(bound);
        }
        if let Some(bound) = &query.lt {
            sql.push_str(" AND padded_version < ?");
            params.push(bound);
        }
        if let Some(bound) = &query.lte {
            sql.push_str(" AND padded_version <= ?");
            params.push(bound);
        }
        sql.push_str(" ORDER BY padded_version ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row.get::<_, String>(0)
        })?;

        let mut products = Vec::new();
        for row in rows {
            let data = row?;
            match serde_json::from_str::<ProductRecord>(&data) {
                Ok(record) => products.push(record),
                Err(err) => tracing::warn!(error = %err, "skipping undecodable cpe row"),
            }
        }
        Ok(products)
    }
}

impl MirrorStore for SqliteStore {
    fn collection_exists(&self, collection: Collection) -> Result<bool, UpdateError> {
        let conn = self.conn()?;
        let sql = match collection {
            Collection::Cpe => "SELECT EXISTS(SELECT 1 FROM cpe LIMIT 1)",
            Collection::Cve => "SELECT EXISTS(SELECT 1 FROM cves LIMIT 1)",
            Collection::Cwe => "SELECT EXISTS(SELECT 1 FROM cwe LIMIT 1)",
            Collection::Capec => "SELECT EXISTS(SELECT 1 FROM capec LIMIT 1)",
            Collection::Epss => "SELECT EXISTS(SELECT 1 FROM epss LIMIT 1)",
        };
        Ok(conn.query_row(sql, [], |row| row.get::<_, bool>(0))?)
    }

    fn latest_modified(
        &self,
        collection: Collection,
    ) -> Result<Option<NaiveDateTime>, UpdateError> {
        let sql = match collection {
            Collection::Cpe => "SELECT MAX(last_modified) FROM cpe",
            Collection::Cve => "SELECT MAX(last_modified) FROM cves",
            // Feed collections carry no per-record modification stamp.
            Collection::Cwe | Collection::Capec | Collection::Epss => return Ok(None),
        };
        let conn = self.conn()?;
        let stamp: Option<String> = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(stamp.as_deref().and_then(Self::parse_stamp))
    }

    fn upsert_products(&self, records: &[ProductRecord]) -> Result<usize, UpdateError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            let data = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR REPLACE INTO cpe
                 (id, stem, padded_version, deprecated, last_modified, data)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    record.stem,
                    record.padded_version,
                    record.deprecated,
                    record.last_modified.map(Self::format_stamp),
                    data
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn upsert_vulnerabilities(
        &self,
        records: &[VulnerabilityRecord],
    ) -> Result<usize, UpdateError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            let data = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR REPLACE INTO cves (id, last_modified, data) VALUES (?, ?, ?)",
                params![
                    record.id,
                    record.last_modified.map(Self::format_stamp),
                    data
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn upsert_weaknesses(&self, records: &[WeaknessRecord]) -> Result<usize, UpdateError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            let data = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR REPLACE INTO cwe (id, data) VALUES (?, ?)",
                params![record.id, data],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn upsert_attack_patterns(
        &self,
        records: &[AttackPatternRecord],
    ) -> Result<usize, UpdateError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            let data = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR REPLACE INTO capec (id, data) VALUES (?, ?)",
                params![record.id, data],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn upsert_epss(&self, records: &[EpssScore]) -> Result<usize, UpdateError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for record in records {
            tx.execute(
                "INSERT OR REPLACE INTO epss (cve_id, epss, percentile) VALUES (?, ?, ?)",
                params![record.cve_id, record.epss, record.percentile],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn drop_collection(&self, collection: Collection) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        let sql = match collection {
            Collection::Cpe => "DELETE FROM cpe",
            Collection::Cve => "DELETE FROM cves",
            Collection::Cwe => "DELETE FROM cwe",
            Collection::Capec => "DELETE FROM capec",
            Collection::Epss => "DELETE FROM epss",
        };
        conn.execute(sql, [])?;
        Ok(())
    }

    fn watermark(&self, collection: Collection) -> Result<Option<NaiveDateTime>, UpdateError> {
        let conn = self.conn()?;
        let stamp: Option<String> = conn
            .query_row(
                "SELECT last_modified FROM info WHERE collection = ?",
                [collection.name()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stamp.as_deref().and_then(Self::parse_stamp))
    }

    fn set_watermark(
        &self,
        collection: Collection,
        stamp: NaiveDateTime,
    ) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO info (collection, last_modified) VALUES (?, ?)",
            params![collection.name(), Self::format_stamp(stamp)],
        )?;
        Ok(())
    }

    fn clear_watermark(&self, collection: Collection) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM info WHERE collection = ?",
            [collection.name()],
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_cpe_stem_version ON cpe(stem, padded_version);
             CREATE INDEX IF NOT EXISTS idx_cpe_last_modified ON cpe(last_modified);
             CREATE INDEX IF NOT EXISTS idx_cves_last_modified ON cves(last_modified);",
        )?;
        Ok(())
    }

    fn update_schema_version(&self) -> Result<(), UpdateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
            [SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{padded_version, product_id, stem};
    use chrono::NaiveDate;

    fn product(cpe_name: &str, version: &str) -> ProductRecord {
        ProductRecord {
            id: product_id(cpe_name, version),
            cpe_name: cpe_name.to_string(),
            vendor: "vendor".to_string(),
            product: "product".to_string(),
            version: version.to_string(),
            padded_version: padded_version(version),
            stem: stem(cpe_name),
            ..Default::default()
        }
    }

    fn stamp(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let record = product("cpe:2.3:a:vendor:product:1.0:*:*:*:*:*:*:*", "1.0");

        assert_eq!(store.upsert_products(&[record.clone()]).unwrap(), 1);
        assert_eq!(store.upsert_products(&[record]).unwrap(), 1);

        let results = store
            .find_products(&ProductRangeQuery {
                stem: "cpe:2.3:a:vendor:product".to_string(),
                gte: Some(padded_version("1.0")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_range_query_half_open() {
        let store = SqliteStore::in_memory().unwrap();
        let records: Vec<ProductRecord> = ["0.9", "1.0", "1.5", "1.10", "2.0", "2.1"]
            .iter()
            .map(|v| {
                product(
                    &format!("cpe:2.3:a:vendor:product:{v}:*:*:*:*:*:*:*"),
                    v,
                )
            })
            .collect();
        store.upsert_products(&records).unwrap();

        // [1.0, 2.0): inclusive start, exclusive end.
        let results = store
            .find_products(&ProductRangeQuery {
                stem: "cpe:2.3:a:vendor:product".to_string(),
                gte: Some(padded_version("1.0")),
                lt: Some(padded_version("2.0")),
                ..Default::default()
            })
            .unwrap();

        let versions: Vec<&str> = results.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0", "1.5", "1.10"]);
    }

    #[test]
    fn test_range_query_excludes_deprecated() {
        let store = SqliteStore::in_memory().unwrap();
        let mut deprecated = product("cpe:2.3:a:vendor:product:1.2:*:*:*:*:*:*:*", "1.2");
        deprecated.deprecated = true;
        store.upsert_products(&[deprecated]).unwrap();

        let results = store
            .find_products(&ProductRangeQuery {
                stem: "cpe:2.3:a:vendor:product".to_string(),
                gte: Some(padded_version("1.0")),
                ..Default::default()
            })
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_results_sorted_by_padded_version() {
        let store = SqliteStore::in_memory().unwrap();
        let records: Vec<ProductRecord> = ["1.10", "1.2", "1.9"]
            .iter()
            .map(|v| {
                product(
                    &format!("cpe:2.3:a:vendor:product:{v}:*:*:*:*:*:*:*"),
                    v,
                )
            })
            .collect();
        store.upsert_products(&records).unwrap();

        let results = store
            .find_products(&ProductRangeQuery {
                stem: "cpe:2.3:a:vendor:product".to_string(),
                gte: Some(padded_version("1.0")),
                ..Default::default()
            })
            .unwrap();
        let versions: Vec<&str> = results.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.2", "1.9", "1.10"]);
    }

    #[test]
    fn test_collection_exists_after_write() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.collection_exists(Collection::Cpe).unwrap());

        let record = product("cpe:2.3:a:vendor:product:1.0:*:*:*:*:*:*:*", "1.0");
        store.upsert_products(&[record]).unwrap();
        assert!(store.collection_exists(Collection::Cpe).unwrap());

        store.drop_collection(Collection::Cpe).unwrap();
        assert!(!store.collection_exists(Collection::Cpe).unwrap());
    }

    #[test]
    fn test_watermark_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.watermark(Collection::Cve).unwrap().is_none());

        let first = stamp(2024, 3, 1);
        store.set_watermark(Collection::Cve, first).unwrap();
        assert_eq!(store.watermark(Collection::Cve).unwrap(), Some(first));

        let later = stamp(2024, 4, 1);
        store.set_watermark(Collection::Cve, later).unwrap();
        assert_eq!(store.watermark(Collection::Cve).unwrap(), Some(later));

        store.clear_watermark(Collection::Cve).unwrap();
        assert!(store.watermark(Collection::Cve).unwrap().is_none());
    }

    #[test]
    fn test_latest_modified_tracks_max() {
        let store = SqliteStore::in_memory().unwrap();
        let mut older = product("cpe:2.3:a:vendor:product:1.0:*:*:*:*:*:*:*", "1.0");
        older.last_modified = Some(stamp(2024, 1, 1));
        let mut newer = product("cpe:2.3:a:vendor:product:2.0:*:*:*:*:*:*:*", "2.0");
        newer.last_modified = Some(stamp(2024, 6, 1));
        store.upsert_products(&[older, newer]).unwrap();

        assert_eq!(
            store.latest_modified(Collection::Cpe).unwrap(),
            Some(stamp(2024, 6, 1))
        );
    }

    #[test]
    fn test_attack_pattern_upsert_and_read() {
        let store = SqliteStore::in_memory().unwrap();
        let record = AttackPatternRecord {
            id: "CAPEC-66".to_string(),
            name: "SQL Injection".to_string(),
            likelihood: "High".to_string(),
            related_weaknesses: vec!["CWE-89".to_string()],
            ..Default::default()
        };
        assert_eq!(store.upsert_attack_patterns(&[record]).unwrap(), 1);
        assert!(store.collection_exists(Collection::Capec).unwrap());

        let back = store.attack_pattern("CAPEC-66").unwrap().unwrap();
        assert_eq!(back.name, "SQL Injection");
        assert_eq!(back.related_weaknesses, vec!["CWE-89"]);
        assert!(store.attack_pattern("CAPEC-1").unwrap().is_none());
    }

    #[test]
    fn test_epss_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        let scores = vec![
            EpssScore {
                cve_id: "CVE-2024-0001".to_string(),
                epss: 0.42,
                percentile: 0.91,
            },
            EpssScore {
                cve_id: "CVE-2024-0002".to_string(),
                epss: 0.01,
                percentile: 0.12,
            },
        ];
        assert_eq!(store.upsert_epss(&scores).unwrap(), 2);
        assert!(store.collection_exists(Collection::Epss).unwrap());
    }

    #[test]
    fn test_indexes_and_schema_version() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_indexes().unwrap();
        store.update_schema_version().unwrap();
    }
}
