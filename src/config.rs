//! Configuration for the mirror.
//!
//! One explicit [`Config`] struct constructed at startup and passed by
//! reference into each component. Loadable from a TOML file with every
//! field optional; the NVD API key can also come from the
//! `NVD_NIST_API_KEY` environment variable.

use std::path::Path;

use serde::Deserialize;

/// Published NVD quota window is 30 seconds; 6 extra seconds of safety
/// margin per the NVD best-practice announcement.
pub const RATE_WINDOW_SECS: u64 = 36;

/// The API rejects modification windows wider than 120 days.
pub const MAX_DATE_RANGE_DAYS: i64 = 120;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub download: DownloadConfig,
    pub store: StoreConfig,
    pub sources: SourcesConfig,
}

/// NVD API access settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the NVD service.
    pub base_url: String,
    /// Optional API key; unlocks the elevated rate limit.
    pub api_key: Option<String>,
    /// Skip rejected CVE records upstream (`noRejected`).
    pub no_rejected: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://services.nvd.nist.gov".to_string(),
            api_key: None,
            no_rejected: false,
        }
    }
}

/// Concurrency and backoff tuning for page downloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Pages grouped per batch. `None` picks 45 with an API key, 5 without.
    pub batch_range: Option<usize>,
    /// Semaphore divisor: permits = ceil(30 / sem_factor). `None` picks
    /// 0.6 with an API key, 6.0 without.
    pub sem_factor: Option<f64>,
    /// Post-fetch jitter bounds in seconds.
    pub sleep_min_secs: f64,
    pub sleep_max_secs: f64,
    /// Maximum retry attempts for a malformed page payload.
    pub max_retries: u32,
    /// Base delay for exponential backoff, doubled per attempt.
    pub backoff_base_secs: f64,
    /// Override for the incremental window, in days. Capped at 120.
    pub max_days_back: Option<i64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            batch_range: None,
            sem_factor: None,
            sleep_min_secs: 0.5,
            sleep_max_secs: 2.5,
            max_retries: 10,
            backoff_base_secs: 0.6,
            max_days_back: None,
        }
    }
}

/// SQLite store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. `None` resolves to `~/.local/share/nvd-mirror/mirror.db`.
    pub path: Option<String>,
    pub max_pool_size: u32,
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_pool_size: 10,
            busy_timeout_ms: 5000,
        }
    }
}

/// Bulk feed locations and filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub cwe_url: String,
    pub capec_url: String,
    pub epss_url: String,
    /// Drop deprecated CPE entries instead of storing them.
    pub cpe_filter_deprecated: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            cwe_url: "https://cwe.mitre.org/data/xml/cwec_latest.xml.zip".to_string(),
            capec_url: "https://capec.mitre.org/data/xml/capec_latest.xml".to_string(),
            epss_url: "https://epss.empiricalsecurity.com/epss_scores-current.csv.gz".to_string(),
            cpe_filter_deprecated: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// anything the file does not set.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if self.api.api_key.is_none() {
            if let Ok(key) = std::env::var("NVD_NIST_API_KEY") {
                if !key.is_empty() {
                    self.api.api_key = Some(key);
                }
            }
        }
    }

    /// Pages grouped per batch: elevated access allows a larger group.
    pub fn batch_range(&self) -> usize {
        self.download
            .batch_range
            .unwrap_or(if self.api.api_key.is_some() { 45 } else { 5 })
    }

    /// Concurrency permits per batch: ceil(30 / sem_factor).
    pub fn semaphore_permits(&self) -> usize {
        let factor = self
            .download
            .sem_factor
            .unwrap_or(if self.api.api_key.is_some() { 0.6 } else { 6.0 });
        (30.0 / factor).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "https://services.nvd.nist.gov");
        assert!(config.api.api_key.is_none());
        assert_eq!(config.download.max_retries, 10);
        assert!(config.sources.cpe_filter_deprecated);
    }

    #[test]
    fn test_batch_range_depends_on_api_key() {
        let mut config = Config::default();
        assert_eq!(config.batch_range(), 5);

        config.api.api_key = Some("key".to_string());
        assert_eq!(config.batch_range(), 45);

        config.download.batch_range = Some(12);
        assert_eq!(config.batch_range(), 12);
    }

    #[test]
    fn test_semaphore_permits() {
        let mut config = Config::default();
        // Unkeyed: ceil(30 / 6) = 5 permits.
        assert_eq!(config.semaphore_permits(), 5);

        config.api.api_key = Some("key".to_string());
        // Keyed: ceil(30 / 0.6) = 50 permits.
        assert_eq!(config.semaphore_permits(), 50);

        config.download.sem_factor = Some(3.0);
        assert_eq!(config.semaphore_permits(), 10);
    }

    #[test]
    #[serial_test::serial]
    fn test_api_key_from_environment() {
        std::env::set_var("NVD_NIST_API_KEY", "env-key");
        let config = Config::from_env();
        assert_eq!(config.api.api_key.as_deref(), Some("env-key"));

        // An explicit key wins over the environment.
        let mut explicit = Config::default();
        explicit.api.api_key = Some("file-key".to_string());
        explicit.apply_env();
        assert_eq!(explicit.api.api_key.as_deref(), Some("file-key"));
        std::env::remove_var("NVD_NIST_API_KEY");
    }

    #[test]
    fn test_partial_toml() {
        let parsed: Config = toml::from_str(
            r#"
            [api]
            no_rejected = true

            [download]
            max_retries = 3
            "#,
        )
        .unwrap();

        assert!(parsed.api.no_rejected);
        assert_eq!(parsed.download.max_retries, 3);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.store.max_pool_size, 10);
        assert!(parsed.sources.cwe_url.contains("cwe.mitre.org"));
    }
}
