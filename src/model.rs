//! Canonical records written into the mirror store.
//!
//! Upstream payloads are heterogeneous JSON/XML/CSV; everything is
//! normalized into the explicit typed records below before hitting the
//! bulk write path. Records are replaced wholesale on update, never
//! patched field by field.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Sentinel weakness identifier used when a CVE carries no usable CWE.
pub const UNKNOWN_CWE: &str = "Unknown";

/// Canonical CVE record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VulnerabilityRecord {
    /// Stable unique identifier (`CVE-YYYY-NNNN`).
    pub id: String,
    /// Reporting organization (`sourceIdentifier` upstream).
    pub assigner: String,
    /// NVD vulnerability status (`Analyzed`, `Modified`, `Rejected`, ...).
    pub status: String,
    pub published: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    /// Concatenated English description text.
    pub summary: String,
    /// Primary CVSS v2 block, when present.
    pub cvss2: Option<CvssV2>,
    /// Primary CVSS v3.x block (v3.1 preferred over v3.0).
    pub cvss3: Option<CvssV3>,
    /// Primary CVSS v4.0 block, when present.
    pub cvss4: Option<CvssV4>,
    /// Every metric block, grouped by reporting source organization.
    pub metrics_by_source: BTreeMap<String, Vec<MetricBlock>>,
    /// Reference URLs.
    pub references: Vec<String>,
    /// Weakness identifiers; `["Unknown"]` when nothing usable remains.
    pub cwe: Vec<String>,
    // Derived sets: deduplicated, insertion order preserved.
    pub vulnerable_product: Vec<String>,
    pub vulnerable_configuration: Vec<String>,
    pub vulnerable_product_stems: Vec<String>,
    pub vulnerable_configuration_stems: Vec<String>,
    pub vendors: Vec<String>,
    pub products: Vec<String>,
}

impl VulnerabilityRecord {
    /// Append `value` to the named derived set unless already present.
    /// Membership is tested before append so insertion order is preserved.
    pub fn add_if_missing(list: &mut Vec<String>, value: String) {
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

/// One raw metric block as reported by a single source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBlock {
    /// Metric version tag: `2.0`, `3.0`, `3.1` or `4.0`.
    pub version: String,
    pub vector: String,
    pub base_score: f64,
    /// `Primary` or `Secondary`.
    pub metric_type: String,
}

/// CVSS v2 scoring block with its access/impact sub-scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvssV2 {
    pub base_score: f64,
    pub vector: String,
    pub access_vector: String,
    pub access_complexity: String,
    pub authentication: String,
    pub impact_confidentiality: String,
    pub impact_integrity: String,
    pub impact_availability: String,
    pub exploitability_score: Option<f64>,
    pub impact_score: Option<f64>,
    pub source: String,
    pub metric_type: String,
}

/// CVSS v3.0 / v3.1 scoring block with exploitability/impact groupings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvssV3 {
    /// `3.0` or `3.1`.
    pub version: String,
    pub base_score: f64,
    pub vector: String,
    pub attack_vector: String,
    pub attack_complexity: String,
    pub privileges_required: String,
    pub user_interaction: String,
    pub scope: String,
    pub impact_confidentiality: String,
    pub impact_integrity: String,
    pub impact_availability: String,
    pub exploitability_score: Option<f64>,
    pub impact_score: Option<f64>,
    pub source: String,
    pub metric_type: String,
}

/// CVSS v4.0 scoring block. NVD does not publish separate impact and
/// exploitability sub-scores for v4, only the vector and base score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvssV4 {
    pub base_score: f64,
    pub vector: String,
    pub source: String,
    pub metric_type: String,
}

/// Canonical CPE product record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProductRecord {
    /// Content hash of the CPE name plus its version field; recomputable
    /// from the upstream record, so upserts are idempotent.
    pub id: String,
    pub title: Option<String>,
    pub cpe_name: String,
    pub vendor: String,
    pub product: String,
    pub version: String,
    pub padded_version: String,
    pub stem: String,
    pub created: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    pub deprecated: bool,
    /// CPE name that supersedes this one, when deprecated.
    pub deprecated_by: String,
}

/// Canonical CWE weakness record from the MITRE XML feed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeaknessRecord {
    /// `CWE-NNN`.
    pub id: String,
    pub name: String,
    pub status: String,
    pub description: String,
    pub related_weaknesses: Vec<String>,
}

/// Canonical CAPEC attack-pattern record from the MITRE XML feed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttackPatternRecord {
    /// `CAPEC-NNN`.
    pub id: String,
    pub name: String,
    /// Likelihood of attack (`High`, `Medium`, `Low`).
    pub likelihood: String,
    pub typical_severity: String,
    pub summary: String,
    pub prerequisites: Vec<String>,
    /// Mitigation texts.
    pub solutions: Vec<String>,
    /// CWE identifiers this pattern exploits.
    pub related_weaknesses: Vec<String>,
    pub related_capecs: Vec<String>,
}

/// EPSS exploit-probability score for one CVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpssScore {
    pub cve_id: String,
    pub epss: f64,
    pub percentile: f64,
}

/// Parse the timestamp formats the NVD API emits, dropping any timezone.
pub fn parse_nvd_datetime(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.3f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];

    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc())
}
