//! CVE and CPE record processing.
//!
//! [`CveProcessor`] turns one raw API vulnerability item into a
//! [`VulnerabilityRecord`], resolving configuration version ranges into
//! concrete products through the inventory store. [`CpeProcessor`] turns one
//! raw product item into a [`ProductRecord`] carrying the sort keys the
//! range resolution depends on.

use serde_json::Value;

use crate::error::UpdateError;
use crate::model::{
    parse_nvd_datetime, CvssV2, CvssV3, CvssV4, MetricBlock, ProductRecord,
    VulnerabilityRecord, UNKNOWN_CWE,
};
use crate::store::{ProductInventory, ProductRangeQuery};
use crate::version;

pub mod extract;

use extract::Step::{Index, Key};
use extract::{value_at, MissingKeyStats, Step};

/// Weakness identifiers in this namespace are placeholders, not real CWEs.
const CWE_PLACEHOLDER_PREFIX: &str = "NVD-CWE-";

/// Processor for raw CVE items. Holds the missing-field counters for the
/// whole run; flush them with [`CveProcessor::into_stats`] when done.
pub struct CveProcessor<'a> {
    inventory: &'a dyn ProductInventory,
    stats: MissingKeyStats,
}

impl<'a> CveProcessor<'a> {
    pub fn new(inventory: &'a dyn ProductInventory) -> Self {
        Self {
            inventory,
            stats: MissingKeyStats::new(),
        }
    }

    pub fn stats(&self) -> &MissingKeyStats {
        &self.stats
    }

    pub fn into_stats(self) -> MissingKeyStats {
        self.stats
    }

    /// Transform one raw upstream item into a canonical record.
    ///
    /// Returns `Ok(None)` only for a null item. Missing fields degrade to
    /// defaults and are counted; store errors during range resolution
    /// propagate.
    pub fn process_the_item(
        &mut self,
        item: &Value,
    ) -> Result<Option<VulnerabilityRecord>, UpdateError> {
        if item.is_null() {
            return Ok(None);
        }

        let mut record = VulnerabilityRecord {
            id: self.str_at(item, &[Key("cve"), Key("id")]).unwrap_or_default(),
            assigner: self
                .str_at(item, &[Key("cve"), Key("sourceIdentifier")])
                .unwrap_or_default(),
            status: self
                .str_at(item, &[Key("cve"), Key("vulnStatus")])
                .unwrap_or_default(),
            published: self
                .str_at(item, &[Key("cve"), Key("published")])
                .and_then(|s| parse_nvd_datetime(&s)),
            ..Default::default()
        };
        let modified = self
            .str_at(item, &[Key("cve"), Key("lastModified")])
            .and_then(|s| parse_nvd_datetime(&s));
        record.modified = modified;
        record.last_modified = modified;

        record.summary = english_descriptions(item);

        self.extract_metrics(item, &mut record);

        if let Some(references) = value_at(item, &[Key("cve"), Key("references")])
            .and_then(Value::as_array)
        {
            record.references = references
                .iter()
                .filter_map(|r| r.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
        }

        self.resolve_configurations(item, &mut record)?;

        record.cwe = weakness_identifiers(item);

        Ok(Some(record))
    }

    /// Build the inventory range query for one configuration criterion.
    ///
    /// Excluding bounds take precedence over including ones on the same
    /// end; a criterion without any modifier yields an unbounded query and
    /// no inventory lookup.
    pub fn get_cpe_info(cpe_match: &Value) -> ProductRangeQuery {
        let criteria = cpe_match
            .get("criteria")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let bound = |key: &str| {
            cpe_match
                .get(key)
                .and_then(Value::as_str)
                .map(version::padded_version)
        };

        let mut query = ProductRangeQuery {
            stem: version::stem(criteria),
            ..Default::default()
        };

        if let Some(start) = bound("versionStartExcluding") {
            query.gt = Some(start);
            if let Some(end) = bound("versionEndExcluding") {
                query.lt = Some(end);
            } else if let Some(end) = bound("versionEndIncluding") {
                query.lte = Some(end);
            }
        } else if let Some(start) = bound("versionStartIncluding") {
            query.gte = Some(start);
            if let Some(end) = bound("versionEndExcluding") {
                query.lt = Some(end);
            } else if let Some(end) = bound("versionEndIncluding") {
                query.lte = Some(end);
            }
        } else if let Some(end) = bound("versionEndExcluding") {
            query.lt = Some(end);
        } else if let Some(end) = bound("versionEndIncluding") {
            query.lte = Some(end);
        }

        query
    }

    fn extract_metrics(&mut self, item: &Value, record: &mut VulnerabilityRecord) {
        const VERSION_TAGS: [(&str, &str); 4] = [
            ("cvssMetricV40", "4.0"),
            ("cvssMetricV31", "3.1"),
            ("cvssMetricV30", "3.0"),
            ("cvssMetricV2", "2.0"),
        ];

        let Some(metrics) = value_at(item, &[Key("cve"), Key("metrics")]) else {
            return;
        };

        for (tag, version) in VERSION_TAGS {
            let Some(entries) = metrics.get(tag).and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let block = MetricBlock {
                    version: version.to_string(),
                    vector: entry
                        .get("cvssData")
                        .and_then(|d| d.get("vectorString"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    base_score: entry
                        .get("cvssData")
                        .and_then(|d| d.get("baseScore"))
                        .and_then(Value::as_f64)
                        .unwrap_or_default(),
                    metric_type: entry
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                };
                let source = entry
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                record.metrics_by_source.entry(source).or_default().push(block);
            }
        }

        record.cvss4 = self.extract_v4(metrics);
        record.cvss3 = self
            .extract_v3(metrics, "cvssMetricV31", "3.1")
            .or_else(|| self.extract_v3(metrics, "cvssMetricV30", "3.0"));
        record.cvss2 = self.extract_v2(metrics);
    }

    fn extract_v4(&mut self, metrics: &Value) -> Option<CvssV4> {
        let entry = &[Key("cvssMetricV40"), Index(0)];
        value_at(metrics, entry)?;
        Some(CvssV4 {
            base_score: self
                .f64_at(metrics, &with(entry, &[Key("cvssData"), Key("baseScore")]))
                .unwrap_or_default(),
            vector: self
                .str_at(metrics, &with(entry, &[Key("cvssData"), Key("vectorString")]))
                .unwrap_or_default(),
            source: self
                .str_at(metrics, &with(entry, &[Key("source")]))
                .unwrap_or_default(),
            metric_type: self
                .str_at(metrics, &with(entry, &[Key("type")]))
                .unwrap_or_default(),
        })
    }

    fn extract_v3(&mut self, metrics: &Value, tag: &'static str, version: &str) -> Option<CvssV3> {
        let entry = &[Key(tag), Index(0)];
        value_at(metrics, entry)?;
        let data = |field: &'static str| with(entry, &[Key("cvssData"), Key(field)]);
        Some(CvssV3 {
            version: version.to_string(),
            base_score: self.f64_at(metrics, &data("baseScore")).unwrap_or_default(),
            vector: self
                .str_at(metrics, &data("vectorString"))
                .unwrap_or_default(),
            attack_vector: self
                .str_at(metrics, &data("attackVector"))
                .unwrap_or_default(),
            attack_complexity: self
                .str_at(metrics, &data("attackComplexity"))
                .unwrap_or_default(),
            privileges_required: self
                .str_at(metrics, &data("privilegesRequired"))
                .unwrap_or_default(),
            user_interaction: self
                .str_at(metrics, &data("userInteraction"))
                .unwrap_or_default(),
            scope: self.str_at(metrics, &data("scope")).unwrap_or_default(),
            impact_confidentiality: self
                .str_at(metrics, &data("confidentialityImpact"))
                .unwrap_or_default(),
            impact_integrity: self
                .str_at(metrics, &data("integrityImpact"))
                .unwrap_or_default(),
            impact_availability: self
                .str_at(metrics, &data("availabilityImpact"))
                .unwrap_or_default(),
            exploitability_score: self
                .f64_at(metrics, &with(entry, &[Key("exploitabilityScore")])),
            impact_score: self.f64_at(metrics, &with(entry, &[Key("impactScore")])),
            source: self
                .str_at(metrics, &with(entry, &[Key("source")]))
                .unwrap_or_default(),
            metric_type: self
                .str_at(metrics, &with(entry, &[Key("type")]))
                .unwrap_or_default(),
        })
    }

    fn extract_v2(&mut self, metrics: &Value) -> Option<CvssV2> {
        let entry = &[Key("cvssMetricV2"), Index(0)];
        value_at(metrics, entry)?;
        let data = |field: &'static str| with(entry, &[Key("cvssData"), Key(field)]);
        Some(CvssV2 {
            base_score: self.f64_at(metrics, &data("baseScore")).unwrap_or_default(),
            vector: self
                .str_at(metrics, &data("vectorString"))
                .unwrap_or_default(),
            access_vector: self
                .str_at(metrics, &data("accessVector"))
                .unwrap_or_default(),
            access_complexity: self
                .str_at(metrics, &data("accessComplexity"))
                .unwrap_or_default(),
            authentication: self
                .str_at(metrics, &data("authentication"))
                .unwrap_or_default(),
            impact_confidentiality: self
                .str_at(metrics, &data("confidentialityImpact"))
                .unwrap_or_default(),
            impact_integrity: self
                .str_at(metrics, &data("integrityImpact"))
                .unwrap_or_default(),
            impact_availability: self
                .str_at(metrics, &data("availabilityImpact"))
                .unwrap_or_default(),
            exploitability_score: self
                .f64_at(metrics, &with(entry, &[Key("exploitabilityScore")])),
            impact_score: self.f64_at(metrics, &with(entry, &[Key("impactScore")])),
            source: self
                .str_at(metrics, &with(entry, &[Key("source")]))
                .unwrap_or_default(),
            metric_type: self
                .str_at(metrics, &with(entry, &[Key("type")]))
                .unwrap_or_default(),
        })
    }

    /// Walk every configuration node and resolve each CPE criterion into
    /// the derived product/configuration sets.
    fn resolve_configurations(
        &mut self,
        item: &Value,
        record: &mut VulnerabilityRecord,
    ) -> Result<(), UpdateError> {
        let Some(configurations) =
            value_at(item, &[Key("cve"), Key("configurations")]).and_then(Value::as_array)
        else {
            return Ok(());
        };

        for configuration in configurations {
            let Some(nodes) = configuration.get("nodes").and_then(Value::as_array) else {
                continue;
            };
            for node in nodes {
                let Some(matches) = node.get("cpeMatch").and_then(Value::as_array) else {
                    continue;
                };
                for cpe_match in matches {
                    let Some(criteria) = cpe_match.get("criteria").and_then(Value::as_str)
                    else {
                        continue;
                    };
                    let vulnerable = cpe_match
                        .get("vulnerable")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);

                    if !vulnerable {
                        Self::add_configuration(record, criteria);
                        continue;
                    }

                    let query = Self::get_cpe_info(cpe_match);
                    if query.is_bounded() {
                        for product in self.inventory.find_products(&query)? {
                            Self::add_matched_product(record, &product);
                        }
                    } else {
                        Self::add_raw_criterion(record, criteria);
                    }
                }
            }
        }

        Ok(())
    }

    fn add_matched_product(record: &mut VulnerabilityRecord, product: &ProductRecord) {
        let add = VulnerabilityRecord::add_if_missing;
        add(&mut record.vulnerable_product, product.cpe_name.clone());
        add(&mut record.vulnerable_configuration, product.cpe_name.clone());
        add(
            &mut record.vulnerable_configuration_stems,
            product.stem.clone(),
        );
        add(&mut record.vendors, product.vendor.clone());
        add(&mut record.products, product.product.clone());
        add(&mut record.vulnerable_product_stems, product.stem.clone());
    }

    fn add_raw_criterion(record: &mut VulnerabilityRecord, criteria: &str) {
        let add = VulnerabilityRecord::add_if_missing;
        let stem = version::stem(criteria);
        let (vendor, product) = version::vendor_product(criteria);
        add(&mut record.vulnerable_product, criteria.to_string());
        add(&mut record.vulnerable_configuration, criteria.to_string());
        add(&mut record.vulnerable_configuration_stems, stem.clone());
        add(&mut record.vendors, vendor);
        add(&mut record.products, product);
        add(&mut record.vulnerable_product_stems, stem);
    }

    fn add_configuration(record: &mut VulnerabilityRecord, criteria: &str) {
        let add = VulnerabilityRecord::add_if_missing;
        add(&mut record.vulnerable_configuration, criteria.to_string());
        add(
            &mut record.vulnerable_configuration_stems,
            version::stem(criteria),
        );
    }

    fn str_at(&mut self, root: &Value, steps: &[Step<'_>]) -> Option<String> {
        self.stats
            .lookup(root, steps)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn f64_at(&mut self, root: &Value, steps: &[Step<'_>]) -> Option<f64> {
        self.stats.lookup(root, steps).and_then(Value::as_f64)
    }
}

/// Concatenate a base path with a relative tail.
fn with<'a>(base: &[Step<'a>], tail: &[Step<'a>]) -> Vec<Step<'a>> {
    let mut steps = Vec::with_capacity(base.len() + tail.len());
    steps.extend_from_slice(base);
    steps.extend_from_slice(tail);
    steps
}

/// Join the English description texts of an item.
fn english_descriptions(item: &Value) -> String {
    let Some(descriptions) =
        value_at(item, &[Key("cve"), Key("descriptions")]).and_then(Value::as_array)
    else {
        return String::new();
    };

    let mut summary = String::new();
    for description in descriptions {
        if description.get("lang").and_then(Value::as_str) != Some("en") {
            continue;
        }
        let Some(text) = description.get("value").and_then(Value::as_str) else {
            continue;
        };
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(text);
    }
    summary
}

/// Collect English weakness identifiers across all entries.
/// Placeholder-namespace values are always dropped; an empty result falls
/// back to the `Unknown` sentinel, so a placeholder-only record ends up
/// with `["Unknown"]` rather than the placeholder itself.
fn weakness_identifiers(item: &Value) -> Vec<String> {
    let mut identifiers: Vec<String> = Vec::new();

    if let Some(weaknesses) =
        value_at(item, &[Key("cve"), Key("weaknesses")]).and_then(Value::as_array)
    {
        for weakness in weaknesses {
            let Some(descriptions) = weakness.get("description").and_then(Value::as_array)
            else {
                continue;
            };
            for description in descriptions {
                if description.get("lang").and_then(Value::as_str) != Some("en") {
                    continue;
                }
                if let Some(value) = description.get("value").and_then(Value::as_str) {
                    VulnerabilityRecord::add_if_missing(&mut identifiers, value.to_string());
                }
            }
        }
    }

    identifiers.retain(|id| !id.starts_with(CWE_PLACEHOLDER_PREFIX));
    if identifiers.is_empty() {
        identifiers.push(UNKNOWN_CWE.to_string());
    }
    identifiers
}

/// Processor for raw CPE items.
pub struct CpeProcessor {
    filter_deprecated: bool,
}

impl CpeProcessor {
    pub fn new(filter_deprecated: bool) -> Self {
        Self { filter_deprecated }
    }

    /// Transform one raw product item into a canonical record. Returns
    /// `None` for null items, records without a CPE name, and deprecated
    /// records when deprecated filtering is on.
    pub fn process_the_item(&self, item: &Value) -> Option<ProductRecord> {
        if item.is_null() {
            return None;
        }
        let item = item.get("cpe")?;

        let deprecated = item
            .get("deprecated")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if self.filter_deprecated && deprecated {
            return None;
        }

        let cpe_name = item.get("cpeName").and_then(Value::as_str)?.to_string();

        let title = item
            .get("titles")
            .and_then(Value::as_array)
            .and_then(|titles| {
                titles
                    .iter()
                    .find(|t| t.get("lang").and_then(Value::as_str) == Some("en"))
            })
            .and_then(|t| t.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let version_field = cpe_name
            .split(':')
            .nth(5)
            .unwrap_or_default()
            .to_string();
        let version_string = version::parse_cpe_version(&cpe_name);
        let (vendor, product) = version::vendor_product(&cpe_name);

        let deprecated_by = if deprecated {
            item.get("deprecatedBy")
                .and_then(Value::as_array)
                .and_then(|d| d.first())
                .and_then(|d| d.get("cpeName"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            String::new()
        };

        Some(ProductRecord {
            id: version::product_id(&cpe_name, &version_field),
            title,
            vendor,
            product,
            padded_version: version::padded_version(&version_string),
            version: version_string,
            stem: version::stem(&cpe_name),
            created: item
                .get("created")
                .and_then(Value::as_str)
                .and_then(parse_nvd_datetime),
            last_modified: item
                .get("lastModified")
                .and_then(Value::as_str)
                .and_then(parse_nvd_datetime),
            deprecated,
            deprecated_by,
            cpe_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// In-memory inventory for correlation tests.
    struct FakeInventory {
        products: Vec<ProductRecord>,
    }

    impl FakeInventory {
        fn with_versions(stem: &str, versions: &[&str]) -> Self {
            let products = versions
                .iter()
                .map(|v| {
                    let cpe_name = format!("{stem}:{v}:*:*:*:*:*:*:*");
                    ProductRecord {
                        id: version::product_id(&cpe_name, v),
                        vendor: version::vendor_product(&cpe_name).0,
                        product: version::vendor_product(&cpe_name).1,
                        version: (*v).to_string(),
                        padded_version: version::padded_version(v),
                        stem: stem.to_string(),
                        cpe_name,
                        ..Default::default()
                    }
                })
                .collect();
            Self { products }
        }
    }

    impl ProductInventory for FakeInventory {
        fn find_products(
            &self,
            query: &ProductRangeQuery,
        ) -> Result<Vec<ProductRecord>, UpdateError> {
            let mut matched: Vec<ProductRecord> = self
                .products
                .iter()
                .filter(|p| p.stem == query.stem)
                .filter(|p| {
                    let v = p.padded_version.as_str();
                    query.gt.as_deref().map_or(true, |b| v > b)
                        && query.gte.as_deref().map_or(true, |b| v >= b)
                        && query.lt.as_deref().map_or(true, |b| v < b)
                        && query.lte.as_deref().map_or(true, |b| v <= b)
                })
                .cloned()
                .collect();
            matched.sort_by(|a, b| a.padded_version.cmp(&b.padded_version));
            Ok(matched)
        }
    }

    fn cve_item(cve_body: Value) -> Value {
        json!({ "cve": cve_body })
    }

    fn minimal_cve() -> Value {
        cve_item(json!({
            "id": "CVE-2024-0001",
            "sourceIdentifier": "cve@mitre.org",
            "vulnStatus": "Analyzed",
            "published": "2024-01-10T12:00:00.000",
            "lastModified": "2024-01-15T10:30:00.000",
            "descriptions": [
                {"lang": "en", "value": "A flaw."},
                {"lang": "es", "value": "Un fallo."}
            ]
        }))
    }

    #[test]
    fn test_null_item_skipped() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:v:p", &[]);
        let mut processor = CveProcessor::new(&inventory);
        assert!(processor
            .process_the_item(&Value::Null)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_basic_fields_and_summary() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:v:p", &[]);
        let mut processor = CveProcessor::new(&inventory);
        let record = processor
            .process_the_item(&minimal_cve())
            .unwrap()
            .unwrap();
        assert_eq!(record.id, "CVE-2024-0001");
        assert_eq!(record.assigner, "cve@mitre.org");
        assert_eq!(record.status, "Analyzed");
        assert_eq!(record.summary, "A flaw.");
        assert_eq!(record.modified, record.last_modified);
        assert_eq!(record.cwe, vec![UNKNOWN_CWE]);
    }

    #[test]
    fn test_missing_fields_degrade_and_count() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:v:p", &[]);
        let mut processor = CveProcessor::new(&inventory);
        let record = processor
            .process_the_item(&cve_item(json!({"id": "CVE-2024-0002"})))
            .unwrap()
            .unwrap();
        assert_eq!(record.id, "CVE-2024-0002");
        assert_eq!(record.assigner, "");
        assert!(record.summary.is_empty());
        assert!(processor.stats().total_misses() > 0);
    }

    #[test]
    fn test_metrics_primary_blocks_and_source_map() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:v:p", &[]);
        let mut processor = CveProcessor::new(&inventory);
        let item = cve_item(json!({
            "id": "CVE-2024-0003",
            "metrics": {
                "cvssMetricV31": [{
                    "source": "nvd@nist.gov",
                    "type": "Primary",
                    "cvssData": {
                        "baseScore": 9.8,
                        "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H",
                        "attackVector": "NETWORK",
                        "attackComplexity": "LOW",
                        "privilegesRequired": "NONE",
                        "userInteraction": "NONE",
                        "scope": "UNCHANGED",
                        "confidentialityImpact": "HIGH",
                        "integrityImpact": "HIGH",
                        "availabilityImpact": "HIGH"
                    },
                    "exploitabilityScore": 3.9,
                    "impactScore": 5.9
                }, {
                    "source": "security@vendor.example",
                    "type": "Secondary",
                    "cvssData": {"baseScore": 8.8, "vectorString": "CVSS:3.1/..."}
                }],
                "cvssMetricV2": [{
                    "source": "nvd@nist.gov",
                    "type": "Primary",
                    "cvssData": {
                        "baseScore": 7.5,
                        "vectorString": "AV:N/AC:L/Au:N/C:P/I:P/A:P",
                        "accessVector": "NETWORK",
                        "accessComplexity": "LOW",
                        "authentication": "NONE",
                        "confidentialityImpact": "PARTIAL",
                        "integrityImpact": "PARTIAL",
                        "availabilityImpact": "PARTIAL"
                    },
                    "exploitabilityScore": 10.0,
                    "impactScore": 6.4
                }]
            }
        }));

        let record = processor.process_the_item(&item).unwrap().unwrap();

        let v3 = record.cvss3.unwrap();
        assert_eq!(v3.version, "3.1");
        assert_eq!(v3.base_score, 9.8);
        assert_eq!(v3.attack_vector, "NETWORK");
        assert_eq!(v3.scope, "UNCHANGED");
        assert_eq!(v3.exploitability_score, Some(3.9));
        assert_eq!(v3.metric_type, "Primary");

        let v2 = record.cvss2.unwrap();
        assert_eq!(v2.base_score, 7.5);
        assert_eq!(v2.authentication, "NONE");

        assert!(record.cvss4.is_none());
        assert_eq!(record.metrics_by_source.len(), 2);
        assert_eq!(record.metrics_by_source["nvd@nist.gov"].len(), 2);
        assert_eq!(
            record.metrics_by_source["security@vendor.example"][0].base_score,
            8.8
        );
    }

    #[test]
    fn test_v30_used_when_v31_absent() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:v:p", &[]);
        let mut processor = CveProcessor::new(&inventory);
        let item = cve_item(json!({
            "id": "CVE-2017-0001",
            "metrics": {
                "cvssMetricV30": [{
                    "source": "nvd@nist.gov",
                    "type": "Primary",
                    "cvssData": {"baseScore": 5.3, "vectorString": "CVSS:3.0/..."}
                }]
            }
        }));
        let record = processor.process_the_item(&item).unwrap().unwrap();
        assert_eq!(record.cvss3.unwrap().version, "3.0");
    }

    #[test]
    fn test_range_query_precedence() {
        let q = CveProcessor::get_cpe_info(&json!({
            "criteria": "cpe:2.3:a:v:p:*:*:*:*:*:*:*:*",
            "versionStartExcluding": "1.0",
            "versionEndIncluding": "2.0"
        }));
        assert_eq!(q.gt.as_deref(), Some("00001.00000"));
        assert_eq!(q.lte.as_deref(), Some("00002.00000"));
        assert!(q.gte.is_none() && q.lt.is_none());
        assert_eq!(q.stem, "cpe:2.3:a:v:p");

        let q = CveProcessor::get_cpe_info(&json!({
            "criteria": "cpe:2.3:a:v:p:*:*:*:*:*:*:*:*",
            "versionStartIncluding": "1.0",
            "versionEndExcluding": "2.0"
        }));
        assert_eq!(q.gte.as_deref(), Some("00001.00000"));
        assert_eq!(q.lt.as_deref(), Some("00002.00000"));

        let q = CveProcessor::get_cpe_info(&json!({
            "criteria": "cpe:2.3:a:v:p:*:*:*:*:*:*:*:*",
            "versionEndIncluding": "3.1"
        }));
        assert_eq!(q.lte.as_deref(), Some("00003.00001"));
        assert!(q.gt.is_none() && q.gte.is_none() && q.lt.is_none());

        let q = CveProcessor::get_cpe_info(&json!({
            "criteria": "cpe:2.3:a:v:p:*:*:*:*:*:*:*:*"
        }));
        assert!(!q.is_bounded());
    }

    #[test]
    fn test_range_resolution_half_open() {
        let inventory = FakeInventory::with_versions(
            "cpe:2.3:a:acme:widget",
            &["0.9", "1.0", "1.5", "1.10", "2.0", "2.1"],
        );
        let mut processor = CveProcessor::new(&inventory);
        let mut item = minimal_cve();
        item["cve"]["configurations"] = json!([{
            "nodes": [{
                "operator": "OR",
                "cpeMatch": [{
                    "vulnerable": true,
                    "criteria": "cpe:2.3:a:acme:widget:*:*:*:*:*:*:*:*",
                    "versionStartIncluding": "1.0",
                    "versionEndExcluding": "2.0"
                }]
            }]
        }]);

        let record = processor.process_the_item(&item).unwrap().unwrap();
        let versions: Vec<&str> = record
            .vulnerable_product
            .iter()
            .map(|c| c.split(':').nth(5).unwrap())
            .collect();
        assert_eq!(versions, vec!["1.0", "1.5", "1.10"]);
        assert_eq!(record.vendors, vec!["acme"]);
        assert_eq!(record.products, vec!["widget"]);
        assert_eq!(
            record.vulnerable_product_stems,
            vec!["cpe:2.3:a:acme:widget"]
        );
    }

    #[test]
    fn test_unbounded_criterion_added_raw() {
        let inventory = FakeInventory::with_versions("cpe:2.3:a:acme:widget", &["1.0"]);
        let mut processor = CveProcessor::new(&inventory);
        let mut item = minimal_cve();
        item["cve"]["configurations"] = json!([{
            "nodes": [{
                "cpeMatch": [{
                    "vulnerable": true,
                    "criteria": "cpe:2.3:a:acme:widget:3.0:*:*:*:*:*:*:*"
                }]
            }]
        }]);

        let record = processor.process_the_item(&item).unwrap().unwrap();
        assert_eq!(
            record.vulnerable_product,
            vec!["cpe:2.3:a:acme:widget:3.0:*:*:*:*:*:*:*"]
        );
        assert_eq!(record.vendors, vec!["acme"]);
    }

    #[test]
    fn test_non_vulnerable_criterion_configuration_only() {
        let inventory = FakeInventory::with_versions("cpe:2.3:o:acme:os", &[]);
        let mut processor = CveProcessor::new(&inventory);
        let mut item = minimal_cve();
        item["cve"]["configurations"] = json!([{
            "nodes": [{
                "cpeMatch": [{
                    "vulnerable": false,
                    "criteria": "cpe:2.3:o:acme:os:1.0:*:*:*:*:*:*:*"
                }]
            }]
        }]);

        let record = processor.process_the_item(&item).unwrap().unwrap();
        assert!(record.vulnerable_product.is_empty());
        assert!(record.vendors.is_empty());
        assert_eq!(
            record.vulnerable_configuration,
            vec!["cpe:2.3:o:acme:os:1.0:*:*:*:*:*:*:*"]
        );
        assert_eq!(
            record.vulnerable_configuration_stems,
            vec!["cpe:2.3:o:acme:os"]
        );
    }

    #[test]
    fn test_weakness_placeholder_only_falls_back() {
        let mut item = minimal_cve();
        item["cve"]["weaknesses"] = json!([{
            "description": [{"lang": "en", "value": "NVD-CWE-noinfo"}]
        }]);
        assert_eq!(weakness_identifiers(&item), vec![UNKNOWN_CWE]);
    }

    #[test]
    fn test_weakness_placeholder_dropped_when_real_present() {
        let mut item = minimal_cve();
        item["cve"]["weaknesses"] = json!([
            {"description": [{"lang": "en", "value": "NVD-CWE-noinfo"}]},
            {"description": [{"lang": "en", "value": "CWE-79"}]}
        ]);
        assert_eq!(weakness_identifiers(&item), vec!["CWE-79"]);
    }

    #[test]
    fn test_weakness_non_english_ignored() {
        let mut item = minimal_cve();
        item["cve"]["weaknesses"] = json!([{
            "description": [{"lang": "fr", "value": "CWE-89"}]
        }]);
        assert_eq!(weakness_identifiers(&item), vec![UNKNOWN_CWE]);
    }

    fn cpe_item(body: Value) -> Value {
        json!({ "cpe": body })
    }

    #[test]
    fn test_cpe_item_processed() {
        let processor = CpeProcessor::new(true);
        let record = processor
            .process_the_item(&cpe_item(json!({
                "cpeName": "cpe:2.3:a:openbsd:openssh:7.4:p1:*:*:*:*:*:*",
                "cpeNameId": "87316812-5F2C-4286-94FE-CC98B9EAEF53",
                "deprecated": false,
                "created": "2017-01-01T00:00:00.000",
                "lastModified": "2024-01-15T10:30:00.000",
                "titles": [
                    {"lang": "ja", "title": "OpenSSH 7.4"},
                    {"lang": "en", "title": "OpenBSD OpenSSH 7.4 p1"}
                ]
            })))
            .unwrap();

        assert_eq!(record.vendor, "openbsd");
        assert_eq!(record.product, "openssh");
        assert_eq!(record.version, "7.4.p1");
        assert_eq!(record.stem, "cpe:2.3:a:openbsd:openssh");
        assert_eq!(record.title.as_deref(), Some("OpenBSD OpenSSH 7.4 p1"));
        assert_eq!(record.id.len(), 64);
        assert!(!record.deprecated);
        assert_eq!(
            record.padded_version,
            version::padded_version("7.4.p1")
        );
    }

    #[test]
    fn test_cpe_deprecated_filtered() {
        let deprecated = cpe_item(json!({
            "cpeName": "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*",
            "deprecated": true,
            "deprecatedBy": [{"cpeName": "cpe:2.3:a:acme:gadget:1.0:*:*:*:*:*:*:*"}]
        }));

        assert!(CpeProcessor::new(true).process_the_item(&deprecated).is_none());

        let kept = CpeProcessor::new(false)
            .process_the_item(&deprecated)
            .unwrap();
        assert!(kept.deprecated);
        assert_eq!(
            kept.deprecated_by,
            "cpe:2.3:a:acme:gadget:1.0:*:*:*:*:*:*:*"
        );
    }

    #[test]
    fn test_cpe_missing_name_skipped() {
        assert!(CpeProcessor::new(true)
            .process_the_item(&cpe_item(json!({"deprecated": false})))
            .is_none());
    }

    #[test]
    fn test_stable_id_across_runs() {
        let processor = CpeProcessor::new(true);
        let item = cpe_item(json!({
            "cpeName": "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*",
            "deprecated": false
        }));
        let a = processor.process_the_item(&item).unwrap();
        let b = processor.process_the_item(&item).unwrap();
        assert_eq!(a.id, b.id);
    }
}
