//! Version-string normalization for CPE matching.
//!
//! NVD publishes free-form vendor version strings, not semver. To support
//! range queries directly against the store, every version is converted into
//! a fixed-width key whose lexicographic order matches intuitive version
//! order: `padded_version("1.2") < padded_version("1.10")`.

use sha2::{Digest, Sha256};

/// Width every padded segment is normalized to.
const SEGMENT_WIDTH: usize = 5;

/// Return the vendor+product identity portion of a CPE 2.3 URI: the first
/// five colon-delimited fields, excluding the version.
pub fn stem(cpe_uri: &str) -> String {
    cpe_uri.split(':').take(5).collect::<Vec<_>>().join(":")
}

/// Extract the vendor and product fields (indices 3 and 4) of a CPE URI.
pub fn vendor_product(cpe_uri: &str) -> (String, String) {
    let fields: Vec<&str> = cpe_uri.split(':').collect();
    let vendor = fields.get(3).copied().unwrap_or_default().to_string();
    let product = fields.get(4).copied().unwrap_or_default().to_string();
    (vendor, product)
}

/// Extract the version component of a CPE name, appending the update field
/// as an extra dotted segment when it carries a value (not `*` or `-`).
pub fn parse_cpe_version(cpe_name: &str) -> String {
    let fields: Vec<&str> = cpe_name.split(':').collect();
    let version = fields.get(5).copied().unwrap_or_default();
    match fields.get(6) {
        Some(update) if *update != "*" && *update != "-" => format!("{version}.{update}"),
        _ => version.to_string(),
    }
}

/// Deterministic record identifier for a CPE product: SHA-256 over the full
/// CPE name concatenated with its version-bearing field. Recomputing from
/// the same upstream record always yields the same id, so upserts are
/// idempotent.
pub fn product_id(cpe_name: &str, version_component: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cpe_name.as_bytes());
    hasher.update(version_component.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert a free-form version string into a fixed-width, lexicographically
/// sortable key.
///
/// Segments are split on `.`; numeric segments are left-zero-padded to five
/// digits, non-numeric segments are zero-padded as literals. A final mixed
/// alphanumeric segment (`2b`, `rc1`) is split at character-class boundaries
/// and each run padded independently, so `1.2` sorts before `1.2b`.
///
/// The empty string and the CPE sentinel `-` pass through unchanged.
/// Parentheses are normalized to `.` before padding. Never fails: any
/// unparsable residue degrades to zero-padded literal comparison.
pub fn padded_version(version: &str) -> String {
    if version.is_empty() || version == "-" {
        return version.to_string();
    }

    let cleaned = version.replace(['(', ')'], ".");
    let cleaned = cleaned.trim_end_matches('.');
    if cleaned.is_empty() {
        return version.to_string();
    }

    let segments: Vec<&str> = cleaned.split('.').collect();
    let (leading, last) = segments.split_at(segments.len() - 1);
    let last = last[0];

    let mut padded: Vec<String> = leading.iter().map(|s| pad_segment(s)).collect();

    if last.parse::<u64>().is_ok() || last.len() > SEGMENT_WIDTH {
        padded.push(pad_segment(last));
    } else if last.chars().all(|c| c.is_ascii_alphabetic()) {
        padded.push(pad_literal(last));
    } else {
        padded.extend(split_mixed_segment(last));
    }

    padded.join(".")
}

fn pad_segment(segment: &str) -> String {
    match segment.parse::<u64>() {
        Ok(n) => format!("{n:0width$}", width = SEGMENT_WIDTH),
        Err(_) => pad_literal(segment),
    }
}

fn pad_literal(segment: &str) -> String {
    format!("{segment:0>width$}", width = SEGMENT_WIDTH)
}

/// Split a mixed alphanumeric segment (`2b`, `rc1`, `3a1`) at every
/// numeric/alphabetic boundary and pad each run on its own, keeping a
/// trailing alphabetic run as a single suffix token.
fn split_mixed_segment(segment: &str) -> Vec<String> {
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_numeric = None::<bool>;

    for c in segment.chars() {
        let numeric = c.is_ascii_digit();
        if current_numeric.is_some_and(|n| n != numeric) {
            runs.push(std::mem::take(&mut current));
        }
        current.push(c);
        current_numeric = Some(numeric);
    }
    if !current.is_empty() {
        runs.push(current);
    }

    runs.iter().map(|run| pad_segment(run)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_strips_version() {
        assert_eq!(
            stem("cpe:2.3:a:openbsd:openssh:7.4:*:*:*:*:*:*:*"),
            "cpe:2.3:a:openbsd:openssh"
        );
    }

    #[test]
    fn test_vendor_product() {
        let (vendor, product) = vendor_product("cpe:2.3:a:openbsd:openssh:7.4:*:*:*:*:*:*:*");
        assert_eq!(vendor, "openbsd");
        assert_eq!(product, "openssh");
    }

    #[test]
    fn test_parse_cpe_version_plain() {
        assert_eq!(
            parse_cpe_version("cpe:2.3:a:openbsd:openssh:7.4:*:*:*:*:*:*:*"),
            "7.4"
        );
    }

    #[test]
    fn test_parse_cpe_version_with_update() {
        assert_eq!(
            parse_cpe_version("cpe:2.3:a:openbsd:openssh:7.4:p1:*:*:*:*:*:*"),
            "7.4.p1"
        );
        assert_eq!(
            parse_cpe_version("cpe:2.3:a:openbsd:openssh:7.4:-:*:*:*:*:*:*"),
            "7.4"
        );
    }

    #[test]
    fn test_product_id_deterministic() {
        let a = product_id("cpe:2.3:a:openbsd:openssh:7.4:*:*:*:*:*:*:*", "7.4");
        let b = product_id("cpe:2.3:a:openbsd:openssh:7.4:*:*:*:*:*:*:*", "7.4");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = product_id("cpe:2.3:a:openbsd:openssh:7.5:*:*:*:*:*:*:*", "7.5");
        assert_ne!(a, c);
    }

    #[test]
    fn test_padded_version_numeric() {
        assert_eq!(padded_version("1.2"), "00001.00002");
        assert_eq!(padded_version("1.10"), "00001.00010");
        assert_eq!(padded_version("2.0"), "00002.00000");
        assert_eq!(padded_version("1.2.3"), "00001.00002.00003");
    }

    #[test]
    fn test_padded_version_sentinels() {
        assert_eq!(padded_version(""), "");
        assert_eq!(padded_version("-"), "-");
    }

    #[test]
    fn test_padded_version_alpha_suffix() {
        assert_eq!(padded_version("1.2b"), "00001.00002.0000b");
        assert_eq!(padded_version("1.rc"), "00001.000rc");
    }

    #[test]
    fn test_padded_version_mixed_final_segment() {
        assert_eq!(padded_version("1.rc1"), "00001.000rc.00001");
        assert_eq!(padded_version("2.3a1"), "00002.00003.0000a.00001");
    }

    #[test]
    fn test_padded_version_long_final_segment() {
        // Over five characters: integer padding attempted, literal fallback.
        assert_eq!(padded_version("1.123456"), "00001.123456");
        assert_eq!(padded_version("1.release"), "00001.release");
    }

    #[test]
    fn test_padded_version_parentheses() {
        assert_eq!(padded_version("1.2(3)"), "00001.00002.00003");
    }

    #[test]
    fn test_ordering_invariant() {
        // Lexicographic order of padded keys matches semantic version order.
        let mut versions = vec!["2.0", "1.10", "1.2", "1.2.3", "1.2b"];
        versions.sort_by_key(|v| padded_version(v));
        assert_eq!(versions, vec!["1.2", "1.2.3", "1.2b", "1.10", "2.0"]);
    }

    #[test]
    fn test_ordering_of_dash_sentinel() {
        // "-" sorts as itself, unchanged.
        assert!(padded_version("-") < padded_version("1.0"));
    }
}
