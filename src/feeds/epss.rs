//! Parser for the EPSS scores CSV feed.
//!
//! The file starts with a `#`-prefixed model-version banner, then a header
//! row (`cve,epss,percentile`), then one row per CVE.

use crate::error::UpdateError;
use crate::model::EpssScore;

pub fn parse_scores(csv: &[u8]) -> Result<Vec<EpssScore>, UpdateError> {
    let text = std::str::from_utf8(csv)
        .map_err(|err| UpdateError::Feed(format!("EPSS feed is not valid UTF-8: {err}")))?;

    let mut scores = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("cve,") {
            continue;
        }

        let mut fields = line.split(',');
        let (Some(cve_id), Some(epss), Some(percentile)) =
            (fields.next(), fields.next(), fields.next())
        else {
            tracing::debug!(line, "skipping malformed EPSS row");
            continue;
        };

        let (Ok(epss), Ok(percentile)) = (epss.parse::<f64>(), percentile.parse::<f64>())
        else {
            tracing::debug!(line, "skipping EPSS row with non-numeric scores");
            continue;
        };

        scores.push(EpssScore {
            cve_id: cve_id.to_string(),
            epss,
            percentile,
        });
    }

    tracing::debug!(count = scores.len(), "parsed EPSS score rows");
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "#model_version:v2023.03.01,score_date:2024-01-15T00:00:00+0000\n\
cve,epss,percentile\n\
CVE-2024-0001,0.00043,0.07529\n\
CVE-2024-0002,0.97297,0.99971\n";

    #[test]
    fn test_parse_scores() {
        let scores = parse_scores(FEED.as_bytes()).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].cve_id, "CVE-2024-0001");
        assert_eq!(scores[0].epss, 0.00043);
        assert_eq!(scores[1].percentile, 0.99971);
    }

    #[test]
    fn test_banner_and_header_skipped() {
        let scores = parse_scores(b"#banner\ncve,epss,percentile\n").unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let scores =
            parse_scores(b"cve,epss,percentile\nCVE-1,not-a-number,0.5\nCVE-2,0.1,0.2\nshort\n")
                .unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].cve_id, "CVE-2");
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        assert!(parse_scores(&[0xff, 0xfe, 0x00]).is_err());
    }
}
