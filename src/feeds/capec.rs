//! Streaming parser for the MITRE CAPEC attack-pattern catalog XML.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::UpdateError;
use crate::model::AttackPatternRecord;

/// Text-bearing child elements of an `<Attack_Pattern>` that feed a
/// record field.
enum Field {
    Summary,
    Likelihood,
    Severity,
    Prerequisite,
    Mitigation,
}

/// Parse every `<Attack_Pattern>` entry of a catalog document into
/// records. Description bodies may nest xhtml markup; all text within the
/// subtree is joined. Related weaknesses and patterns are deduplicated.
pub fn parse_catalog(xml: &[u8]) -> Result<Vec<AttackPatternRecord>, UpdateError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<AttackPatternRecord> = None;
    let mut field: Option<Field> = None;
    let mut field_open_depth = 0usize;
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| UpdateError::Feed(format!("malformed CAPEC catalog: {err}")))?;

        match event {
            Event::Start(ref e) => {
                let name = e.name();
                if current.is_none() {
                    if name.as_ref() == b"Attack_Pattern" {
                        current = Some(pattern_from_attributes(e)?);
                        depth = 0;
                        field = None;
                    }
                } else {
                    if field.is_none() {
                        let next = match name.as_ref() {
                            // Only the direct-child description; attack
                            // steps carry their own nested ones.
                            b"Description" if depth == 0 => Some(Field::Summary),
                            b"Likelihood_Of_Attack" => Some(Field::Likelihood),
                            b"Typical_Severity" => Some(Field::Severity),
                            b"Prerequisite" => Some(Field::Prerequisite),
                            b"Mitigation" => Some(Field::Mitigation),
                            _ => None,
                        };
                        if let (Some(next), Some(record)) = (next, current.as_mut()) {
                            match next {
                                Field::Prerequisite => record.prerequisites.push(String::new()),
                                Field::Mitigation => record.solutions.push(String::new()),
                                _ => {}
                            }
                            field = Some(next);
                            field_open_depth = depth;
                        }
                    }
                    depth += 1;
                }
            }
            Event::Empty(ref e) => {
                if let Some(record) = current.as_mut() {
                    match e.name().as_ref() {
                        b"Related_Weakness" => {
                            if let Some(id) = attribute(e, "CWE_ID")? {
                                push_unique(&mut record.related_weaknesses, format!("CWE-{id}"));
                            }
                        }
                        b"Related_Attack_Pattern" => {
                            if let Some(id) = attribute(e, "CAPEC_ID")? {
                                push_unique(&mut record.related_capecs, format!("CAPEC-{id}"));
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(ref t) => {
                if let (Some(target), Some(record)) = (field.as_ref(), current.as_mut()) {
                    let text = t.unescape().map_err(|err| {
                        UpdateError::Feed(format!("malformed CAPEC catalog: {err}"))
                    })?;
                    let text = text.trim();
                    match target {
                        Field::Summary => append(&mut record.summary, text),
                        Field::Likelihood => append(&mut record.likelihood, text),
                        Field::Severity => append(&mut record.typical_severity, text),
                        Field::Prerequisite => {
                            if let Some(entry) = record.prerequisites.last_mut() {
                                append(entry, text);
                            }
                        }
                        Field::Mitigation => {
                            if let Some(entry) = record.solutions.last_mut() {
                                append(entry, text);
                            }
                        }
                    }
                }
            }
            Event::End(ref e) => {
                if current.is_some() {
                    if e.name().as_ref() == b"Attack_Pattern" && depth == 0 {
                        if let Some(record) = current.take() {
                            records.push(record);
                        }
                        field = None;
                    } else {
                        depth = depth.saturating_sub(1);
                        if field.is_some() && depth == field_open_depth {
                            field = None;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!(count = records.len(), "parsed attack pattern entries");
    Ok(records)
}

fn pattern_from_attributes(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<AttackPatternRecord, UpdateError> {
    let id = attribute(e, "ID")?.unwrap_or_default();
    Ok(AttackPatternRecord {
        id: format!("CAPEC-{id}"),
        name: attribute(e, "Name")?.unwrap_or_default(),
        ..Default::default()
    })
}

fn attribute(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> Result<Option<String>, UpdateError> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| UpdateError::Feed(format!("malformed CAPEC catalog: {err}")))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| UpdateError::Feed(format!("malformed CAPEC catalog: {err}")))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn append(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
