//! Streaming parser for the MITRE CWE catalog XML.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::UpdateError;
use crate::model::WeaknessRecord;

/// Parse every `<Weakness>` entry of a catalog document into records.
/// Related weaknesses are deduplicated; only the direct `<Description>`
/// child is captured, not the extended description.
pub fn parse_catalog(xml: &[u8]) -> Result<Vec<WeaknessRecord>, UpdateError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<WeaknessRecord> = None;
    let mut in_description = false;
    let mut depth_in_weakness = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| UpdateError::Feed(format!("malformed CWE catalog: {err}")))?;

        match event {
            Event::Start(ref e) => {
                let name = e.name();
                match name.as_ref() {
                    b"Weakness" if current.is_none() => {
                        current = Some(weakness_from_attributes(e)?);
                        depth_in_weakness = 0;
                    }
                    b"Description" if current.is_some() && depth_in_weakness == 0 => {
                        in_description = true;
                        depth_in_weakness += 1;
                    }
                    _ if current.is_some() => depth_in_weakness += 1,
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if e.name().as_ref() == b"Related_Weakness" {
                    if let Some(record) = current.as_mut() {
                        if let Some(id) = attribute(e, "CWE_ID")? {
                            let related = format!("CWE-{id}");
                            if !record.related_weaknesses.contains(&related) {
                                record.related_weaknesses.push(related);
                            }
                        }
                    }
                }
            }
            Event::Text(ref t) => {
                if in_description {
                    if let Some(record) = current.as_mut() {
                        let text = t
                            .unescape()
                            .map_err(|err| {
                                UpdateError::Feed(format!("malformed CWE catalog: {err}"))
                            })?;
                        if !record.description.is_empty() {
                            record.description.push(' ');
                        }
                        record.description.push_str(text.trim());
                    }
                }
            }
            Event::End(ref e) => {
                let name = e.name();
                if name.as_ref() == b"Weakness" && depth_in_weakness == 0 {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                    in_description = false;
                } else if current.is_some() {
                    depth_in_weakness = depth_in_weakness.saturating_sub(1);
                    if name.as_ref() == b"Description" && depth_in_weakness == 0 {
                        in_description = false;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!(count = records.len(), "parsed weakness catalog entries");
    Ok(records)
}

fn weakness_from_attributes(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<WeaknessRecord, UpdateError> {
    let id = attribute(e, "ID")?.unwrap_or_default();
    Ok(WeaknessRecord {
        id: format!("CWE-{id}"),
        name: attribute(e, "Name")?.unwrap_or_default(),
        status: attribute(e, "Status")?.unwrap_or_default(),
        description: String::new(),
        related_weaknesses: Vec::new(),
    })
}

fn attribute(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> Result<Option<String>, UpdateError> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| UpdateError::Feed(format!("malformed CWE catalog: {err}")))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| UpdateError::Feed(format!("malformed CWE catalog: {err}")))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}
