//! Package-level metadata calamine does not expose: document timestamps from
//! `docProps/core.xml` and the active tab from `xl/workbook.xml`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::timestamp::ParserSlot;

const CORE_PROPERTIES: &str = "docProps/core.xml";
const WORKBOOK: &str = "xl/workbook.xml";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Properties {
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub active_tab: Option<usize>,
}

#[derive(Debug, Default)]
struct RawProperties {
    created: Option<String>,
    modified: Option<String>,
    active_tab: Option<usize>,
}

/// Reads package metadata. Files that are not zip packages have none.
pub fn read_properties(path: &Path, parsers: &ParserSlot) -> Result<Properties> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let Ok(mut zip) = ZipArchive::new(BufReader::new(file)) else {
        return Ok(Properties::default());
    };

    let raw = read_raw(&mut zip)?;
    let parse = |value: Option<String>, name: &str| -> Result<Option<NaiveDateTime>> {
        value
            .map(|v| {
                parsers
                    .parse(v.trim())
                    .with_context(|| format!("cannot parse {name} in {CORE_PROPERTIES}"))
            })
            .transpose()
    };

    Ok(Properties {
        created: parse(raw.created, "dcterms:created")?,
        modified: parse(raw.modified, "dcterms:modified")?,
        active_tab: raw.active_tab,
    })
}

fn read_raw<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<RawProperties> {
    let mut raw = RawProperties::default();

    match zip.by_name(CORE_PROPERTIES) {
        Ok(file) => {
            let mut reader = Reader::from_reader(BufReader::new(file));
            reader.config_mut().trim_text(true);
            (raw.created, raw.modified) = core_timestamps(&mut reader)?;
        }
        Err(ZipError::FileNotFound) => {}
        Err(err) => return Err(err).context(CORE_PROPERTIES),
    }

    match zip.by_name(WORKBOOK) {
        Ok(file) => {
            let mut reader = Reader::from_reader(BufReader::new(file));
            raw.active_tab = active_tab(&mut reader)?;
        }
        Err(ZipError::FileNotFound) => {}
        Err(err) => return Err(err).context(WORKBOOK),
    }

    Ok(raw)
}

/// Text of `dcterms:created` and `dcterms:modified`.
fn core_timestamps<R: BufRead>(
    reader: &mut Reader<R>,
) -> Result<(Option<String>, Option<String>)> {
    let mut buf = Vec::new();
    let mut values: [Option<String>; 2] = [None, None];
    let mut current = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                current = match e.local_name().as_ref() {
                    b"created" => Some(0),
                    b"modified" => Some(1),
                    _ => None,
                }
            }
            Event::Text(t) => {
                if let Some(i) = current {
                    values[i]
                        .get_or_insert_with(String::new)
                        .push_str(&t.xml_content()?);
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    let [created, modified] = values;
    Ok((created, modified))
}

fn active_tab<R: BufRead>(reader: &mut Reader<R>) -> Result<Option<usize>> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"workbookView" => {
                let Some(attr) = e.try_get_attribute("activeTab")? else {
                    return Ok(None);
                };
                let value = attr.unescape_value()?;
                return Ok(value.trim().parse().ok());
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheets" => return Ok(None),
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}
