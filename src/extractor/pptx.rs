use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{ExtractError, failed};

/// Maximum decompressed bytes read from a single part (zip-bomb guard).
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const PRESENTATION: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";

/// Slides in presentation order; each text-bearing shape contributes its
/// text plus a newline. Shapes without a text frame are skipped.
pub fn extract(path: &Path) -> Result<String, ExtractError> {
    let file = File::open(path).map_err(|e| failed("cannot read file", e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| failed("invalid slide deck", e))?;

    let slide_names = slide_order(&mut archive)?;
    if slide_names.is_empty() {
        return Err(ExtractError::ExtractionFailed(
            "invalid slide deck: no slides found".to_string(),
        ));
    }

    let mut text = String::new();
    for name in slide_names {
        let xml = read_part(&mut archive, &name)?.ok_or_else(|| {
            ExtractError::ExtractionFailed(format!("invalid slide deck: missing {name}"))
        })?;
        push_slide_text(&xml, &mut text)?;
    }

    Ok(text)
}

/// Slide part names in the order `ppt/presentation.xml` lists them.
///
/// Decks without a usable slide list fall back to the numeric order of the
/// `slideN.xml` part names.
fn slide_order<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<String>, ExtractError> {
    let presentation = read_part(archive, PRESENTATION)?;
    let rels = read_part(archive, PRESENTATION_RELS)?;
    if let (Some(presentation), Some(rels)) = (presentation, rels) {
        let targets = relationship_targets(&rels)?;
        let ordered: Vec<String> = slide_rel_ids(&presentation)?
            .iter()
            .filter_map(|id| targets.get(id))
            .filter(|name| archive.index_for_name(name).is_some())
            .cloned()
            .collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(SLIDE_PREFIX) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| slide_number(name));
    Ok(names)
}

/// Read one archive part, or `None` if the archive does not contain it.
fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(failed(&format!("cannot open {name}"), e)),
    };
    let mut bytes = Vec::new();
    entry
        .take(MAX_PART_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| failed(&format!("cannot read {name}"), e))?;
    Ok(Some(bytes))
}

/// Relationship ids of `<p:sldId>` entries, in list order.
fn slide_rel_ids(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut ids = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) if e.local_name().as_ref() == b"sldId" => {
                for attr in e.attributes().flatten() {
                    // `r:id` points into the rels part; the bare `id` is numeric.
                    if attr.key.local_name().as_ref() == b"id" && attr.key.prefix().is_some() {
                        let value = attr
                            .unescape_value()
                            .map_err(|e| failed("malformed presentation part", e))?;
                        ids.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(failed("malformed presentation part", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(ids)
}

/// `Id -> part name` for every relationship, targets resolved against `ppt/`.
fn relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map_err(|e| failed("malformed relationships part", e))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, resolve_target(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(failed("malformed relationships part", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(targets)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("ppt/{}", target.trim_start_matches("./")),
    }
}

fn slide_number(name: &str) -> u32 {
    name.trim_start_matches(SLIDE_PREFIX)
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(u32::MAX)
}

#[derive(Default)]
struct ShapeText {
    has_text_frame: bool,
    paragraphs: usize,
    text: String,
}

impl ShapeText {
    fn start_paragraph(&mut self) {
        if self.paragraphs > 0 {
            self.text.push('\n');
        }
        self.paragraphs += 1;
    }
}

fn push_slide_text(xml: &[u8], out: &mut String) -> Result<(), ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut shape: Option<ShapeText> = None;
    let mut in_run_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => shape = Some(ShapeText::default()),
                b"txBody" => {
                    if let Some(s) = shape.as_mut() {
                        s.has_text_frame = true;
                    }
                }
                b"p" => {
                    if let Some(s) = shape.as_mut() {
                        s.start_paragraph();
                    }
                }
                b"t" => in_run_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(s) = shape.as_mut() {
                        s.start_paragraph();
                    }
                }
                b"br" => {
                    if let Some(s) = shape.as_mut() {
                        s.text.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_run_text => {
                if let Some(s) = shape.as_mut() {
                    let t = te.unescape().map_err(|e| failed("malformed slide text", e))?;
                    s.text.push_str(&t);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"sp" => {
                    if let Some(s) = shape.take().filter(|s| s.has_text_frame) {
                        out.push_str(&s.text);
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(failed("malformed slide XML", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}
