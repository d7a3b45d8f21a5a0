//! Plain-text extraction for downloaded report payloads.
//!
//! Registry and portal downloads arrive as raw bytes in one of three
//! shapes: a PDF, a ZIP archive wrapping one or more XML documents, or
//! bare markup/text. The format is sniffed from magic bytes rather
//! than trusted from a content-type header.

use std::io::Read;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Archive(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Archive(e) => write!(f, "archive extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from a downloaded document.
///
/// `%PDF` bytes go through the PDF extractor, `PK` bytes are treated
/// as a ZIP of markup documents, anything else is decoded lossily and
/// stripped of markup. Output whitespace is normalized.
pub fn document_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = if bytes.starts_with(b"%PDF") {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?
    } else if bytes.starts_with(b"PK") {
        extract_archive(bytes)?
    } else {
        strip_markup(&String::from_utf8_lossy(bytes))
    };
    Ok(normalize_whitespace(&text))
}

/// Pulls text out of every XML/HTML entry in the archive, largest
/// first so the main document body leads the output.
fn extract_archive(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;

    let mut markup_entries: Vec<(String, u64)> = archive
        .file_names()
        .filter(|n| {
            let lower = n.to_lowercase();
            lower.ends_with(".xml") || lower.ends_with(".html") || lower.ends_with(".xhtml")
        })
        .map(|s| (s.to_string(), 0))
        .collect();
    for entry in markup_entries.iter_mut() {
        if let Ok(f) = archive.by_name(&entry.0) {
            entry.1 = f.size();
        }
    }
    markup_entries.sort_by(|a, b| b.1.cmp(&a.1));

    if markup_entries.is_empty() {
        return Err(ExtractError::Archive(
            "no XML or HTML entries in archive".to_string(),
        ));
    }

    let mut out = String::new();
    for (name, _) in markup_entries {
        let raw = read_entry_bounded(&mut archive, &name)?;
        let text = strip_markup(&String::from_utf8_lossy(&raw));
        if !text.trim().is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&text);
        }
    }
    Ok(out)
}

fn read_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "entry {} exceeds size limit ({} bytes)",
            name, MAX_ZIP_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Collects the text content of a markup document. Malformed markup
/// never fails: the event reader handles well-formed input and a tag
/// stripper covers the rest. Plain text passes through unchanged.
fn strip_markup(input: &str) -> String {
    if !input.contains('<') {
        return input.to_string();
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_str(input);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Text(te)) => {
                let text = te.unescape().unwrap_or_default();
                if !text.trim().is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(text.trim());
                }
            }
            Ok(quick_xml::events::Event::CData(cd)) => {
                let text = String::from_utf8_lossy(&cd).into_owned();
                if !text.trim().is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(text.trim());
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => return strip_tags(input),
            _ => {}
        }
    }
    out
}

/// Character-level tag stripper for markup the XML reader rejects.
fn strip_tags(input: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                    out.push(' ');
                } else {
                    out.push(c);
                }
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}
