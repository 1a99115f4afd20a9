//! Document loading: file-extension dispatch and text extraction.
//!
//! Turns a file path into a [`Document`] made of raw text [`Segment`]s, each
//! tagged with the originating `source` path. PDFs become one segment per
//! page (tagged with `page`), spreadsheets one segment per worksheet (tagged
//! with `sheet`), plain text files one segment.
//!
//! Legacy binary `.xls` workbooks are read through calamine; the OOXML
//! `.xlsx` path walks the archive directly.

use std::io::Read;
use std::path::Path;

use calamine::{Reader, Xls};
use quick_xml::events::Event;
use thiserror::Error;

use crate::error::RagError;
use crate::models::{Document, Metadata, Segment};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Xlsx,
    Xls,
    PlainText,
}

impl DocumentFormat {
    /// Resolve the loader for a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "xlsx" => Some(DocumentFormat::Xlsx),
            "xls" => Some(DocumentFormat::Xls),
            "txt" | "md" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("XLSX extraction failed: {0}")]
    Xlsx(String),
    #[error("XLS extraction failed: {0}")]
    Xls(String),
}

/// Load a file and extract its text segments.
///
/// Fails with [`RagError::UnsupportedFormat`] for unknown extensions and
/// [`RagError::Load`] when the file cannot be read or decoded.
pub fn load_document(path: &Path) -> Result<Document, RagError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| RagError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;

    let load_err = |message: String| RagError::Load {
        path: path.to_path_buf(),
        message,
    };

    let bytes = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
    let source = path.to_string_lossy().to_string();

    let segments = match format {
        DocumentFormat::Pdf => {
            let pages = extract_pdf_pages(&bytes).map_err(|e| load_err(e.to_string()))?;
            page_segments(pages, &source)
        }
        DocumentFormat::Xlsx => extract_xlsx(&bytes)
            .map_err(|e| load_err(e.to_string()))?
            .into_iter()
            .map(|(sheet, text)| segment(text, &source, Some(("sheet", sheet))))
            .collect(),
        DocumentFormat::Xls => extract_xls(&bytes)
            .map_err(|e| load_err(e.to_string()))?
            .into_iter()
            .map(|(sheet, text)| segment(text, &source, Some(("sheet", sheet))))
            .collect(),
        DocumentFormat::PlainText => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            vec![segment(text, &source, None)]
        }
    };

    Ok(Document {
        path: path.to_path_buf(),
        format,
        segments,
    })
}

/// Build a segment tagged with its source and an optional `(key, number)`
/// location such as `("page", 3)`.
fn segment(text: String, source: &str, location: Option<(&str, u32)>) -> Segment {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), source.into());
    if let Some((key, number)) = location {
        metadata.insert(key.to_string(), number.into());
    }
    Segment { text, metadata }
}

/// One segment per PDF page, numbered from 1.
fn page_segments(pages: Vec<String>, source: &str) -> Vec<Segment> {
    pages
        .into_iter()
        .zip(1u32..)
        .map(|(text, page)| segment(text, source, Some(("page", page))))
        .collect()
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut ZipReader<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Xlsx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Xlsx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Xlsx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Returns `(sheet number, text)` per worksheet, rows separated by newlines.
fn extract_xlsx(bytes: &[u8]) -> Result<Vec<(u32, String)>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Xlsx(e.to_string()))?;
    // Workbooks without any text cells omit the shared string table.
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (number, name) in list_worksheets(&archive).into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        sheets.push((number, extract_sheet_rows(&xml, &shared_strings)?));
    }
    Ok(sheets)
}

fn read_shared_strings(archive: &mut ZipReader<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                // Rich text runs (<r><t>..</t></r>) concatenate into one string.
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xlsx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheets(archive: &ZipReader<'_>) -> Vec<(u32, String)> {
    let mut sheets: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .filter_map(|name| {
            let number = name
                .trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    sheets.sort_by_key(|(number, _)| *number);
    sheets
}

/// Same shape as [`extract_xlsx`], sheets numbered by workbook order.
fn extract_xls(bytes: &[u8]) -> Result<Vec<(u32, String)>, ExtractError> {
    let mut workbook: Xls<_> = Xls::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Xls(e.to_string()))?;
    let names = workbook.sheet_names();

    let mut sheets = Vec::new();
    for (name, number) in names.iter().take(XLSX_MAX_SHEETS).zip(1u32..) {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| ExtractError::Xls(e.to_string()))?;
        let rows = range.rows().map(|row| row.iter().map(|cell| cell.to_string()));
        sheets.push((number, join_rows(rows)));
    }
    Ok(sheets)
}

/// Non-empty cells joined by spaces, non-empty rows by newlines.
fn join_rows<R, C>(rows: R) -> String
where
    R: IntoIterator<Item = C>,
    C: IntoIterator<Item = String>,
{
    let mut budget = XLSX_MAX_CELLS_PER_SHEET;
    let mut lines = Vec::new();
    for row in rows {
        if budget == 0 {
            break;
        }
        let cells: Vec<String> = row
            .into_iter()
            .map(|cell| cell.trim().to_string())
            .filter(|cell| !cell.is_empty())
            .take(budget)
            .collect();
        budget -= cells.len();
        if !cells.is_empty() {
            lines.push(cells.join(" "));
        }
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = kind != CellKind::Inline,
                b"t" => in_value = kind == CellKind::Inline,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                let resolved = match kind {
                    CellKind::Shared => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i).cloned()),
                    _ => Some(value.to_string()),
                };
                if let Some(text) = resolved.filter(|t| !t.is_empty()) {
                    row_cells.push(text);
                    cell_count += 1;
                }
                in_value = false;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" if !row_cells.is_empty() => {
                    rows.push(row_cells.join(" "));
                    row_cells.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xlsx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row_cells.is_empty() {
        rows.push(row_cells.join(" "));
    }
    Ok(rows.join("\n"))
}
