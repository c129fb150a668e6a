use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use csv::{ReaderBuilder, Trim};
use regex::Regex;
use std::io::Cursor;
use std::path::Path;

use super::row_parser::RawRow;
use crate::error::{JournalError, Result};

/// Container formats the importer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

impl FileKind {
    /// Dispatch on the uploaded file's extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") | Some("xls") => Ok(FileKind::Spreadsheet),
            _ => Err(JournalError::format("Unsupported file format. Use CSV or XLSX.")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodedFile {
    pub rows: Vec<RawRow>,
    /// Account number declared in the export's metadata block (CSV only)
    pub account_number: Option<String>,
}

pub fn decode(filename: &str, bytes: &[u8]) -> Result<DecodedFile> {
    match FileKind::from_filename(filename)? {
        FileKind::Csv => decode_csv(bytes),
        FileKind::Spreadsheet => decode_spreadsheet(bytes),
    }
}

// ─── Delimited text ──────────────────────────────────────────────────────────

/// UTF-8 byte sequences that show up when a UTF-8 file is read as Latin-1
const MOJIBAKE_REPAIRS: &[(&str, &str)] = &[
    ("Ã§", "ç"),
    ("Ã£", "ã"),
    ("Ã©", "é"),
    ("Ã¡", "á"),
    ("Ãª", "ê"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ãµ", "õ"),
    ("Ã¢", "â"),
    ("Ã\u{AD}", "í"),
];

/// UTF-8 byte order mark as seen through Latin-1
const LATIN1_BOM: &str = "\u{EF}\u{BB}\u{BF}";

const METADATA_MARKERS: &[&str] = &["Conta:", "Titular:"];

/// Broker exports are ISO-8859-1, where every byte maps to the same code point
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn repair_text(content: &str) -> Result<String> {
    let mut repaired = content.to_string();
    for (broken, fixed) in MOJIBAKE_REPAIRS {
        repaired = repaired.replace(broken, fixed);
    }

    // Some exports drop the accented letters entirely
    let operacao = Regex::new(r"(?i)Operao").map_err(|e| JournalError::Validation(e.to_string()))?;
    let preco = Regex::new(r"(?i)Preo").map_err(|e| JournalError::Validation(e.to_string()))?;
    let repaired = operacao.replace_all(&repaired, "Operacao");
    Ok(preco.replace_all(&repaired, "Preco").into_owned())
}

/// Split off the metadata preamble of a Profit-style export, returning the
/// table text and the declared account number.
fn strip_metadata(content: &str) -> Result<(String, Option<String>)> {
    if !METADATA_MARKERS.iter().any(|m| content.starts_with(m)) {
        return Ok((content.to_string(), None));
    }

    let account_re = Regex::new(r"^Conta:\D*(\d+)").map_err(|e| JournalError::Validation(e.to_string()))?;
    let lines: Vec<&str> = content.split('\n').collect();

    let account_number = lines
        .iter()
        .find_map(|line| account_re.captures(line.trim_start()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let table = match lines
        .iter()
        .position(|line| line.contains("Subconta;") || line.contains("Subconta,"))
    {
        Some(header_idx) => lines[header_idx..].join("\n"),
        None => content.to_string(),
    };

    Ok((table, account_number))
}

fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or_default();
    if first_line.contains(';') { b';' } else { b',' }
}

pub fn decode_csv(bytes: &[u8]) -> Result<DecodedFile> {
    let content = decode_latin1(bytes);
    let content = content.strip_prefix(LATIN1_BOM).unwrap_or(content.as_str());
    let content = repair_text(content)?;
    let (table, account_number) = strip_metadata(&content)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(detect_delimiter(&table))
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(table.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .collect();

        if row.is_empty() || row.is_blank() {
            continue;
        }
        rows.push(row);
    }

    log::debug!(
        "Decoded {} CSV rows (account number: {:?})",
        rows.len(),
        account_number
    );

    Ok(DecodedFile {
        rows,
        account_number,
    })
}

// ─── Spreadsheet ─────────────────────────────────────────────────────────────

/// Render a cell the way the CSV exports print it, so both formats share
/// one row parser: dates as DD/MM/YYYY HH:MM:SS, decimals with a comma.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string().replace('.', ","),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format("%d/%m/%Y %H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.trim().to_string(),
        Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// First sheet only, first row is the header
pub fn decode_spreadsheet(bytes: &[u8]) -> Result<DecodedFile> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| JournalError::format("No sheets found in workbook"))?;

    let sheet = workbook.worksheet_range(&sheet_name)?;
    let mut sheet_rows = sheet.rows();

    let Some(header_row) = sheet_rows.next() else {
        return Ok(DecodedFile::default());
    };
    let headers: Vec<String> = header_row.iter().map(cell_text).collect();

    let rows: Vec<RawRow> = sheet_rows
        .map(|cells| {
            headers
                .iter()
                .zip(cells.iter())
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, cell)| (header.clone(), cell_text(cell)))
                .filter(|(_, value)| !value.is_empty())
                .collect::<RawRow>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    log::debug!("Decoded {} rows from sheet '{}'", rows.len(), sheet_name);

    Ok(DecodedFile {
        rows,
        account_number: None,
    })
}
