//! Delimited-text parsing into headers and rows.
//!
//! Uses the `csv` crate so quoted fields containing the separator or
//! newlines survive intact. Rows may have differing lengths.

use std::path::Path;

use csv::ReaderBuilder;
use tracing::debug;

use crate::error::AppError;
use crate::model::{Row, Table};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const EMPTY_FILE_MESSAGE: &str = "The CSV file appears to be empty";

// ─────────────────────────────────────────────────────────────────────────────
// Separator
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a user-supplied separator into a single byte.
///
/// Accepts any single ASCII character plus the spellings `\t` and `tab`.
///
/// # Errors
///
/// Returns `AppError::Config` for empty, multi-character, or non-ASCII input.
pub fn parse_separator(raw: &str) -> Result<u8, AppError> {
    match raw {
        "\\t" | "tab" | "\t" => return Ok(b'\t'),
        _ => {}
    }
    let bytes = raw.as_bytes();
    if bytes.len() == 1 && bytes[0].is_ascii() {
        Ok(bytes[0])
    } else {
        Err(AppError::Config(format!(
            "Separator must be a single ASCII character, got \"{}\"",
            raw
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Parses delimited text into a table.
///
/// With `has_headers`, the first record is the header row. Without it,
/// headers `Column 1..N` are synthesized from the first record's width and
/// every record is data. Whitespace-only lines are skipped.
///
/// # Errors
///
/// Returns `AppError::CsvInvalid` if the text holds no records or a record
/// cannot be parsed.
pub fn parse_table(text: &str, separator: u8, has_headers: bool) -> Result<Table, AppError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .from_reader(text.as_bytes());

    let mut records: Vec<Row> = Vec::new();
    for result in reader.records() {
        let record =
            result.map_err(|e| AppError::CsvInvalid(format!("Failed to read record: {}", e)))?;
        if is_blank(&record) {
            continue;
        }
        records.push(record.iter().map(String::from).collect());
    }

    let mut records = records.into_iter();
    let first = records
        .next()
        .ok_or_else(|| AppError::CsvInvalid(EMPTY_FILE_MESSAGE.to_string()))?;

    let table = if has_headers {
        Table {
            headers: first,
            rows: records.collect(),
        }
    } else {
        let headers = (1..=first.len()).map(|i| format!("Column {}", i)).collect();
        Table {
            headers,
            rows: std::iter::once(first).chain(records).collect(),
        }
    };

    debug!(
        columns = table.headers.len(),
        rows = table.rows.len(),
        "Parsed table"
    );

    Ok(table)
}

/// Reads and parses a file from disk.
///
/// # Errors
///
/// Returns `AppError::NotUtf8` if the file is not UTF-8 (after an optional
/// BOM), `AppError::CsvInvalid` for read or parse failures.
pub async fn read_table(path: &Path, separator: u8, has_headers: bool) -> Result<Table, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::CsvInvalid(format!("Failed to read file: {}", e)))?;

    let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    let text = std::str::from_utf8(data).map_err(|_| AppError::NotUtf8)?;

    parse_table(text, separator, has_headers)
}

/// A record produced by a whitespace-only line.
fn is_blank(record: &csv::StringRecord) -> bool {
    record.len() <= 1 && record.iter().all(|f| f.trim().is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
