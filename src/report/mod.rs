//! Export of rows that did not make it into Strapi.
//!
//! The report is a CSV with `row_index`, `stage` and `error` columns followed
//! by the columns of the uploaded file, so it can be fixed up and uploaded again.

mod atomic_writer;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::AppError;
use crate::model::Table;
use crate::upload::FailedRow;
use crate::validation::ValidationResult;

pub use atomic_writer::AtomicCsvWriter;

struct ReportLine {
    row_index: usize,
    stage: &'static str,
    error: String,
}

/// Writes failed and invalid rows of `table` to `path`, ordered by row index.
/// Returns the written path and number of rows.
pub fn write_failure_report(
    path: impl AsRef<Path>,
    table: &Table,
    failed: &[FailedRow],
    invalid: &[ValidationResult],
) -> Result<(PathBuf, usize), AppError> {
    let mut lines: Vec<ReportLine> = invalid
        .iter()
        .map(|result| ReportLine {
            row_index: result.row_index,
            stage: "validation",
            error: result.errors.join("; "),
        })
        .chain(failed.iter().map(|failure| ReportLine {
            row_index: failure.row_index,
            stage: "upload",
            error: failure.error.to_string(),
        }))
        .collect();
    lines.sort_by_key(|line| line.row_index);

    let mut writer = AtomicCsvWriter::create(path)?;

    let mut header = vec!["row_index".to_string(), "stage".into(), "error".into()];
    header.extend(table.headers.iter().cloned());
    writer.write_record(&header)?;

    for line in &lines {
        let mut record = vec![line.row_index.to_string(), line.stage.to_string(), line.error.clone()];
        let cells = table.rows.get(line.row_index).map(Vec::as_slice).unwrap_or(&[]);
        record.extend(
            (0..table.headers.len()).map(|i| cells.get(i).cloned().unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    let written = writer.finish()?;
    info!(
        "[REPORT] Wrote {} failed rows to {}",
        lines.len(),
        written.display()
    );
    Ok((written, lines.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::fs;
    use tempfile::TempDir;

    use crate::strapi::RemoteCreateError;

    fn table() -> Table {
        Table {
            headers: vec!["Title".into(), "Views".into()],
            rows: vec![
                vec!["a".into(), "1".into()],
                vec!["".into(), "2".into()],
                vec!["c".into()],
            ],
        }
    }

    #[test]
    fn report_merges_and_orders_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failed.csv");
        let failed = vec![FailedRow {
            row_index: 2,
            error: RemoteCreateError {
                http_status: Some(400),
                message: "Bad".into(),
                field_errors: vec!["slug".into()],
            },
        }];
        let invalid = vec![ValidationResult {
            row_index: 1,
            record: Map::new(),
            errors: vec!["title is required".into(), "x".into()],
        }];

        let (written, count) = write_failure_report(&path, &table(), &failed, &invalid).unwrap();

        assert_eq!(written, path);
        assert_eq!(count, 2);
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "row_index,stage,error,Title,Views");
        assert_eq!(lines[1], "1,validation,title is required; x,,2");
        assert_eq!(lines[2], "2,upload,HTTP error 400: Bad. Errors: slug,c,");
    }

    #[test]
    fn empty_report_has_only_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failed.csv");

        let (_, count) = write_failure_report(&path, &table(), &[], &[]).unwrap();

        assert_eq!(count, 0);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "row_index,stage,error,Title,Views\n"
        );
    }
}
