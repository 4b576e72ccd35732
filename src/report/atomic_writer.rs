//! CSV output that only appears at its destination once complete.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// Writes CSV records to a temporary file beside the destination and moves
/// it into place on `finish()`. Dropping it unfinished removes the temp file.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// # Errors
    ///
    /// Returns `AppError::ReportError` if the temporary file cannot be created.
    pub fn create(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
            Some(dir) => dir,
            None => {
                return Err(AppError::ReportError(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| {
            AppError::ReportError(format!("Failed to create temporary file: {}", e))
        })?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
        })
    }

    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|e| AppError::ReportError(format!("Failed to write row: {}", e)))
    }

    /// Flushes and atomically replaces the destination. Returns its path.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::ReportError(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer.into_inner().map_err(|e| {
            AppError::ReportError(format!("Failed to flush buffer: {}", e.error()))
        })?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::ReportError(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finish_replaces_existing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("failures.csv");
        fs::write(&final_path, "OLD_CONTENT").unwrap();

        let mut writer = AtomicCsvWriter::create(&final_path).unwrap();
        writer.write_record(["row_index", "error"]).unwrap();
        writer.write_record(["3", "Has, comma"]).unwrap();
        let written = writer.finish().unwrap();

        assert_eq!(written, final_path);
        let content = fs::read_to_string(&final_path).unwrap();
        assert_eq!(content, "row_index,error\n3,\"Has, comma\"\n");
    }

    #[test]
    fn unfinished_writer_leaves_nothing_behind() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let final_path = temp_dir.path().join("failures.csv");

        {
            let mut writer = AtomicCsvWriter::create(&final_path).unwrap();
            writer.write_record(["row_index"]).unwrap();
        }

        assert!(!final_path.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn root_path_has_no_parent() {
        assert!(matches!(
            AtomicCsvWriter::create("/"),
            Err(AppError::ReportError(_))
        ));
    }
}
