use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::writers::csv_writer::CsvExportWriter;
use super::writers::xlsx_writer::XlsxExportWriter;

/// Output format, picked from the destination's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => ExportFormat::Xlsx,
            _ => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cannot create directory {path:?}: {source}")]
    DirectoryCreation { path: PathBuf, source: io::Error },

    #[error("cannot create file {path:?}: {source}")]
    FileCreation { path: PathBuf, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// What ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub format: ExportFormat,
    pub rows_written: u64,
    pub bytes_written: u64,
    /// Hex SHA-256 of the finished file.
    pub checksum: String,
}

/// Sink for one export file: a header, then rows, then `finish`.
pub trait ExportWriter {
    fn write_header(&mut self, header: &[String]) -> Result<(), WriterError>;
    fn write_row(&mut self, row: &[String]) -> Result<(), WriterError>;
    fn finish(self: Box<Self>) -> Result<(), WriterError>;
}

/// Writer factory for creating format-specific writers
pub struct WriterFactory;

impl WriterFactory {
    pub fn create_writer(format: ExportFormat, file: File) -> Result<Box<dyn ExportWriter>, WriterError> {
        match format {
            ExportFormat::Csv => Ok(Box::new(CsvExportWriter::new(file)?)),
            ExportFormat::Xlsx => Ok(Box::new(XlsxExportWriter::new(file)?)),
        }
    }
}

/// Writes `header` and every row to `destination`, replacing any previous
/// file. Missing parent directories are created first.
pub fn write_export<I>(destination: &Path, header: &[String], rows: I) -> Result<WriteStats, WriterError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let format = ExportFormat::from_path(destination);

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| WriterError::DirectoryCreation {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file = File::create(destination).map_err(|source| WriterError::FileCreation {
        path: destination.to_path_buf(),
        source,
    })?;

    let mut writer = WriterFactory::create_writer(format, file)?;
    writer.write_header(header)?;
    let mut rows_written = 0u64;
    for row in rows {
        writer.write_row(&row)?;
        rows_written += 1;
    }
    writer.finish()?;

    let (bytes_written, checksum) = file_digest(destination)?;
    log::debug!(
        "Wrote {} rows ({} bytes, {:?}) to {:?}",
        rows_written, bytes_written, format, destination
    );

    Ok(WriteStats {
        format,
        rows_written,
        bytes_written,
        checksum,
    })
}

fn file_digest(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut file, &mut hasher)?;
    Ok((bytes, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn header() -> Vec<String> {
        vec!["ID".to_string(), "Name".to_string()]
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.xlsx")), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("a.XLSX")), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("a.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a.txt")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("noext")), ExportFormat::Csv);
    }

    #[test]
    fn creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("a/b/c/out.csv");
        let rows = vec![vec!["1".to_string(), "Ada".to_string()]];

        let stats = write_export(&destination, &header(), rows).unwrap();

        assert!(destination.is_file());
        assert_eq!(stats.rows_written, 1);
        assert_eq!(stats.format, ExportFormat::Csv);
        assert_eq!(stats.bytes_written, std::fs::metadata(&destination).unwrap().len());
        assert_eq!(stats.checksum.len(), 64);
    }

    #[test]
    fn truncates_previous_content() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("out.csv");
        std::fs::write(&destination, "x".repeat(4096)).unwrap();

        write_export(&destination, &header(), Vec::new()).unwrap();

        let mut content = String::new();
        File::open(&destination).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "\u{feff}ID,Name\n");
    }

    #[test]
    fn reports_directory_creation_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let err = write_export(&blocker.join("sub/out.csv"), &header(), Vec::new()).unwrap_err();
        assert!(matches!(err, WriterError::DirectoryCreation { .. }));
    }

    #[test]
    fn reports_file_creation_failure() {
        let dir = TempDir::new().unwrap();
        let taken = dir.path().join("taken.csv");
        std::fs::create_dir(&taken).unwrap();

        let err = write_export(&taken, &header(), Vec::new()).unwrap_err();
        assert!(matches!(err, WriterError::FileCreation { .. }));
    }
}
