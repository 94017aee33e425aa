use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs; // Use tokio::fs for async file operations

#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid path component: {0}")]
    InvalidPathComponent(String),
}

pub type FileStorageResult<T> = Result<T, FileStorageError>;

const EXPORT_SUBDIR: &str = "export";
const PUBLIC_EXPORT_SUBDIR: &str = "public/exports";
const TEMP_SUBDIR: &str = "tmp";

/// Where generated export files and download archives live.
#[async_trait]
pub trait ExportFileStorage: Send + Sync {
    /// Absolute destination for a task's output file.
    fn export_path(&self, file_name: &str) -> FileStorageResult<PathBuf>;

    /// Directory for archives and placeholder files.
    fn temp_dir(&self) -> PathBuf;

    /// Location of `file_name` inside the temp directory.
    fn temp_path(&self, file_name: &str) -> FileStorageResult<PathBuf>;

    /// Creates the temp directory if needed and returns it.
    async fn ensure_temp_dir(&self) -> FileStorageResult<PathBuf>;

    /// Looks the file up in every candidate directory, first hit wins.
    async fn resolve_file(&self, file_name: &str) -> Option<PathBuf>;
}

// --- Local File Storage Implementation ---

pub struct LocalExportStorage {
    base_path: PathBuf,
}

impl LocalExportStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Candidate directories, in lookup order.
    pub fn candidate_dirs(&self) -> Vec<PathBuf> {
        [EXPORT_SUBDIR, PUBLIC_EXPORT_SUBDIR, TEMP_SUBDIR]
            .iter()
            .map(|subdir| self.base_path.join(subdir))
            .collect()
    }

    /// Accepts relative paths made of plain components only.
    fn sanitize_relative(file_name: &str) -> Result<PathBuf, FileStorageError> {
        let path = Path::new(file_name);
        let plain = !file_name.trim().is_empty()
            && path.components().all(|c| matches!(c, Component::Normal(_)));
        if plain {
            Ok(path.to_path_buf())
        } else {
            Err(FileStorageError::InvalidPathComponent(file_name.to_string()))
        }
    }
}

#[async_trait]
impl ExportFileStorage for LocalExportStorage {
    fn export_path(&self, file_name: &str) -> FileStorageResult<PathBuf> {
        let relative = Self::sanitize_relative(file_name)?;
        Ok(self.base_path.join(EXPORT_SUBDIR).join(relative))
    }

    fn temp_dir(&self) -> PathBuf {
        self.base_path.join(TEMP_SUBDIR)
    }

    fn temp_path(&self, file_name: &str) -> FileStorageResult<PathBuf> {
        let relative = Self::sanitize_relative(file_name)?;
        Ok(self.temp_dir().join(relative))
    }

    async fn ensure_temp_dir(&self) -> FileStorageResult<PathBuf> {
        let dir = self.temp_dir();
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn resolve_file(&self, file_name: &str) -> Option<PathBuf> {
        let relative = Self::sanitize_relative(file_name).ok()?;
        for dir in self.candidate_dirs() {
            let candidate = dir.join(&relative);
            if fs::metadata(&candidate).await.map(|m| m.is_file()).unwrap_or(false) {
                log::debug!("Resolved export file {} to {:?}", file_name, candidate);
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn export_path_rejects_traversal() {
        let storage = LocalExportStorage::new("/data");
        assert_eq!(
            storage.export_path("report.csv").unwrap(),
            PathBuf::from("/data/export/report.csv")
        );
        assert_eq!(
            storage.export_path("monthly/report.csv").unwrap(),
            PathBuf::from("/data/export/monthly/report.csv")
        );
        assert!(storage.export_path("../escape.csv").is_err());
        assert!(storage.export_path("/etc/passwd").is_err());
        assert!(storage.export_path("").is_err());
        assert_eq!(storage.temp_path("a.csv").unwrap(), PathBuf::from("/data/tmp/a.csv"));
        assert!(storage.temp_path("a/../../b.csv").is_err());
    }

    #[tokio::test]
    async fn resolve_file_checks_candidates_in_order() {
        let dir = TempDir::new().unwrap();
        let storage = LocalExportStorage::new(dir.path());

        assert!(storage.resolve_file("a.csv").await.is_none());

        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        std::fs::write(dir.path().join("tmp/a.csv"), b"tmp").unwrap();
        assert_eq!(storage.resolve_file("a.csv").await, Some(dir.path().join("tmp/a.csv")));

        std::fs::create_dir_all(dir.path().join("public/exports")).unwrap();
        std::fs::write(dir.path().join("public/exports/a.csv"), b"public").unwrap();
        assert_eq!(
            storage.resolve_file("a.csv").await,
            Some(dir.path().join("public/exports/a.csv"))
        );

        std::fs::create_dir_all(dir.path().join("export")).unwrap();
        std::fs::write(dir.path().join("export/a.csv"), b"export").unwrap();
        assert_eq!(storage.resolve_file("a.csv").await, Some(dir.path().join("export/a.csv")));
    }

    #[tokio::test]
    async fn resolve_file_ignores_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("export/a.csv")).unwrap();
        let storage = LocalExportStorage::new(dir.path());
        assert!(storage.resolve_file("a.csv").await.is_none());
    }

    #[tokio::test]
    async fn ensure_temp_dir_creates_directory() {
        let dir = TempDir::new().unwrap();
        let storage = LocalExportStorage::new(dir.path().join("nested/root"));
        let tmp = storage.ensure_temp_dir().await.unwrap();
        assert!(tmp.is_dir());
        assert_eq!(tmp, dir.path().join("nested/root/tmp"));
    }
}
