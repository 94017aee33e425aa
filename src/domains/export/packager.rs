use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domains::core::file_storage_service::ExportFileStorage;

use super::types::{ExportError, ExportResult, ExportTask};
use super::writer::write_export;

const ARCHIVE_PREFIX: &str = "export_files_";
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// What a download request resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchDownload {
    Empty,
    Single { path: PathBuf, filename: String },
    Zip { path: PathBuf, filename: String },
}

/// Locates generated files and packages them for download.
pub struct ExportFileService {
    storage: Arc<dyn ExportFileStorage>,
    demo_fallback: bool,
}

impl ExportFileService {
    pub fn new(storage: Arc<dyn ExportFileStorage>, demo_fallback: bool) -> Self {
        Self { storage, demo_fallback }
    }

    /// Path of a finished task's file, if one can be found.
    pub async fn prepare_single_file(&self, task: &ExportTask) -> Option<PathBuf> {
        if !task.is_downloadable() {
            return None;
        }
        self.locate(task.file.as_deref()?).await
    }

    pub async fn prepare_batch_download(&self, tasks: &[ExportTask]) -> ExportResult<BatchDownload> {
        match tasks {
            [] => Ok(BatchDownload::Empty),
            [task] => Ok(self.single(task).await),
            _ => self.archive(tasks).await,
        }
    }

    async fn single(&self, task: &ExportTask) -> BatchDownload {
        let Some(filename) = declared_file(task) else {
            return BatchDownload::Empty;
        };
        match self.locate(&filename).await {
            Some(path) => BatchDownload::Single { path, filename },
            None => BatchDownload::Empty,
        }
    }

    async fn archive(&self, tasks: &[ExportTask]) -> ExportResult<BatchDownload> {
        let mut seen = HashSet::new();
        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for task in tasks {
            let Some(name) = declared_file(task) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                log::warn!("Skipping duplicate archive entry {} (task {})", name, task.id);
                continue;
            }
            match self.locate(&name).await {
                Some(path) => entries.push((name, path)),
                None => log::warn!("No file found for export task {} ({})", task.id, name),
            }
        }

        if entries.is_empty() {
            return Ok(BatchDownload::Empty);
        }

        let temp_dir = self
            .storage
            .ensure_temp_dir()
            .await
            .map_err(|e| ExportError::DirectoryCreationFailed(e.to_string()))?;
        let filename = archive_name();
        let path = temp_dir.join(&filename);

        let target = path.clone();
        let count = entries.len();
        tokio::task::spawn_blocking(move || write_archive(&target, &entries))
            .await
            .map_err(|e| ExportError::Archive(e.to_string()))?
            .map_err(|e| ExportError::Archive(e.to_string()))?;

        log::info!("Packaged {} export file(s) into {:?}", count, path);
        Ok(BatchDownload::Zip { path, filename })
    }

    async fn locate(&self, file_name: &str) -> Option<PathBuf> {
        if let Some(path) = self.storage.resolve_file(file_name).await {
            return Some(path);
        }
        if !self.demo_fallback {
            return None;
        }
        match self.write_placeholder(file_name).await {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Could not create placeholder for {}: {}", file_name, e);
                None
            }
        }
    }

    /// Writes a small sample file under the temp directory so downloads can
    /// be tried out before any real export exists.
    async fn write_placeholder(&self, file_name: &str) -> Result<PathBuf, String> {
        let path = self.storage.temp_path(file_name).map_err(|e| e.to_string())?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            let header = to_row(&["ID", "Name", "Created At", "Status"]);
            let rows = vec![
                to_row(&["1", "user001", "2024-01-01 10:00:00", "Approved"]),
                to_row(&["2", "user002", "2024-01-02 11:00:00", "Pending"]),
                to_row(&["3", "user003", "2024-01-03 12:00:00", "Rejected"]),
            ];
            write_export(&target, &header, rows)
        })
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

        log::info!("Created placeholder export file {:?}", path);
        Ok(path)
    }
}

/// `export_files_<local time>_<8 hex>.zip`; the suffix keeps archives built
/// within the same second apart.
fn archive_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}_{}.zip",
        ARCHIVE_PREFIX,
        Local::now().format(ARCHIVE_TIMESTAMP_FORMAT),
        &suffix[..8]
    )
}

fn declared_file(task: &ExportTask) -> Option<String> {
    task.file.as_deref().filter(|f| !f.is_empty()).map(str::to_string)
}

fn to_row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

fn write_archive(path: &Path, entries: &[(String, PathBuf)]) -> zip::result::ZipResult<()> {
    let file = File::options().write(true).create_new(true).open(path)?;
    let result = fill_archive(ZipWriter::new(file), entries);
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn fill_archive(mut zip: ZipWriter<File>, entries: &[(String, PathBuf)]) -> zip::result::ZipResult<()> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, source) in entries {
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut File::open(source)?, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::file_storage_service::LocalExportStorage;
    use chrono::Utc;
    use serde_json::Map;
    use std::io::Read;
    use tempfile::TempDir;

    fn completed(file: &str) -> ExportTask {
        let now = Utc::now();
        ExportTask {
            id: Uuid::new_v4(),
            user_id: None,
            file: Some(file.to_string()),
            entity_type: None,
            query: Some("SELECT 1".to_string()),
            columns: Vec::new(),
            remark: None,
            exception: None,
            params: Map::new(),
            total_count: Some(2),
            process_count: Some(2),
            memory_usage: Some(0),
            valid: Some(true),
            created_at: now,
            updated_at: now,
            created_by_user_id: None,
            updated_by_user_id: None,
        }
    }

    fn service(root: &Path, demo_fallback: bool) -> ExportFileService {
        ExportFileService::new(Arc::new(LocalExportStorage::new(root)), demo_fallback)
    }

    fn put(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn no_tasks_is_empty() {
        let dir = TempDir::new().unwrap();
        let result = service(dir.path(), false).prepare_batch_download(&[]).await.unwrap();
        assert_eq!(result, BatchDownload::Empty);
    }

    #[tokio::test]
    async fn one_task_resolves_to_its_file() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "public/exports/a.csv", "a");

        let result = service(dir.path(), false)
            .prepare_batch_download(&[completed("a.csv")])
            .await
            .unwrap();
        assert_eq!(
            result,
            BatchDownload::Single {
                path: dir.path().join("public/exports/a.csv"),
                filename: "a.csv".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn one_task_without_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let result = service(dir.path(), false)
            .prepare_batch_download(&[completed("missing.csv")])
            .await
            .unwrap();
        assert_eq!(result, BatchDownload::Empty);
    }

    #[tokio::test]
    async fn several_tasks_are_zipped() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "export/a.csv", "first");
        put(dir.path(), "tmp/b.csv", "second");

        let tasks = [completed("a.csv"), completed("b.csv"), completed("gone.csv"), completed("a.csv")];
        let result = service(dir.path(), false).prepare_batch_download(&tasks).await.unwrap();

        let BatchDownload::Zip { path, filename } = result else {
            panic!("expected an archive");
        };
        assert!(filename.starts_with("export_files_") && filename.ends_with(".zip"));
        assert_eq!(filename.len(), "export_files_2024-01-01_00-00-00_0123abcd.zip".len());
        assert_eq!(path, dir.path().join("tmp").join(&filename));

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive.by_name("a.csv").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "first");
        assert_eq!(archive.by_name("b.csv").unwrap().compression(), CompressionMethod::Deflated);
    }

    #[tokio::test]
    async fn archives_built_back_to_back_do_not_collide() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "export/a.csv", "first");
        put(dir.path(), "export/b.csv", "second");
        let svc = service(dir.path(), false);
        let tasks = [completed("a.csv"), completed("b.csv")];

        let mut paths = Vec::new();
        for _ in 0..3 {
            match svc.prepare_batch_download(&tasks).await.unwrap() {
                BatchDownload::Zip { path, .. } => paths.push(path),
                other => panic!("expected an archive, got {:?}", other),
            }
        }
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        for path in &paths {
            assert_eq!(zip::ZipArchive::new(File::open(path).unwrap()).unwrap().len(), 2);
        }
    }

    #[test]
    fn failed_archive_is_removed_and_existing_archive_kept() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        let entries = vec![("a.csv".to_string(), dir.path().join("vanished.csv"))];
        assert!(write_archive(&target, &entries).is_err());
        assert!(!target.exists());

        std::fs::write(&target, b"earlier archive").unwrap();
        assert!(write_archive(&target, &[]).is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"earlier archive");
    }

    #[tokio::test]
    async fn archive_without_entries_is_empty() {
        let dir = TempDir::new().unwrap();
        let tasks = [completed("x.csv"), completed("y.csv")];
        let result = service(dir.path(), false).prepare_batch_download(&tasks).await.unwrap();
        assert_eq!(result, BatchDownload::Empty);
        let leftovers = std::fs::read_dir(dir.path().join("tmp")).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn single_file_requires_finished_task() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "export/a.csv", "a");
        let svc = service(dir.path(), false);

        assert_eq!(svc.prepare_single_file(&completed("a.csv")).await, Some(dir.path().join("export/a.csv")));

        let mut unfinished = completed("a.csv");
        unfinished.process_count = Some(1);
        assert_eq!(svc.prepare_single_file(&unfinished).await, None);

        let mut empty = completed("a.csv");
        empty.total_count = Some(0);
        empty.process_count = Some(0);
        assert_eq!(svc.prepare_single_file(&empty).await, None);
    }

    #[tokio::test]
    async fn demo_fallback_writes_placeholders() {
        let dir = TempDir::new().unwrap();
        let svc = service(dir.path(), true);

        let path = svc.prepare_single_file(&completed("sample.csv")).await.unwrap();
        assert_eq!(path, dir.path().join("tmp/sample.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("\u{feff}ID,Name,Created At,Status\n1,user001,"));

        let path = svc.prepare_single_file(&completed("sample.xlsx")).await.unwrap();
        let archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert!(archive.file_names().any(|n| n == "xl/worksheets/sheet1.xml"));

        assert_eq!(svc.prepare_single_file(&completed("../escape.csv")).await, None);
    }
}
