use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

use crate::domains::core::file_storage_service::ExportFileStorage;
use crate::errors::ServiceResult;
use crate::validation::Validate;

use super::formatter::ValueFormatter;
use super::memory::peak_memory_usage;
use super::query_engine::QueryEngine;
use super::repository::ExportTaskRepository;
use super::row_projector::RowProjector;
use super::types::{ExportError, ExportResult, ExportTask, NewExportTask, ProcessingFault};
use super::writer::{write_export, WriterError};

/// How one task ended inside a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    /// Processing fault, recorded on the task.
    Failed,
    /// Business error or panic; the task was left as it was.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub file: Option<String>,
    pub outcome: TaskOutcome,
}

/// Tally of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub reports: Vec<TaskReport>,
}

impl BatchSummary {
    fn record(&mut self, report: TaskReport) {
        self.total += 1;
        if report.outcome == TaskOutcome::Completed {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.reports.push(report);
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status for a command-line driver.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Processed {} export task(s): {} succeeded, {} failed",
            self.total, self.succeeded, self.failed
        )?;
        for report in &self.reports {
            let file = report.file.as_deref().unwrap_or("-");
            match &report.outcome {
                TaskOutcome::Completed => writeln!(f, "  {} {} completed", report.task_id, file)?,
                TaskOutcome::Failed => writeln!(f, "  {} {} failed", report.task_id, file)?,
                TaskOutcome::Rejected(reason) => writeln!(f, "  {} {} rejected: {}", report.task_id, file, reason)?,
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait ExportTaskService: Send + Sync {
    /// Validates and stores a new pending task.
    async fn create_task(&self, new_task: NewExportTask) -> ServiceResult<ExportTask>;

    async fn get_task(&self, id: Uuid) -> ServiceResult<Option<ExportTask>>;

    async fn completed_tasks(&self, limit: u32) -> ServiceResult<Vec<ExportTask>>;

    /// Runs one task to completion. `Ok(true)` when the task is (or already
    /// was) complete, `Ok(false)` when a processing fault was recorded on it.
    async fn process_export_task(&self, task_id: Uuid, force: bool) -> ExportResult<bool>;

    /// Processes up to `limit` pending tasks, oldest first. With `force`,
    /// completed tasks are selected and regenerated too.
    async fn process_pending_tasks(&self, limit: u32, force: bool) -> ExportResult<BatchSummary>;
}

enum StepError {
    Business(ExportError),
    Fault(ProcessingFault),
}

impl From<ExportError> for StepError {
    fn from(error: ExportError) -> Self {
        StepError::Business(error)
    }
}

impl From<ProcessingFault> for StepError {
    fn from(fault: ProcessingFault) -> Self {
        StepError::Fault(fault)
    }
}

/// Directory and file creation problems are the caller's to fix; anything
/// else the writer hits is recorded on the task.
#[track_caller]
fn classify_write_error(error: WriterError) -> StepError {
    match error {
        WriterError::DirectoryCreation { path, source } => {
            ExportError::DirectoryCreationFailed(format!("{}: {}", path.display(), source)).into()
        }
        WriterError::FileCreation { path, source } => {
            ExportError::FileCreationFailed(format!("{}: {}", path.display(), source)).into()
        }
        other => ProcessingFault::new(other).into(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub struct ExportTaskServiceImpl {
    repo: Arc<dyn ExportTaskRepository>,
    query_engine: Arc<dyn QueryEngine>,
    storage: Arc<dyn ExportFileStorage>,
    formatter: ValueFormatter,
}

impl ExportTaskServiceImpl {
    pub fn new(
        repo: Arc<dyn ExportTaskRepository>,
        query_engine: Arc<dyn QueryEngine>,
        storage: Arc<dyn ExportFileStorage>,
        formatter: ValueFormatter,
    ) -> Self {
        Self {
            repo,
            query_engine,
            storage,
            formatter,
        }
    }

    async fn persist(&self, task: &mut ExportTask) -> Result<(), ProcessingFault> {
        task.updated_at = Utc::now();
        self.repo.save(task).await.map_err(|e| ProcessingFault::new(e))
    }

    async fn run(&self, task: &mut ExportTask) -> Result<(), StepError> {
        let query = non_blank(task.query.as_deref()).ok_or(ExportError::EmptyQuery)?;

        let records = AssertUnwindSafe(self.query_engine.execute(task.entity_type.as_deref(), &query))
            .catch_unwind()
            .await
            .map_err(|payload| ProcessingFault::new(format!("query panicked: {}", panic_message(payload.as_ref()))))?
            .map_err(|e| ProcessingFault::new(e))?;

        let total = records.len() as i64;
        task.total_count = Some(total);
        if task.is_completed() {
            // a regenerated file is not done until it is written again
            task.process_count = Some(0);
            task.valid = Some(false);
        }
        self.persist(task).await?;

        if records.is_empty() {
            task.process_count = Some(0);
            task.valid = Some(true);
            self.persist(task).await?;
            log::info!("Export task {} matched no records, nothing to write", task.id);
            return Ok(());
        }

        let file = non_blank(task.file.as_deref()).ok_or(ExportError::EmptyFileName)?;
        let destination = self
            .storage
            .export_path(&file)
            .map_err(|e| ExportError::FileCreationFailed(e.to_string()))?;
        log::debug!("Export task {} writes {} rows to {:?}", task.id, total, destination);

        let columns = task.columns.clone();
        let formatter = self.formatter.clone();
        let stats = tokio::task::spawn_blocking(move || {
            let projector = RowProjector::new(&columns, &formatter);
            write_export(&destination, &projector.header(), records.iter().map(|r| projector.row(r)))
        })
        .await
        .map_err(|e| ProcessingFault::new(format!("writer task failed: {}", e)))?
        .map_err(|e| classify_write_error(e))?;

        task.process_count = Some(total);
        task.valid = Some(true);
        task.memory_usage = Some(peak_memory_usage().map_or(0, |bytes| bytes as i64));
        self.persist(task).await?;

        log::info!(
            "Export task {} completed: {} rows, {} bytes, sha256 {}",
            task.id, stats.rows_written, stats.bytes_written, stats.checksum
        );
        Ok(())
    }

    /// Stores the diagnostic on the task. A failure to store it is logged and
    /// otherwise ignored.
    async fn record_failure(&self, task: &mut ExportTask, fault: &ProcessingFault) {
        let diagnostic = fault.diagnostic();
        log::error!("Export task {} failed: {}", task.id, diagnostic);

        task.exception = Some(diagnostic);
        task.valid = Some(false);
        task.updated_at = Utc::now();
        if let Err(e) = self.repo.save(task).await {
            log::error!(
                "Could not record failure of export task {}: {} (original error: {})",
                task.id, e, fault.message
            );
        }
    }
}

#[async_trait]
impl ExportTaskService for ExportTaskServiceImpl {
    async fn create_task(&self, new_task: NewExportTask) -> ServiceResult<ExportTask> {
        new_task.validate()?;
        let task = self.repo.create(&new_task).await?;
        log::info!("Queued export task {} ({:?})", task.id, task.file);
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> ServiceResult<Option<ExportTask>> {
        Ok(self.repo.find_by_id(id).await?)
    }

    async fn completed_tasks(&self, limit: u32) -> ServiceResult<Vec<ExportTask>> {
        Ok(self.repo.find_completed(limit).await?)
    }

    async fn process_export_task(&self, task_id: Uuid, force: bool) -> ExportResult<bool> {
        let mut task = self
            .repo
            .find_by_id(task_id)
            .await?
            .ok_or(ExportError::TaskNotFound(task_id))?;

        if task.is_completed() && !force {
            log::info!("Export task {} already completed, skipping", task_id);
            return Ok(true);
        }

        log::info!("Processing export task {} ({:?})", task_id, task.file);
        match self.run(&mut task).await {
            Ok(()) => Ok(true),
            Err(StepError::Business(error)) => {
                log::warn!("Export task {} rejected: {}", task_id, error);
                Err(error)
            }
            Err(StepError::Fault(fault)) => {
                self.record_failure(&mut task, &fault).await;
                Ok(false)
            }
        }
    }

    async fn process_pending_tasks(&self, limit: u32, force: bool) -> ExportResult<BatchSummary> {
        if limit == 0 {
            return Err(ExportError::InvalidLimit);
        }

        let tasks = self.repo.find_pending(limit, force).await?;
        log::info!("Found {} export task(s) to process", tasks.len());

        let mut summary = BatchSummary::default();
        for task in tasks {
            let outcome = match AssertUnwindSafe(self.process_export_task(task.id, force))
                .catch_unwind()
                .await
            {
                Ok(Ok(true)) => TaskOutcome::Completed,
                Ok(Ok(false)) => TaskOutcome::Failed,
                Ok(Err(error)) => TaskOutcome::Rejected(error.to_string()),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Export task {} panicked: {}", task.id, message);
                    TaskOutcome::Rejected(format!("panicked: {}", message))
                }
            };
            summary.record(TaskReport {
                task_id: task.id,
                file: task.file.clone(),
                outcome,
            });
        }

        log::info!(
            "Batch finished: {} succeeded, {} failed, {} total",
            summary.succeeded, summary.failed, summary.total
        );
        Ok(summary)
    }
}
