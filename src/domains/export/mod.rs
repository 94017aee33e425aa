pub mod display;
pub mod extractor;
pub mod formatter;
pub mod memory;
pub mod packager;
pub mod query_engine;
pub mod repository;
pub mod row_projector;
pub mod service;
pub mod types;
pub mod value;
pub mod writer;
pub mod writers;

#[cfg(test)]
mod test_helpers;

pub use packager::{BatchDownload, ExportFileService};
pub use query_engine::{QueryEngine, QueryError, SqliteQueryEngine};
pub use repository::{ExportTaskRepository, SqliteExportTaskRepository};
pub use service::{BatchSummary, ExportTaskService, ExportTaskServiceImpl, TaskOutcome, TaskReport};
pub use types::{ColumnType, ExportColumn, ExportError, ExportTask, NewExportTask, TaskStatus};
pub use value::{ExportValue, FieldAccessible, SchemaRecord};
