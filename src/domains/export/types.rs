use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::panic::Location;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult, ValidationError};
use crate::validation::{Validate, ValidationBuilder};

pub const MAX_FILE_NAME_LENGTH: usize = 1000;
pub const MAX_ENTITY_TYPE_LENGTH: usize = 1000;
pub const MAX_REMARK_LENGTH: usize = 65535;

/// Semantic type of a column, used to pick a formatting rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    #[default]
    String,
    Number,
    Boolean,
    DateTime,
    Enum,
    /// Any tag the engine has no rule for; formats like `String`.
    Other(String),
}

impl From<String> for ColumnType {
    fn from(tag: String) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "string" => ColumnType::String,
            "number" => ColumnType::Number,
            "boolean" => ColumnType::Boolean,
            "datetime" => ColumnType::DateTime,
            "enum" => ColumnType::Enum,
            _ => ColumnType::Other(tag),
        }
    }
}

impl From<&str> for ColumnType {
    fn from(tag: &str) -> Self {
        ColumnType::from(tag.to_string())
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::String => "string".to_string(),
            ColumnType::Number => "number".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::DateTime => "datetime".to_string(),
            ColumnType::Enum => "enum".to_string(),
            ColumnType::Other(tag) => tag,
        }
    }
}

/// One output column: where to read the value, what to call it, how to format it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportColumn {
    #[serde(default, alias = "field", alias = "property")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
}

impl ExportColumn {
    pub fn new(path: impl Into<String>, label: Option<&str>, column_type: ColumnType) -> Self {
        Self {
            path: path.into(),
            label: label.map(str::to_string),
            column_type,
        }
    }

    /// Header text: label, else path, else `Unknown`.
    pub fn header(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ if !self.path.is_empty() => self.path.as_str(),
            _ => "Unknown",
        }
    }
}

/// Status derived from the persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted request to export a query result into a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTask {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub file: Option<String>,
    pub entity_type: Option<String>,
    pub query: Option<String>,
    pub columns: Vec<ExportColumn>,
    pub remark: Option<String>,
    pub exception: Option<String>,
    pub params: Map<String, JsonValue>,
    pub total_count: Option<i64>,
    pub process_count: Option<i64>,
    pub memory_usage: Option<i64>,
    pub valid: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    pub updated_by_user_id: Option<Uuid>,
}

impl ExportTask {
    pub fn is_completed(&self) -> bool {
        self.valid == Some(true)
    }

    /// Completed with rows on disk.
    pub fn is_downloadable(&self) -> bool {
        match (self.is_completed(), self.total_count, self.process_count) {
            (true, Some(total), Some(processed)) => total > 0 && processed >= total,
            _ => false,
        }
    }

    pub fn status(&self) -> TaskStatus {
        if self.is_completed() {
            TaskStatus::Completed
        } else if self.exception.as_deref().map_or(false, |e| !e.is_empty()) {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        }
    }

    /// Percentage of rows written, once the total is known and non-zero.
    pub fn progress_percentage(&self) -> Option<f64> {
        match self.total_count {
            Some(total) if total > 0 => {
                let processed = self.process_count.unwrap_or(0).max(0);
                Some((processed as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExportTask {
    pub user_id: Option<Uuid>,
    pub file: Option<String>,
    pub entity_type: Option<String>,
    pub query: Option<String>,
    #[serde(default)]
    pub columns: Vec<ExportColumn>,
    pub remark: Option<String>,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
    pub created_by_user_id: Option<Uuid>,
}

impl Validate for NewExportTask {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("query", self.query.clone())
            .required()
            .validate()?;

        ValidationBuilder::new("file", self.file.clone())
            .required()
            .max_length(MAX_FILE_NAME_LENGTH)
            .file_name()
            .validate()?;

        if self.entity_type.is_some() {
            ValidationBuilder::new("entity_type", self.entity_type.clone())
                .max_length(MAX_ENTITY_TYPE_LENGTH)
                .validate()?;
        }

        if self.remark.is_some() {
            ValidationBuilder::new("remark", self.remark.clone())
                .max_length(MAX_REMARK_LENGTH)
                .validate()?;
        }

        ValidationBuilder::new("columns", Some(&self.columns))
            .validate_with(|columns| {
                match columns.iter().position(|c| c.path.trim().is_empty() && c.label.is_none()) {
                    Some(index) => Err(ValidationError::invalid_value(
                        "columns",
                        &format!("column {} has neither a path nor a label", index),
                    )),
                    None => Ok(()),
                }
            })
            .validate()?;

        Ok(())
    }
}

/// Conditions that mean the task or request itself is malformed. These
/// reach the caller instead of being recorded on the task.
#[derive(Debug, Error, Clone, Serialize)]
pub enum ExportError {
    #[error("Export task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Export task has an empty query")]
    EmptyQuery,

    #[error("Export task has an empty file name")]
    EmptyFileName,

    #[error("Failed to create export directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("Failed to create export file: {0}")]
    FileCreationFailed(String),

    #[error("Batch limit must be greater than zero")]
    InvalidLimit,

    #[error("Failed to build download archive: {0}")]
    Archive(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// A runtime failure while processing a task, with the source location it
/// was raised from.
#[derive(Debug, Clone, Error)]
#[error("Export task failed: {message} (file: {file}, line: {line})")]
pub struct ProcessingFault {
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

impl ProcessingFault {
    #[track_caller]
    pub fn new(error: impl fmt::Display) -> Self {
        let location = Location::caller();
        Self {
            message: error.to_string(),
            file: location.file(),
            line: location.line(),
        }
    }

    /// Text stored in the task's `exception` field.
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}
