use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{DbError, DomainError, DomainResult};

use super::types::{ExportColumn, ExportTask, NewExportTask};

#[async_trait]
pub trait ExportTaskRepository: Send + Sync {
    async fn create(&self, new_task: &NewExportTask) -> DomainResult<ExportTask>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<ExportTask>>;
    async fn find_by_ids(&self, ids: &[Uuid]) -> DomainResult<Vec<ExportTask>>;
    /// Persists every mutable field of an existing task.
    async fn save(&self, task: &ExportTask) -> DomainResult<()>;
    /// Oldest first. Without `include_completed` only tasks whose `valid`
    /// flag is unset or false are returned.
    async fn find_pending(&self, limit: u32, include_completed: bool) -> DomainResult<Vec<ExportTask>>;
    /// Downloadable tasks, newest first.
    async fn find_completed(&self, limit: u32) -> DomainResult<Vec<ExportTask>>;
}

pub struct SqliteExportTaskRepository {
    pool: SqlitePool,
}

impl SqliteExportTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, user_id, file, entity_type, query, columns, remark, exception, params, \
    total_count, process_count, memory_usage, valid, created_at, updated_at, created_by_user_id, updated_by_user_id \
    FROM export_tasks";

#[derive(sqlx::FromRow)]
struct Row {
    id: String,
    user_id: Option<String>,
    file: Option<String>,
    entity_type: Option<String>,
    query: Option<String>,
    columns: String,
    remark: Option<String>,
    exception: Option<String>,
    params: String,
    total_count: Option<i64>,
    process_count: Option<i64>,
    memory_usage: Option<i64>,
    valid: Option<bool>,
    created_at: String,
    updated_at: String,
    created_by_user_id: Option<String>,
    updated_by_user_id: Option<String>,
}

impl Row {
    fn into_task(self) -> DomainResult<ExportTask> {
        let columns: Vec<ExportColumn> = serde_json::from_str(&self.columns)
            .map_err(|e| DbError::Decode(format!("export_tasks.columns for {}: {}", self.id, e)))?;
        let params = match serde_json::from_str::<JsonValue>(&self.params) {
            Ok(JsonValue::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                return Err(DbError::Decode(format!("export_tasks.params for {}: {}", self.id, e)).into())
            }
        };

        Ok(ExportTask {
            id: parse_uuid(&self.id)?,
            user_id: parse_optional_uuid(self.user_id)?,
            file: self.file,
            entity_type: self.entity_type,
            query: self.query,
            columns,
            remark: self.remark,
            exception: self.exception,
            params,
            total_count: self.total_count,
            process_count: self.process_count,
            memory_usage: self.memory_usage,
            valid: self.valid,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by_user_id: parse_optional_uuid(self.created_by_user_id)?,
            updated_by_user_id: parse_optional_uuid(self.updated_by_user_id)?,
        })
    }
}

fn parse_uuid(value: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| DomainError::InvalidUuid(format!("{}: {}", value, e)))
}

fn parse_optional_uuid(value: Option<String>) -> DomainResult<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_timestamp(value: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Decode(format!("bad timestamp {}: {}", value, e)).into())
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_json<T: serde::Serialize>(value: &T) -> DomainResult<String> {
    serde_json::to_string(value).map_err(|e| DomainError::Internal(format!("JSON encoding failed: {}", e)))
}

fn rows_into_tasks(rows: Vec<Row>) -> DomainResult<Vec<ExportTask>> {
    rows.into_iter().map(Row::into_task).collect()
}

#[async_trait]
impl ExportTaskRepository for SqliteExportTaskRepository {
    async fn create(&self, new_task: &NewExportTask) -> DomainResult<ExportTask> {
        let now = Utc::now();
        let task = ExportTask {
            id: Uuid::new_v4(),
            user_id: new_task.user_id,
            file: new_task.file.clone(),
            entity_type: new_task.entity_type.clone(),
            query: new_task.query.clone(),
            columns: new_task.columns.clone(),
            remark: new_task.remark.clone(),
            exception: None,
            params: new_task.params.clone(),
            total_count: None,
            process_count: Some(0),
            memory_usage: Some(0),
            valid: Some(false),
            created_at: now,
            updated_at: now,
            created_by_user_id: new_task.created_by_user_id,
            updated_by_user_id: new_task.created_by_user_id,
        };

        sqlx::query(
            "INSERT INTO export_tasks (id, user_id, file, entity_type, query, columns, remark, exception, params, \
             total_count, process_count, memory_usage, valid, created_at, updated_at, created_by_user_id, updated_by_user_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.user_id.map(|u| u.to_string()))
        .bind(&task.file)
        .bind(&task.entity_type)
        .bind(&task.query)
        .bind(encode_json(&task.columns)?)
        .bind(&task.remark)
        .bind(&task.exception)
        .bind(encode_json(&task.params)?)
        .bind(task.total_count)
        .bind(task.process_count)
        .bind(task.memory_usage)
        .bind(task.valid)
        .bind(format_timestamp(&task.created_at))
        .bind(format_timestamp(&task.updated_at))
        .bind(task.created_by_user_id.map(|u| u.to_string()))
        .bind(task.updated_by_user_id.map(|u| u.to_string()))
        .execute(&self.pool)
        .await?;

        log::debug!("Created export task {} for file {:?}", task.id, task.file);
        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<ExportTask>> {
        let row: Option<Row> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Row::into_task).transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> DomainResult<Vec<ExportTask>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{} WHERE id IN ({}) ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS, placeholders
        );
        let mut query = sqlx::query_as::<_, Row>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        rows_into_tasks(query.fetch_all(&self.pool).await?)
    }

    async fn save(&self, task: &ExportTask) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE export_tasks SET user_id = ?, file = ?, entity_type = ?, query = ?, columns = ?, remark = ?, \
             exception = ?, params = ?, total_count = ?, process_count = ?, memory_usage = ?, valid = ?, \
             updated_at = ?, updated_by_user_id = ? WHERE id = ?",
        )
        .bind(task.user_id.map(|u| u.to_string()))
        .bind(&task.file)
        .bind(&task.entity_type)
        .bind(&task.query)
        .bind(encode_json(&task.columns)?)
        .bind(&task.remark)
        .bind(&task.exception)
        .bind(encode_json(&task.params)?)
        .bind(task.total_count)
        .bind(task.process_count)
        .bind(task.memory_usage)
        .bind(task.valid)
        .bind(format_timestamp(&task.updated_at))
        .bind(task.updated_by_user_id.map(|u| u.to_string()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EntityNotFound("ExportTask".to_string(), task.id));
        }
        Ok(())
    }

    async fn find_pending(&self, limit: u32, include_completed: bool) -> DomainResult<Vec<ExportTask>> {
        let rows: Vec<Row> = sqlx::query_as(&format!(
            "{} WHERE (? OR valid IS NULL OR valid = 0) ORDER BY created_at ASC, rowid ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(include_completed)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows_into_tasks(rows)
    }

    async fn find_completed(&self, limit: u32) -> DomainResult<Vec<ExportTask>> {
        let rows: Vec<Row> = sqlx::query_as(&format!(
            "{} WHERE valid = 1 AND total_count > 0 AND process_count >= total_count \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows_into_tasks(rows)
    }
}
