use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;

use super::formatter::parse_datetime_text;
use super::value::ExportValue;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported query: {0}")]
    Unsupported(String),
}

/// Turns a task's opaque query into records. All records are returned at
/// once.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, entity_type: Option<&str>, query: &str) -> Result<Vec<ExportValue>, QueryError>;
}

/// Runs the query as SQL against a SQLite pool. Each row becomes a map;
/// dotted column aliases such as `"user.name"` nest into sub-maps.
pub struct SqliteQueryEngine {
    pool: SqlitePool,
}

impl SqliteQueryEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryEngine for SqliteQueryEngine {
    async fn execute(&self, entity_type: Option<&str>, query: &str) -> Result<Vec<ExportValue>, QueryError> {
        let trimmed = query.trim_start();
        let read_only = ["select", "with"]
            .iter()
            .any(|kw| trimmed.get(..kw.len()).map_or(false, |head| head.eq_ignore_ascii_case(kw)));
        if !read_only {
            return Err(QueryError::Unsupported(format!(
                "only SELECT queries can be exported (entity: {})",
                entity_type.unwrap_or("-")
            )));
        }

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        log::debug!("Query for {:?} returned {} rows", entity_type, rows.len());
        rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<ExportValue, sqlx::Error> {
    let mut entries: Vec<(String, ExportValue)> = Vec::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_value(row, index, column.type_info().name())?;
        insert_path(&mut entries, column.name(), value);
    }
    Ok(ExportValue::Map(entries))
}

fn column_value(row: &SqliteRow, index: usize, declared: &str) -> Result<ExportValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(ExportValue::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    let declared = declared.to_ascii_uppercase();

    let value = match (declared.as_str(), storage.as_str()) {
        ("BOOLEAN", "INTEGER") => ExportValue::Bool(row.try_get_unchecked::<i64, _>(index)? != 0),
        ("DATETIME" | "TIMESTAMP" | "DATE", "TEXT") => {
            let text: String = row.try_get_unchecked(index)?;
            match parse_datetime_text(&text) {
                Some(dt) => ExportValue::DateTime(dt),
                None => ExportValue::Text(text),
            }
        }
        (_, "INTEGER" | "INT8" | "BIGINT") => ExportValue::Int(row.try_get_unchecked::<i64, _>(index)?),
        (_, "REAL" | "FLOAT" | "DOUBLE") => ExportValue::Float(row.try_get_unchecked::<f64, _>(index)?),
        (_, "BLOB") => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            ExportValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => ExportValue::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Inserts `value` at a dotted `path`, creating intermediate maps.
fn insert_path(entries: &mut Vec<(String, ExportValue)>, path: &str, value: ExportValue) {
    match path.split_once('.') {
        None => match entries.iter_mut().find(|(k, _)| k == path) {
            Some((_, slot)) => *slot = value,
            None => entries.push((path.to_string(), value)),
        },
        Some((head, rest)) => {
            let position = entries.iter().position(|(k, _)| k == head);
            let index = match position {
                Some(i) => {
                    if !matches!(entries[i].1, ExportValue::Map(_)) {
                        entries[i].1 = ExportValue::Map(Vec::new());
                    }
                    i
                }
                None => {
                    entries.push((head.to_string(), ExportValue::Map(Vec::new())));
                    entries.len() - 1
                }
            };
            if let ExportValue::Map(children) = &mut entries[index].1 {
                insert_path(children, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::extractor::extract;
    use crate::domains::export::test_helpers::{memory_pool, seed_users};

    #[tokio::test]
    async fn rows_become_nested_maps() {
        let pool = memory_pool().await;
        seed_users(&pool).await;
        let engine = SqliteQueryEngine::new(pool);

        let records = engine
            .execute(
                Some("users"),
                r#"SELECT id, name AS "profile.name", active, joined_at, score FROM users ORDER BY id"#,
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        let first = &records[0];
        assert_eq!(extract(first, "id"), ExportValue::Int(1));
        assert_eq!(extract(first, "profile.name"), ExportValue::Text("Ada".into()));
        assert_eq!(extract(first, "active"), ExportValue::Bool(true));
        assert!(matches!(extract(first, "joined_at"), ExportValue::DateTime(_)));
        assert_eq!(extract(first, "score"), ExportValue::Float(1234.5));
        assert_eq!(extract(&records[2], "joined_at"), ExportValue::Null);
    }

    #[tokio::test]
    async fn rejects_statements_that_modify_data() {
        let engine = SqliteQueryEngine::new(memory_pool().await);
        let err = engine.execute(None, "DELETE FROM export_tasks").await.unwrap_err();
        assert!(matches!(err, QueryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn invalid_sql_is_a_database_error() {
        let engine = SqliteQueryEngine::new(memory_pool().await);
        let err = engine.execute(None, "SELECT * FROM missing_table").await.unwrap_err();
        assert!(matches!(err, QueryError::Database(_)));
    }

    #[test]
    fn insert_path_merges_siblings() {
        let mut entries = Vec::new();
        insert_path(&mut entries, "user.name", ExportValue::Text("Ada".into()));
        insert_path(&mut entries, "user.id", ExportValue::Int(1));
        insert_path(&mut entries, "id", ExportValue::Int(9));

        let record = ExportValue::Map(entries);
        assert_eq!(extract(&record, "user.name"), ExportValue::Text("Ada".into()));
        assert_eq!(extract(&record, "user.id"), ExportValue::Int(1));
        assert_eq!(extract(&record, "id"), ExportValue::Int(9));
    }
}
