use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};

use super::query_engine::{QueryEngine, QueryError};
use super::repository::ExportTaskRepository;
use super::types::{ExportTask, NewExportTask};
use super::value::ExportValue;

/// Single-connection in-memory database with the schema applied.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db_migration::run_migrations(&pool).await.unwrap();
    pool
}

pub fn new_task(file: &str, query: &str) -> NewExportTask {
    NewExportTask {
        file: Some(file.to_string()),
        query: Some(query.to_string()),
        ..Default::default()
    }
}

pub async fn seed_users(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active BOOLEAN NOT NULL, \
         joined_at DATETIME NULL, score REAL NULL);
         INSERT INTO users VALUES (1, 'Ada', 1, '2024-01-02 03:04:05', 1234.5);
         INSERT INTO users VALUES (2, 'Grace', 0, '2024-02-03 04:05:06', 0.125);
         INSERT INTO users VALUES (3, 'Linus', 1, NULL, NULL);",
    )
    .execute(pool)
    .await
    .unwrap();
}

/// Returns the same records for every query and counts calls.
pub struct StaticQueryEngine {
    records: Vec<ExportValue>,
    calls: AtomicUsize,
}

impl StaticQueryEngine {
    pub fn new(records: Vec<ExportValue>) -> Arc<Self> {
        Arc::new(Self { records, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for StaticQueryEngine {
    async fn execute(&self, _entity_type: Option<&str>, _query: &str) -> Result<Vec<ExportValue>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// Fails every query whose text contains `"fail"`, otherwise returns one row.
pub struct SelectiveQueryEngine;

#[async_trait]
impl QueryEngine for SelectiveQueryEngine {
    async fn execute(&self, _entity_type: Option<&str>, query: &str) -> Result<Vec<ExportValue>, QueryError> {
        if query.contains("fail") {
            Err(QueryError::Unsupported("connection refused".to_string()))
        } else {
            Ok(vec![ExportValue::map([("id", ExportValue::Int(1))])])
        }
    }
}

/// Panics on every query.
pub struct PanickingQueryEngine;

#[async_trait]
impl QueryEngine for PanickingQueryEngine {
    async fn execute(&self, _entity_type: Option<&str>, _query: &str) -> Result<Vec<ExportValue>, QueryError> {
        panic!("query engine exploded");
    }
}

/// Delegates to an inner repository but rejects saves once `fail_saves_after`
/// successful saves have happened.
pub struct FlakyRepository {
    inner: Arc<dyn ExportTaskRepository>,
    saves: AtomicUsize,
    fail_saves_after: usize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<dyn ExportTaskRepository>, fail_saves_after: usize) -> Self {
        Self { inner, saves: AtomicUsize::new(0), fail_saves_after }
    }
}

#[async_trait]
impl ExportTaskRepository for FlakyRepository {
    async fn create(&self, new_task: &NewExportTask) -> DomainResult<ExportTask> {
        self.inner.create(new_task).await
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<ExportTask>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> DomainResult<Vec<ExportTask>> {
        self.inner.find_by_ids(ids).await
    }

    async fn save(&self, task: &ExportTask) -> DomainResult<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.fail_saves_after {
            return Err(DomainError::Internal("database is locked".to_string()));
        }
        self.inner.save(task).await
    }

    async fn find_pending(&self, limit: u32, include_completed: bool) -> DomainResult<Vec<ExportTask>> {
        self.inner.find_pending(limit, include_completed).await
    }

    async fn find_completed(&self, limit: u32) -> DomainResult<Vec<ExportTask>> {
        self.inner.find_completed(limit).await
    }
}
