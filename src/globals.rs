use lazy_static::lazy_static;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::domains::core::file_storage_service::{ExportFileStorage, LocalExportStorage};
use crate::domains::export::formatter::ValueFormatter;
use crate::domains::export::packager::ExportFileService;
use crate::domains::export::query_engine::{QueryEngine, SqliteQueryEngine};
use crate::domains::export::repository::{ExportTaskRepository, SqliteExportTaskRepository};
use crate::domains::export::service::{ExportTaskService, ExportTaskServiceImpl};
use crate::errors::{DomainError, ServiceError, ServiceResult};
use crate::types::ExportConfig;

// Global state definitions
lazy_static! {
    static ref INIT_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
    static ref INITIALIZED: AtomicBool = AtomicBool::new(false);

    static ref DB_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);
    static ref CONFIG: Mutex<Option<ExportConfig>> = Mutex::new(None);

    static ref EXPORT_TASK_REPO: Mutex<Option<Arc<dyn ExportTaskRepository>>> = Mutex::new(None);
    static ref QUERY_ENGINE: Mutex<Option<Arc<dyn QueryEngine>>> = Mutex::new(None);
    static ref FILE_STORAGE: Mutex<Option<Arc<dyn ExportFileStorage>>> = Mutex::new(None);
    static ref EXPORT_TASK_SERVICE: Mutex<Option<Arc<dyn ExportTaskService>>> = Mutex::new(None);
    static ref EXPORT_FILE_SERVICE: Mutex<Option<Arc<ExportFileService>>> = Mutex::new(None);
}

fn read_slot<T: Clone>(slot: &Mutex<Option<T>>, name: &str) -> ServiceResult<T> {
    slot.lock()
        .map_err(|_| ServiceError::Configuration(format!("{} lock poisoned", name)))?
        .clone()
        .ok_or_else(|| ServiceError::Configuration(format!("{} not initialized", name)))
}

fn store_slot<T>(slot: &Mutex<Option<T>>, name: &str, value: T) -> ServiceResult<()> {
    *slot
        .lock()
        .map_err(|_| ServiceError::Configuration(format!("{} lock poisoned", name)))? = Some(value);
    Ok(())
}

// --- Getter Functions ---

pub fn get_db_pool() -> ServiceResult<SqlitePool> {
    read_slot(&DB_POOL, "Database pool")
}
pub fn get_config() -> ServiceResult<ExportConfig> {
    read_slot(&CONFIG, "ExportConfig")
}
pub fn get_export_task_repo() -> ServiceResult<Arc<dyn ExportTaskRepository>> {
    read_slot(&EXPORT_TASK_REPO, "ExportTaskRepository")
}
pub fn get_query_engine() -> ServiceResult<Arc<dyn QueryEngine>> {
    read_slot(&QUERY_ENGINE, "QueryEngine")
}
pub fn get_file_storage() -> ServiceResult<Arc<dyn ExportFileStorage>> {
    read_slot(&FILE_STORAGE, "ExportFileStorage")
}
pub fn get_export_task_service() -> ServiceResult<Arc<dyn ExportTaskService>> {
    read_slot(&EXPORT_TASK_SERVICE, "ExportTaskService")
}
pub fn get_export_file_service() -> ServiceResult<Arc<ExportFileService>> {
    read_slot(&EXPORT_FILE_SERVICE, "ExportFileService")
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Connects to the database, applies migrations and wires the export
/// services. Later calls are no-ops once a call has succeeded.
pub async fn initialize(db_url: &str, config: ExportConfig) -> ServiceResult<()> {
    // Acquire the async mutex to ensure single initialization
    let _guard = INIT_MUTEX.lock().await;

    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }

    let result = initialize_internal(db_url, config).await;

    // Mark as initialized only if successful
    if result.is_ok() {
        INITIALIZED.store(true, Ordering::Release);
    }

    result
}

async fn initialize_internal(db_url: &str, config: ExportConfig) -> ServiceResult<()> {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();

    log::info!("Starting export engine initialization");
    log::debug!("Database URL: {}", db_url);
    log::debug!("Export root: {:?}", config.root_dir);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|e| ServiceError::ServiceUnavailable(format!("Database connection failed: {}", e)))?;

    crate::db_migration::run_migrations(&pool)
        .await
        .map_err(DomainError::from)?;

    let repo: Arc<dyn ExportTaskRepository> = Arc::new(SqliteExportTaskRepository::new(pool.clone()));
    let query_engine: Arc<dyn QueryEngine> = Arc::new(SqliteQueryEngine::new(pool.clone()));
    let storage: Arc<dyn ExportFileStorage> = Arc::new(LocalExportStorage::new(config.root_dir.clone()));

    let task_service: Arc<dyn ExportTaskService> = Arc::new(ExportTaskServiceImpl::new(
        repo.clone(),
        query_engine.clone(),
        storage.clone(),
        ValueFormatter::from_config(&config),
    ));
    let file_service = Arc::new(ExportFileService::new(storage.clone(), config.demo_fallback));

    store_slot(&DB_POOL, "Database pool", pool)?;
    store_slot(&EXPORT_TASK_REPO, "ExportTaskRepository", repo)?;
    store_slot(&QUERY_ENGINE, "QueryEngine", query_engine)?;
    store_slot(&FILE_STORAGE, "ExportFileStorage", storage)?;
    store_slot(&EXPORT_TASK_SERVICE, "ExportTaskService", task_service)?;
    store_slot(&EXPORT_FILE_SERVICE, "ExportFileService", file_service)?;
    store_slot(&CONFIG, "ExportConfig", config)?;

    log::info!("Export engine initialized");
    Ok(())
}
