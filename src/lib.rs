//! Asynchronous export task engine: persisted export requests are turned into
//! CSV or XLSX files and later packaged for download.

pub mod db_migration;
pub mod domains;
pub mod errors;
pub mod globals;
pub mod types;
pub mod validation;

pub use types::ExportConfig;

/// Initialize the library with the given database URL and configuration.
/// This function must be called before any of the `globals` getters.
pub async fn initialize(db_url: &str, config: ExportConfig) -> errors::ServiceResult<()> {
    globals::initialize(db_url, config).await
}

/// Same as [`initialize`], with the configuration read from the environment
/// (and a `.env` file when present).
pub async fn initialize_from_env(db_url: &str) -> errors::ServiceResult<()> {
    globals::initialize(db_url, ExportConfig::from_env()).await
}
