pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod validation;


pub use auth::{Caller, Identity};
pub use config::AppConfig;
pub use db::Database;
pub use error::{AppError, ValidationError};

use tracing::info;

/// Store handle plus configuration, passed explicitly to every operation.
pub struct AppState {
    pub db: Database,
    pub config: AppConfig,
}

impl AppState {
    /// Open the configured store and make sure the schema is current.
    pub fn open(config: AppConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::Internal)?;

        let db = if config.is_in_memory() {
            Database::open_in_memory()?
        } else {
            let path = config.database_path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Internal(format!("Failed to create data directory: {e}")))?;
            }
            Database::open(&path)?
        };
        db.initialize()?;

        Ok(AppState { db, config })
    }
}

/// Host entry point: logging first, then the store.
pub fn bootstrap(config: AppConfig) -> Result<AppState, AppError> {
    logging::init_logging(&config.logging);

    let state = AppState::open(config)?;
    info!(
        environment = state.config.environment.as_str(),
        database = %state.config.database.path,
        "fuel station store ready"
    );
    Ok(state)
}
