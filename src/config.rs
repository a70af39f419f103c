//! Environment-based configuration.
//!
//! Values come from, in order of priority:
//! 1. Environment variables
//! 2. A JSON file passed to [`AppConfig::load_from_file`]
//! 3. Defaults

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Reads `APP_ENV`; anything other than `production` is development.
    pub fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. `:memory:` opens a throwaway in-memory store.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `fuel_station_lib=debug`.
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_plate_len: usize,
    pub pending_queue_limit: u32,
    pub history_limit: u32,
    /// How far back a cleaning visit may be logged.
    pub cleaning_backdate_days: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_plate_len: 10,
            pending_queue_limit: 100,
            history_limit: 100,
            cleaning_backdate_days: 7,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let environment = Environment::Development;
        Self {
            environment,
            database: DatabaseConfig {
                path: "fuel_station.db".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: environment.is_production(),
            },
            workflow: WorkflowConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// JSON file overlaid with environment variables.
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if env::var("APP_ENV").is_ok() {
            self.environment = Environment::from_env();
            self.logging.json = self.environment.is_production();
        }
        if let Ok(path) = env::var("FUEL_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(json) = env_parse::<bool>("LOG_JSON") {
            self.logging.json = json;
        }
        if let Some(len) = env_parse("MAX_PLATE_LEN") {
            self.workflow.max_plate_len = len;
        }
        if let Some(limit) = env_parse("PENDING_QUEUE_LIMIT") {
            self.workflow.pending_queue_limit = limit;
        }
        if let Some(limit) = env_parse("HISTORY_LIMIT") {
            self.workflow.history_limit = limit;
        }
        if let Some(days) = env_parse("CLEANING_BACKDATE_DAYS") {
            self.workflow.cleaning_backdate_days = days;
        }
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.path == ":memory:"
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.path.trim().is_empty() {
            return Err("Database path must not be empty".into());
        }
        if self.workflow.max_plate_len == 0 {
            return Err("max_plate_len must be greater than 0".into());
        }
        if self.workflow.pending_queue_limit == 0 || self.workflow.history_limit == 0 {
            return Err("Query limits must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workflow.max_plate_len, 10);
        assert!(!config.is_in_memory());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = AppConfig::default();
        config.workflow.history_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.path = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut config = AppConfig::default();
        config.database.path = ":memory:".into();
        config.workflow.pending_queue_limit = 25;
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.workflow.pending_queue_limit, 25);
        assert_eq!(loaded.workflow.max_plate_len, config.workflow.max_plate_len);
    }
}
