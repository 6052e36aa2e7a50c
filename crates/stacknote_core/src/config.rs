//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe where logs and the document store live.
//! - Bootstrap logging and open the store from one value.
//!
//! # Invariants
//! - Missing `log_level` falls back to `default_log_level()`.
//! - Missing `db_path` (after env override) means an in-memory store.

use crate::logging::{default_log_level, init_logging, LoggingError};
use crate::store::{SqliteDocumentStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Environment variable that overrides `db_path`.
pub const DB_PATH_ENV: &str = "STACKNOTE_DB_PATH";

/// Errors produced while loading or applying configuration.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Logging(LoggingError),
    Store(StoreError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::Logging(err) => write!(f, "logging init failed: {err}"),
            Self::Store(err) => write!(f, "store open failed: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<LoggingError> for ConfigError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<StoreError> for ConfigError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// One of `trace|debug|info|warn|error`.
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files. Logging stays off when unset.
    pub log_dir: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn effective_log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or(default_log_level())
    }

    /// `db_path`, overridden by a non-blank `STACKNOTE_DB_PATH`.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        if let Ok(raw) = std::env::var(DB_PATH_ENV) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        self.db_path.clone()
    }

    /// Starts file logging when `log_dir` is set. Returns whether logging is
    /// active afterwards.
    pub fn init_logging(&self) -> Result<bool, ConfigError> {
        let Some(log_dir) = self.log_dir.as_deref() else {
            return Ok(false);
        };
        init_logging(self.effective_log_level(), log_dir)?;
        Ok(true)
    }

    pub fn open_store(&self) -> StoreResult<SqliteDocumentStore> {
        match self.resolved_db_path() {
            Some(path) => SqliteDocumentStore::open(path),
            None => SqliteDocumentStore::open_in_memory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::logging::default_log_level;

    #[test]
    fn empty_object_uses_defaults() {
        let config = CoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.effective_log_level(), default_log_level());
        assert!(!config.init_logging().unwrap());
    }

    #[test]
    fn parses_all_fields() {
        let config = CoreConfig::from_json_str(
            r#"{"log_level":"warn","log_dir":"/tmp/stacknote-logs","db_path":"/tmp/notes.sqlite3"}"#,
        )
        .unwrap();
        assert_eq!(config.effective_log_level(), "warn");
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/stacknote-logs"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = CoreConfig::from_json_str(r#"{"theme":"dark"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn relative_log_dir_is_a_logging_error() {
        let config = CoreConfig {
            log_dir: Some("logs".to_string()),
            ..CoreConfig::default()
        };
        let err = config.init_logging().unwrap_err();
        assert!(matches!(&err, ConfigError::Logging(_)));
        assert!(err.to_string().contains("absolute"));
    }
}
