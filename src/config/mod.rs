//! Process configuration: worker count, log placement and level, load-fault
//! recovery.
//!
//! Loaded from a JSON file, then overridden by `TASKMILL_*` environment
//! variables (a `.env` file is honored via dotenvy in the bootstrap).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::worker::LoadRecovery;
use crate::sink::LogLevel;

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool size. Defaults to the number of logical CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Directory receiving one log file (and fifo) per worker.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Per-worker sink verbosity.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// What a worker does when a capability fails to load.
    #[serde(default)]
    pub load_recovery: LoadRecovery,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            log_dir: default_log_dir(),
            log_level: default_log_level(),
            load_recovery: LoadRecovery::default(),
        }
    }
}

impl Config {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] describing the offending field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "workers must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON config file.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Io`] when the file cannot be read, otherwise as
    /// [`Config::from_json_str`].
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, SchedulerError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    /// Apply `TASKMILL_*` environment overrides: `TASKMILL_WORKERS`,
    /// `TASKMILL_LOG_DIR`, `TASKMILL_LOG_LEVEL`, `TASKMILL_LOAD_RECOVERY`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when a variable fails to parse.
    pub fn apply_env_overrides(mut self) -> Result<Self, SchedulerError> {
        if let Ok(workers) = std::env::var("TASKMILL_WORKERS") {
            self.workers = workers.parse().map_err(|_| {
                SchedulerError::InvalidConfig(format!("TASKMILL_WORKERS=`{workers}`"))
            })?;
        }
        if let Ok(dir) = std::env::var("TASKMILL_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("TASKMILL_LOG_LEVEL") {
            self.log_level = level.parse().map_err(SchedulerError::InvalidConfig)?;
        }
        if let Ok(recovery) = std::env::var("TASKMILL_LOAD_RECOVERY") {
            self.load_recovery = match recovery.to_ascii_lowercase().as_str() {
                "fallback" => LoadRecovery::Fallback,
                "retry" => LoadRecovery::Retry,
                "halt" => LoadRecovery::Halt,
                other => {
                    return Err(SchedulerError::InvalidConfig(format!(
                        "TASKMILL_LOAD_RECOVERY=`{other}`"
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.workers >= 1);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.load_recovery, LoadRecovery::Fallback);
    }

    #[test]
    fn test_from_json_str() {
        let cfg = Config::from_json_str(
            r#"{
                "workers": 3,
                "log_dir": "/tmp/mill-logs",
                "log_level": "warn",
                "load_recovery": "halt"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/mill-logs"));
        assert_eq!(cfg.log_level, LogLevel::Warn);
        assert_eq!(cfg.load_recovery, LoadRecovery::Halt);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = Config::from_json_str(r#"{ "workers": 2 }"#).unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_json_str(r#"{ "workers": 0 }"#).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }
}
