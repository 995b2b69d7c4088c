//! Runtime settings loaded from the environment.
//!
//! Every setting has a default and can be overridden by a `QUEUECTL_*`
//! environment variable (a `.env` file is loaded by the binary first).

use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::database::sqlite_url;
use crate::queue::{BackoffMode, BackoffPolicy, QueueConfig, WorkerConfig};
use crate::{Error, Result};

const DEFAULT_DB_PATH: &str = "queuectl.db";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// `QUEUECTL_DB`
    pub db_path: PathBuf,
    /// `QUEUECTL_MAX_RETRIES`
    pub max_retries: i64,
    /// `QUEUECTL_BACKOFF_BASE`
    pub backoff_base: u64,
    /// `QUEUECTL_BACKOFF_MAX`
    pub backoff_max: u64,
    /// `QUEUECTL_BACKOFF_MODE`
    pub backoff_mode: BackoffMode,
    /// `QUEUECTL_WORKER_COUNT`
    pub worker_count: usize,
    /// `QUEUECTL_LOG_LEVEL`
    pub log_level: String,
    /// `QUEUECTL_LOG_DIR`; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// `QUEUECTL_JOB_TIMEOUT`
    pub job_timeout_secs: u64,
    /// `QUEUECTL_DEFAULT_PRIORITY`
    pub default_priority: i64,
    /// `QUEUECTL_POLL_INTERVAL_MS`
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_retries: 3,
            backoff_base: 2,
            backoff_max: 600,
            backoff_mode: BackoffMode::Blocking,
            worker_count: 1,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_dir: None,
            job_timeout_secs: 30,
            default_priority: 10,
            poll_interval_ms: 200,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("invalid {key}={raw:?}: {e}"))),
    }
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            db_path: lookup("QUEUECTL_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_retries: parse_or(&lookup, "QUEUECTL_MAX_RETRIES", defaults.max_retries)?,
            backoff_base: parse_or(&lookup, "QUEUECTL_BACKOFF_BASE", defaults.backoff_base)?,
            backoff_max: parse_or(&lookup, "QUEUECTL_BACKOFF_MAX", defaults.backoff_max)?,
            backoff_mode: parse_or(&lookup, "QUEUECTL_BACKOFF_MODE", defaults.backoff_mode)?,
            worker_count: parse_or(&lookup, "QUEUECTL_WORKER_COUNT", defaults.worker_count)?,
            log_level: lookup("QUEUECTL_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_dir: lookup("QUEUECTL_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            job_timeout_secs: parse_or(
                &lookup,
                "QUEUECTL_JOB_TIMEOUT",
                defaults.job_timeout_secs,
            )?,
            default_priority: parse_or(
                &lookup,
                "QUEUECTL_DEFAULT_PRIORITY",
                defaults.default_priority,
            )?,
            poll_interval_ms: parse_or(
                &lookup,
                "QUEUECTL_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.max_retries < 1 {
            return Err(Error::config("QUEUECTL_MAX_RETRIES must be at least 1"));
        }
        if self.worker_count < 1 {
            return Err(Error::config("QUEUECTL_WORKER_COUNT must be at least 1"));
        }
        if self.job_timeout_secs < 1 {
            return Err(Error::config("QUEUECTL_JOB_TIMEOUT must be at least 1"));
        }
        Ok(())
    }

    /// SQLite URL for the configured database file.
    pub fn database_url(&self) -> String {
        sqlite_url(&self.db_path)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            default_max_retries: self.max_retries,
            default_priority: self.default_priority,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            default_timeout_secs: self.job_timeout_secs,
            poll_interval_ms: self.poll_interval_ms,
            backoff: BackoffPolicy {
                base: self.backoff_base,
                max: self.backoff_max,
                jitter: true,
            },
            backoff_mode: self.backoff_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.database_url(), "sqlite:queuectl.db?mode=rwc");
        assert_eq!(settings.queue_config().default_max_retries, 3);
        assert_eq!(settings.worker_config().default_timeout_secs, 30);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("QUEUECTL_DB", "/tmp/jobs.db"),
            ("QUEUECTL_MAX_RETRIES", "5"),
            ("QUEUECTL_BACKOFF_BASE", "3"),
            ("QUEUECTL_BACKOFF_MAX", "60"),
            ("QUEUECTL_BACKOFF_MODE", "deferred"),
            ("QUEUECTL_WORKER_COUNT", " 4 "),
            ("QUEUECTL_DEFAULT_PRIORITY", "-1"),
        ]))
        .unwrap();
        assert_eq!(settings.db_path, PathBuf::from("/tmp/jobs.db"));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.worker_count, 4);
        assert_eq!(settings.default_priority, -1);

        let worker = settings.worker_config();
        assert_eq!(worker.backoff.base, 3);
        assert_eq!(worker.backoff.max, 60);
        assert_eq!(worker.backoff_mode, BackoffMode::Deferred);
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let err = Settings::from_lookup(lookup(&[("QUEUECTL_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("QUEUECTL_MAX_RETRIES"));

        let err = Settings::from_lookup(lookup(&[("QUEUECTL_WORKER_COUNT", "0")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
