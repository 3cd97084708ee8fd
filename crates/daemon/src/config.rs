//! Daemon configuration from environment variables

use conveyor_core::application::constants::{DEFAULT_LOCK_DURATION_MS, DEFAULT_SWEEP_BATCH};
use conveyor_core::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.conveyor/queue.db";
const DEFAULT_QUEUES: &str = "default:5";
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// A queue to create (or resize) at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSetting {
    pub name: String,
    pub concurrency: i64,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub queues: Vec<QueueSetting>,
    pub sweep_interval: Duration,
    pub lock_duration_ms: i64,
    pub sweep_batch: u32,
    pub log_format: LogFormat,
    /// Daily-rolling log files go here when set
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    /// Read `CONVEYOR_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("CONVEYOR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let queues = lookup("CONVEYOR_QUEUES").unwrap_or_else(|| DEFAULT_QUEUES.to_string());

        let sweep_interval_ms: u64 =
            parse_var(&lookup, "CONVEYOR_SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS)?;
        if sweep_interval_ms == 0 {
            return Err(AppError::Config(
                "CONVEYOR_SWEEP_INTERVAL_MS must be greater than 0".into(),
            ));
        }
        let lock_duration_ms: i64 =
            parse_var(&lookup, "CONVEYOR_LOCK_DURATION_MS", DEFAULT_LOCK_DURATION_MS)?;
        if lock_duration_ms <= 0 {
            return Err(AppError::Config(
                "CONVEYOR_LOCK_DURATION_MS must be greater than 0".into(),
            ));
        }
        let sweep_batch: u32 = parse_var(&lookup, "CONVEYOR_SWEEP_BATCH", DEFAULT_SWEEP_BATCH)?;

        let log_format = match lookup("CONVEYOR_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "CONVEYOR_LOG_FORMAT must be 'json' or 'pretty', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            db_path: PathBuf::from(shellexpand::tilde(&db_path).into_owned()),
            queues: parse_queues(&queues)?,
            sweep_interval: Duration::from_millis(sweep_interval_ms),
            lock_duration_ms,
            sweep_batch,
            log_format,
            log_dir: lookup("CONVEYOR_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned())),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value '{}'", key, raw))),
    }
}

/// `name:concurrency,name:concurrency`; a bare name gets concurrency 1
fn parse_queues(raw: &str) -> Result<Vec<QueueSetting>> {
    let mut settings = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, concurrency) = match entry.split_once(':') {
            Some((name, c)) => {
                let concurrency = c.trim().parse::<i64>().map_err(|_| {
                    AppError::Config(format!(
                        "invalid concurrency in CONVEYOR_QUEUES entry '{}'",
                        entry
                    ))
                })?;
                (name.trim(), concurrency)
            }
            None => (entry, 1),
        };
        settings.push(QueueSetting {
            name: name.to_string(),
            concurrency,
        });
    }
    if settings.is_empty() {
        return Err(AppError::Config("CONVEYOR_QUEUES lists no queues".into()));
    }
    Ok(settings)
}
