use std::time::Duration;

use drover_application::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_CONCURRENT_RUNS, DEFAULT_REQUEUE_INTERVAL,
};
use drover_core::{AppError, AppResult};

/// Run store backend selected by `RUN_STORE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStoreBackend {
    /// PostgreSQL at `DATABASE_URL`.
    Postgres {
        /// Connection string.
        database_url: String,
    },
    /// Process-local store, for single-node development.
    Memory,
}

/// Task queue backend selected by `TASK_QUEUE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskQueueBackend {
    /// Redis lists at `REDIS_URL`.
    Redis {
        /// Connection string.
        redis_url: String,
        /// Prefix of every queue key.
        key_prefix: String,
    },
    /// Process-local queue, for single-node development.
    Memory,
}

/// Controller process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Run store backend.
    pub run_store: RunStoreBackend,
    /// Task queue backend.
    pub task_queue: TaskQueueBackend,
    /// Fixed ticker id from `TICKER_ID`.
    pub ticker_id: Option<String>,
    /// Ticker heartbeat period.
    pub heartbeat_interval: Duration,
    /// Group key requeue scan period.
    pub requeue_interval: Duration,
    /// Bound on concurrent run creations per event.
    pub max_concurrent_runs: usize,
}

impl ControllerConfig {
    /// Loads settings from the process environment.
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let run_store = match optional(&lookup, "RUN_STORE").as_deref() {
            None | Some("postgres") => RunStoreBackend::Postgres {
                database_url: required(&lookup, "DATABASE_URL")?,
            },
            Some("memory") => RunStoreBackend::Memory,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "invalid RUN_STORE value '{other}', expected 'postgres' or 'memory'"
                )));
            }
        };

        let task_queue = match optional(&lookup, "TASK_QUEUE").as_deref() {
            None | Some("redis") => TaskQueueBackend::Redis {
                redis_url: required(&lookup, "REDIS_URL")?,
                key_prefix: optional(&lookup, "REDIS_QUEUE_PREFIX")
                    .unwrap_or_else(|| "drover".to_owned()),
            },
            Some("memory") => TaskQueueBackend::Memory,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "invalid TASK_QUEUE value '{other}', expected 'redis' or 'memory'"
                )));
            }
        };

        let heartbeat_interval = parse_millis(
            &lookup,
            "TICKER_HEARTBEAT_INTERVAL_MS",
            DEFAULT_HEARTBEAT_INTERVAL,
        )?;
        let requeue_interval =
            parse_millis(&lookup, "TICKER_REQUEUE_INTERVAL_MS", DEFAULT_REQUEUE_INTERVAL)?;

        let max_concurrent_runs = match optional(&lookup, "EVENT_FAN_OUT_LIMIT") {
            Some(value) => value.parse::<usize>().map_err(|error| {
                AppError::Validation(format!("invalid EVENT_FAN_OUT_LIMIT value '{value}': {error}"))
            })?,
            None => DEFAULT_MAX_CONCURRENT_RUNS,
        };
        if max_concurrent_runs == 0 {
            return Err(AppError::Validation(
                "EVENT_FAN_OUT_LIMIT must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            run_store,
            task_queue,
            ticker_id: optional(&lookup, "TICKER_ID"),
            heartbeat_interval,
            requeue_interval,
            max_concurrent_runs,
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> AppResult<String> {
    optional(lookup, name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> AppResult<Duration> {
    let Some(value) = optional(lookup, name) else {
        return Ok(default);
    };

    let millis = value.parse::<u64>().map_err(|error| {
        AppError::Validation(format!("invalid {name} value '{value}': {error}"))
    })?;
    if millis == 0 {
        return Err(AppError::Validation(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(Duration::from_millis(millis))
}
