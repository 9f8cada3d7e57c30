use std::str::FromStr;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Long-poll wait applied by the standard broker (the SQS maximum)
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(20);

/// How long the multi-queue broker leaves an empty queue alone
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Pause after a failed fetch before asking the broker again
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Timing knobs of the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Upper bound on one blocking dequeue
    pub wait_time: Duration,
    /// Multi-queue skip window for queues found empty
    pub polling_interval: Duration,
    /// Delay after `Broker::jobs` yields an error
    pub error_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_time: DEFAULT_WAIT_TIME,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `SQJOBS_WAIT_TIME_SECS`,
    /// `SQJOBS_POLLING_INTERVAL_SECS` and `SQJOBS_ERROR_BACKOFF_MS`
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            wait_time: env_parse::<u64>("SQJOBS_WAIT_TIME_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_time),
            polling_interval: env_parse::<f64>("SQJOBS_POLLING_INTERVAL_SECS")?
                .map(secs_f64)
                .transpose()?
                .unwrap_or(defaults.polling_interval),
            error_backoff: env_parse::<u64>("SQJOBS_ERROR_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.error_backoff),
        })
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

/// Read and parse one environment variable; unset or blank is `None`
pub(crate) fn env_parse<T>(key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| QueueError::Configuration(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Non-negative, finite seconds
pub fn secs_f64(secs: f64) -> QueueResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| QueueError::Configuration(format!("{secs} seconds: {e}")))
}
