//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_POST_INTERVAL_SECS: f64 = 1.5;
const DEFAULT_POST_RETRY_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_PUSH_INTERVAL_SECS: f64 = 15.0;
const DEFAULT_MORE_DATA_DELAY_SECS: f64 = 1.0;
const DEFAULT_UPDATES_PATH: &str = "/api/updates";

/// Configuration for sync operations.
///
/// Deserializes from camelCase keys (`postIntervalSecs`, ...). Missing keys
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Normal interval between outbound flushes.
    pub post_interval_secs: f64,
    /// Interval used after an outbound transport failure.
    pub post_retry_interval_secs: f64,
    /// Normal interval between inbound polls.
    pub push_interval_secs: f64,
    /// Delay before the next poll when the server reports more data.
    pub more_data_delay_secs: f64,
    /// Server path for both the POST and the GET endpoints.
    pub updates_path: String,
}

impl SyncConfig {
    /// Creates a configuration with default intervals.
    pub fn new() -> Self {
        Self {
            post_interval_secs: DEFAULT_POST_INTERVAL_SECS,
            post_retry_interval_secs: DEFAULT_POST_RETRY_INTERVAL_SECS,
            push_interval_secs: DEFAULT_PUSH_INTERVAL_SECS,
            more_data_delay_secs: DEFAULT_MORE_DATA_DELAY_SECS,
            updates_path: DEFAULT_UPDATES_PATH.to_string(),
        }
    }

    /// Parses a JSON configuration object and validates it.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the outbound flush interval.
    pub fn with_post_interval(mut self, interval: Duration) -> Self {
        self.post_interval_secs = interval.as_secs_f64();
        self
    }

    /// Sets the outbound retry interval.
    pub fn with_post_retry_interval(mut self, interval: Duration) -> Self {
        self.post_retry_interval_secs = interval.as_secs_f64();
        self
    }

    /// Sets the inbound poll interval.
    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.push_interval_secs = interval.as_secs_f64();
        self
    }

    /// Sets the delay used while draining a backlog.
    pub fn with_more_data_delay(mut self, delay: Duration) -> Self {
        self.more_data_delay_secs = delay.as_secs_f64();
        self
    }

    /// Sets the server updates path.
    pub fn with_updates_path(mut self, path: impl Into<String>) -> Self {
        self.updates_path = path.into();
        self
    }

    /// Outbound flush interval.
    pub fn post_interval(&self) -> Duration {
        secs(self.post_interval_secs)
    }

    /// Outbound retry interval.
    pub fn post_retry_interval(&self) -> Duration {
        secs(self.post_retry_interval_secs)
    }

    /// Inbound poll interval.
    pub fn push_interval(&self) -> Duration {
        secs(self.push_interval_secs)
    }

    /// Inbound backlog drain delay.
    pub fn more_data_delay(&self) -> Duration {
        secs(self.more_data_delay_secs)
    }

    /// Path of the inbound fetch for the given cursor position.
    pub fn fetch_path(&self, until: &tidesync_protocol::Until) -> String {
        format!("{}/{}", self.updates_path.trim_end_matches('/'), until)
    }

    /// Checks that every interval is positive and finite and the path is set.
    pub fn validate(&self) -> SyncResult<()> {
        let intervals = [
            ("postIntervalSecs", self.post_interval_secs),
            ("postRetryIntervalSecs", self.post_retry_interval_secs),
            ("pushIntervalSecs", self.push_interval_secs),
            ("moreDataDelaySecs", self.more_data_delay_secs),
        ];
        for (name, value) in intervals {
            if !value.is_finite() || value <= 0.0 {
                return Err(SyncError::Config(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        if self.updates_path.is_empty() {
            return Err(SyncError::Config("updatesPath must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Only called on validated values; anything else degrades to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
