//! Engine configuration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::subscriptions::DEFAULT_REVISION_HISTORY;

/// Env var overriding the disconnect grace period, in seconds.
pub const GRACE_PERIOD_ENV: &str = "LIVESYNC_GRACE_PERIOD_SECS";

/// Env var toggling subscription lifecycle logging.
pub const DEBUG_ENV: &str = "LIVESYNC_DEBUG";

/// Env var overriding how many acknowledged record revisions each
/// subscription remembers.
pub const REVISION_HISTORY_ENV: &str = "LIVESYNC_REVISION_HISTORY";

/// Default time an unbound subscription survives before eviction.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Sync engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long subscriptions stay alive after their connection drops.
    /// Default: 20 seconds
    #[serde(
        rename = "grace_period_secs",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub grace_period: Duration,

    /// Log subscription lifecycle events.
    pub debug: bool,

    /// Number of acknowledged record keys per subscription whose revision
    /// is remembered to refuse stale notifications.
    /// Default: 10000
    pub revision_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            debug: false,
            revision_history: DEFAULT_REVISION_HISTORY,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `LIVESYNC_GRACE_PERIOD_SECS`, `LIVESYNC_DEBUG`
    /// and `LIVESYNC_REVISION_HISTORY`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(GRACE_PERIOD_ENV) {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    config.grace_period = Duration::from_secs_f64(secs)
                }
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", GRACE_PERIOD_ENV),
            }
        }
        if let Ok(raw) = std::env::var(DEBUG_ENV) {
            config.debug = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes" | "on");
        }
        if let Ok(raw) = std::env::var(REVISION_HISTORY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(history) if history > 0 => config.revision_history = history,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", REVISION_HISTORY_ENV),
            }
        }
        config
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_revision_history(mut self, revision_history: usize) -> Self {
        self.revision_history = revision_history;
        self
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn deserialize_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "grace period must be a non-negative number of seconds, got {}",
            secs
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}
