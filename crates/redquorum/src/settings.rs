//! Coordinator-wide defaults and the per-call overrides layered on top of
//! them, mirroring the corpus's convention of workspace-level defaults plus
//! call-site overrides rather than mutable global configuration.

use std::time::Duration;

/// Defaults applied to every `acquire`/`extend`/`using` call unless
/// overridden per-call via [`Overrides`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Total attempts allowed is `retry_count + 1`; `-1` means unlimited.
    pub retry_count: i64,
    pub retry_delay: Duration,
    pub retry_jitter: Duration,
    /// Clock drift compensation factor, multiplied against the requested
    /// lock duration and added to a fixed 2ms floor.
    pub drift_factor: f64,
    /// How far ahead of expiration the `using` supervisor schedules its
    /// next automatic extension.
    pub automatic_extension_threshold: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(100),
            drift_factor: 0.01,
            automatic_extension_threshold: Duration::from_millis(500),
        }
    }
}

impl Settings {
    pub fn with_retry_count(mut self, retry_count: i64) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_retry_jitter(mut self, retry_jitter: Duration) -> Self {
        self.retry_jitter = retry_jitter;
        self
    }

    pub fn with_drift_factor(mut self, drift_factor: f64) -> Self {
        self.drift_factor = drift_factor;
        self
    }

    pub fn with_automatic_extension_threshold(mut self, threshold: Duration) -> Self {
        self.automatic_extension_threshold = threshold;
        self
    }

    /// Layers `overrides` on top of these settings, producing the effective
    /// settings for a single call without mutating `self`.
    pub fn layer(&self, overrides: &Overrides) -> Settings {
        Settings {
            retry_count: overrides.retry_count.unwrap_or(self.retry_count),
            retry_delay: overrides.retry_delay.unwrap_or(self.retry_delay),
            retry_jitter: overrides.retry_jitter.unwrap_or(self.retry_jitter),
            drift_factor: overrides.drift_factor.unwrap_or(self.drift_factor),
            automatic_extension_threshold: overrides
                .automatic_extension_threshold
                .unwrap_or(self.automatic_extension_threshold),
        }
    }
}

/// Per-call overrides layered on top of the coordinator's [`Settings`].
/// Every field defaults to `None`, meaning "inherit the coordinator's value".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub retry_count: Option<i64>,
    pub retry_delay: Option<Duration>,
    pub retry_jitter: Option<Duration>,
    pub drift_factor: Option<f64>,
    pub automatic_extension_threshold: Option<Duration>,
}
