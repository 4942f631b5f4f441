//! Breaker configuration
//!
//! `Config` is the serialisable surface (durations in fractional seconds,
//! strategy by name). It is normalised once into `Settings` when a breaker is
//! built and never re-validated afterwards.

use crate::errors::ConfigError;
use crate::strategy::{StrategyOptions, TripStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Name used when a breaker is given an empty one
pub const DEFAULT_NAME: &str = "breaker";
pub const DEFAULT_WINDOW_SECS: f64 = 1.0;
pub const DEFAULT_COOL_DOWN_SECS: f64 = 1.0;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u64 = 5;

/// What `execute` does when the wrapped operation panics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Record a failure and return `CallError::Panicked`
    #[default]
    Suppress,
    /// Record a failure and resume unwinding
    Propagate,
}

/// Message flavour sent to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyFormat {
    #[default]
    Text,
    Markdown,
}

/// Breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Closed-state sampling window in seconds; 0 never rolls over
    pub window_secs: f64,

    /// Time spent open before trial calls are admitted, in seconds
    pub cool_down_secs: f64,

    /// Trial calls admitted while half-open, and the success streak that
    /// closes the breaker again
    pub half_open_max_calls: u64,

    /// Trip strategy evaluated after every failure while closed
    pub strategy: StrategyOptions,

    /// Jitter applied to the cool-down (0.0 = exact, 1.0 = full jitter)
    /// Uses chrono-machines formula: cool_down * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    pub panic_policy: PanicPolicy,

    /// Endpoint for state-change notifications
    pub webhook: Option<String>,

    pub notify_format: NotifyFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            cool_down_secs: DEFAULT_COOL_DOWN_SECS,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            strategy: StrategyOptions::default(),
            jitter_factor: 0.0,
            panic_policy: PanicPolicy::default(),
            webhook: None,
            notify_format: NotifyFormat::default(),
        }
    }
}

impl Config {
    /// Parse a JSON document; missing fields take their defaults
    ///
    /// ```rust
    /// use windowed_breaker::Config;
    ///
    /// let config = Config::from_json(r#"{
    ///     "window_secs": 0,
    ///     "strategy": { "kind": "consecutive_failures", "continuous_failure_threshold": 3 }
    /// }"#).unwrap();
    ///
    /// assert!(config.settings().window.is_none());
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Normalise into the values a breaker runs with
    pub fn settings(&self) -> Settings {
        let window = if !self.window_secs.is_finite() || self.window_secs < 0.0 {
            Some(secs(DEFAULT_WINDOW_SECS))
        } else if self.window_secs == 0.0 {
            None
        } else {
            Some(secs(self.window_secs))
        };

        let cool_down = if self.cool_down_secs.is_finite() && self.cool_down_secs > 0.0 {
            secs(self.cool_down_secs)
        } else {
            secs(DEFAULT_COOL_DOWN_SECS)
        };

        let half_open_max_calls = if self.half_open_max_calls == 0 {
            DEFAULT_HALF_OPEN_MAX_CALLS
        } else {
            self.half_open_max_calls
        };

        let jitter_factor = if self.jitter_factor.is_nan() {
            0.0
        } else {
            self.jitter_factor.clamp(0.0, 1.0)
        };

        Settings {
            window,
            cool_down,
            half_open_max_calls,
            jitter_factor,
            strategy: self.strategy.resolve(),
        }
    }
}

/// Normalised breaker parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// `None` keeps a closed window open-ended
    pub window: Option<Duration>,
    pub cool_down: Duration,
    pub half_open_max_calls: u64,
    pub jitter_factor: f64,
    pub strategy: TripStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
