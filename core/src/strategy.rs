//! Trip strategies
//!
//! A strategy is a pure predicate over the current metrics window that says
//! whether the accumulated failures justify opening the breaker. The set of
//! strategies is closed; unknown names are rejected while configuring.

use crate::errors::ConfigError;
use crate::window::MetricsWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_FAILURE_THRESHOLD: u64 = 10;
pub const DEFAULT_CONTINUOUS_FAILURE_THRESHOLD: u64 = 10;
pub const DEFAULT_FAILURE_RATE: f64 = 0.6;
pub const DEFAULT_MINIMUM_CALLS: u64 = 10;

/// Name of a trip strategy variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "KindRepr", into = "String")]
pub enum StrategyKind {
    /// Total failures in the window
    #[default]
    Failures,
    /// Current failure streak
    ConsecutiveFailures,
    /// Failure ratio once enough calls were seen
    FailureRate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Failures => "failures",
            StrategyKind::ConsecutiveFailures => "consecutive_failures",
            StrategyKind::FailureRate => "failure_rate",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "failures" | "failure" | "fail" => Ok(StrategyKind::Failures),
            "consecutive_failures" | "continuous_failures" | "continuous_fail" => {
                Ok(StrategyKind::ConsecutiveFailures)
            }
            "failure_rate" | "fail_rate" | "rate" => Ok(StrategyKind::FailureRate),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Numeric codes: 1 failures, 2 consecutive failures, 3 failure rate
impl TryFrom<u8> for StrategyKind {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(StrategyKind::Failures),
            2 => Ok(StrategyKind::ConsecutiveFailures),
            3 => Ok(StrategyKind::FailureRate),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<KindRepr> for StrategyKind {
    type Error = ConfigError;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Code(code) => StrategyKind::try_from(code),
            KindRepr::Name(name) => name.parse(),
        }
    }
}

/// Strategy selection with the parameters of every variant
///
/// Only the parameters of the selected `kind` are read. Zero or otherwise
/// invalid parameters fall back to the defaults when resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    pub kind: StrategyKind,
    pub failure_threshold: u64,
    pub continuous_failure_threshold: u64,
    pub failure_rate: f64,
    pub minimum_calls: u64,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Failures,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            continuous_failure_threshold: DEFAULT_CONTINUOUS_FAILURE_THRESHOLD,
            failure_rate: DEFAULT_FAILURE_RATE,
            minimum_calls: DEFAULT_MINIMUM_CALLS,
        }
    }
}

impl StrategyOptions {
    /// Build the predicate for the selected kind
    pub fn resolve(&self) -> TripStrategy {
        match self.kind {
            StrategyKind::Failures => TripStrategy::failures(self.failure_threshold),
            StrategyKind::ConsecutiveFailures => {
                TripStrategy::consecutive_failures(self.continuous_failure_threshold)
            }
            StrategyKind::FailureRate => {
                TripStrategy::failure_rate(self.failure_rate, self.minimum_calls)
            }
        }
    }
}

/// Predicate deciding when a closed breaker opens
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TripStrategy {
    /// Opens once `threshold` failures were recorded in the window
    Failures { threshold: u64 },
    /// Opens once the failure streak reaches `threshold`
    ConsecutiveFailures { threshold: u64 },
    /// Opens once at least `minimum_calls` were admitted and the failure
    /// ratio reaches `rate`
    FailureRate { rate: f64, minimum_calls: u64 },
}

impl TripStrategy {
    pub fn failures(threshold: u64) -> Self {
        TripStrategy::Failures {
            threshold: or_default(threshold, DEFAULT_FAILURE_THRESHOLD),
        }
    }

    pub fn consecutive_failures(threshold: u64) -> Self {
        TripStrategy::ConsecutiveFailures {
            threshold: or_default(threshold, DEFAULT_CONTINUOUS_FAILURE_THRESHOLD),
        }
    }

    /// A rate outside `(0, 1]` or a zero minimum resets both to the defaults
    pub fn failure_rate(rate: f64, minimum_calls: u64) -> Self {
        if !(rate > 0.0 && rate <= 1.0) || minimum_calls == 0 {
            return TripStrategy::FailureRate {
                rate: DEFAULT_FAILURE_RATE,
                minimum_calls: DEFAULT_MINIMUM_CALLS,
            };
        }
        TripStrategy::FailureRate {
            rate,
            minimum_calls,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            TripStrategy::Failures { .. } => StrategyKind::Failures,
            TripStrategy::ConsecutiveFailures { .. } => StrategyKind::ConsecutiveFailures,
            TripStrategy::FailureRate { .. } => StrategyKind::FailureRate,
        }
    }

    /// Whether the window justifies opening the breaker
    pub fn should_trip(&self, window: &MetricsWindow) -> bool {
        match *self {
            TripStrategy::Failures { threshold } => window.total_failures >= threshold,
            TripStrategy::ConsecutiveFailures { threshold } => {
                window.consecutive_failures >= threshold
            }
            TripStrategy::FailureRate {
                rate,
                minimum_calls,
            } => window.total_requests >= minimum_calls && window.failure_rate() >= rate,
        }
    }
}

impl Default for TripStrategy {
    fn default() -> Self {
        TripStrategy::failures(DEFAULT_FAILURE_THRESHOLD)
    }
}

fn or_default(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}
