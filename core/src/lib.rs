//! Windowed circuit breaker
//!
//! This crate guards calls to an unreliable dependency:
//! - Counts calls per time window with batch tokens, so late reports from an
//!   old window never pollute the current one
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Pluggable trip strategies (total failures, failure streak, failure rate)
//! - Monotonic time tracking with an injectable clock
//! - Best-effort webhook notifications on open and close
//!
//! # Example
//!
//! ```rust
//! use windowed_breaker::{Breaker, CallError};
//! use std::time::Duration;
//!
//! let breaker = Breaker::builder("my_service")
//!     .window(Duration::from_secs(60))
//!     .cool_down(Duration::from_secs(30))
//!     .half_open_max_calls(2)
//!     .failure_threshold(5)
//!     .on_open(|change| println!("Breaker {} opened!", change.breaker))
//!     .build()
//!     .unwrap();
//!
//! // Execute with breaker protection
//! let result = breaker.execute(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert_eq!(result.unwrap(), "success");
//!
//! // Or split admission and reporting around the call yourself
//! match breaker.admit() {
//!     Ok(ticket) => breaker.record_outcome(ticket, true.into()),
//!     Err(rejection) => println!("Skipping call: {rejection}"),
//! }
//!
//! if let Err(CallError::Rejected(_)) = breaker.execute(|| Ok::<_, String>(())) {
//!     println!("Breaker is open, skipping call");
//! }
//! ```

pub mod breaker;
pub mod builder;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod errors;
mod machine;
pub mod notify;
pub mod strategy;
pub mod window;

pub use breaker::{Breaker, Ticket};
pub use builder::BreakerBuilder;
pub use callbacks::{Callbacks, StateChange, TransitionHook};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Config, NotifyFormat, PanicPolicy, Settings};
pub use errors::{CallError, ConfigError, Rejection, is_rejection};
#[cfg(feature = "webhook")]
pub use notify::WebhookNotifier;
pub use notify::{Notifier, NotifyError};
pub use strategy::{StrategyKind, StrategyOptions, TripStrategy};
pub use window::MetricsWindow;

use std::fmt;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Calls flow; failures are counted per window
    Closed,
    /// Calls are rejected until the cool-down elapses
    Open,
    /// A bounded number of trial calls decide between Closed and Open
    HalfOpen,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an admitted call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

/// `true` is a success
impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(State::Closed.to_string(), "closed");
        assert_eq!(State::Open.to_string(), "open");
        assert_eq!(State::HalfOpen.to_string(), "half-open");
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(Outcome::from(true), Outcome::Success);
        assert_eq!(Outcome::from(false), Outcome::Failure);
        assert!(Outcome::Success.is_success());
        assert!(!Outcome::Failure.is_success());
    }
}
