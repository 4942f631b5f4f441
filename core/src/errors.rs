//! Error types for breaker operations

use std::error::Error;
use std::time::Duration;
use thiserror::Error;

/// Admission denied by the breaker
///
/// Expected and recoverable: the caller should not retry immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Breaker is open, calls are dropped until the cool-down elapses
    #[error("circuit breaker '{breaker}' is open, drop request")]
    Open { breaker: String, opened_at: Duration },
    /// Breaker is half-open and its trial budget is used up
    #[error("circuit breaker '{breaker}' is half-open, too many calls (limit: {limit})")]
    HalfOpenSaturated { breaker: String, limit: u64 },
}

/// Errors returned by [`Breaker::execute`](crate::Breaker::execute)
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker denied the call; the operation was not invoked
    #[error("{0}")]
    Rejected(#[from] Rejection),
    /// The wrapped operation failed; the error is passed through untouched
    #[error("circuit execution failed: {0}")]
    Execution(E),
    /// The wrapped operation panicked and the panic was suppressed
    #[error("circuit '{breaker}' call panicked: {message}")]
    Panicked { breaker: String, message: String },
}

impl<E> CallError<E> {
    /// True when the breaker itself denied the call
    pub fn is_rejection(&self) -> bool {
        matches!(self, CallError::Rejected(_))
    }

    /// The operation's own error, if that is what this is
    pub fn into_execution(self) -> Option<E> {
        match self {
            CallError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker configuration; a breaker is never built from one
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown breaker strategy: {0}")]
    UnknownStrategy(String),
    #[error("invalid breaker configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Whether `err`, or any error in its source chain, is a breaker rejection
///
/// Useful once errors have been boxed and the concrete type is gone.
pub fn is_rejection(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<Rejection>() {
            return true;
        }
        current = e.source();
    }
    false
}
