//! Callback system for breaker state transitions

use crate::State;
use std::sync::Arc;
use std::time::Duration;

/// A transition that just happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub breaker: String,
    pub from: State,
    pub to: State,
    /// Breaker clock reading at the transition
    pub at: Duration,
}

pub type TransitionHook = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Hooks fired after a transition, outside the breaker lock
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionHook>,
    pub on_close: Option<TransitionHook>,
    pub on_half_open: Option<TransitionHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the hook matching the target state, if any
    pub fn trigger(&self, change: &StateChange) {
        let hook = match change.to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(change);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
