//! Breaker lifecycle as a state machine
//!
//! Closed → Open → HalfOpen → (Closed | Open). Guards read the shared metrics
//! window and clock through the machine context; the caller (the breaker)
//! owns window rollovers and serialises every event behind its lock.

use crate::clock::{Clock, MonotonicClock};
use crate::config::Settings;
use crate::window::WindowStore;
use state_machines::state_machine;
use std::sync::Arc;
use std::time::Duration;

/// Data shared by every state
#[derive(Clone)]
pub struct BreakerContext {
    pub name: String,
    pub settings: Settings,
    pub window: Arc<WindowStore>,
    pub clock: Arc<dyn Clock>,
}

impl Default for BreakerContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            settings: Settings::default(),
            window: Arc::new(WindowStore::new()),
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl std::fmt::Debug for BreakerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerContext")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("window", &self.window)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Duration,
}

state_machine! {
    name: Gate,
    context: BreakerContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen,
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        probe {
            guards: [cool_down_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Gate<Closed> {
    /// Strategy verdict over the current window
    fn should_open(&self, ctx: &BreakerContext) -> bool {
        ctx.settings.strategy.should_trip(&ctx.window.snapshot())
    }
}

impl Gate<HalfOpen> {
    /// Any failure while probing reopens
    fn should_open(&self, _ctx: &BreakerContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &BreakerContext) -> bool {
        ctx.window.snapshot().consecutive_successes >= ctx.settings.half_open_max_calls
    }
}

impl Gate<Open> {
    fn cool_down_elapsed(&self, ctx: &BreakerContext) -> bool {
        ctx.window.is_expired(ctx.clock.now())
    }
}
