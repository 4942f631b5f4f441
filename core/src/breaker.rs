//! Breaker public API
//!
//! Every public operation takes the breaker lock, first applies whatever
//! time-driven transition is due (window rollover while closed, probing once
//! the cool-down is over), then does its own work. Hooks and notifications for
//! the transitions it caused run after the lock is released.

use crate::builder::BreakerBuilder;
use crate::callbacks::{Callbacks, StateChange};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{Config, DEFAULT_NAME, NotifyFormat, PanicPolicy, Settings};
use crate::errors::{CallError, Rejection};
use crate::machine::{BreakerContext, DynamicGate, GateEvent};
use crate::notify::{self, Notifier, NotifyWorker};
use crate::window::{MetricsWindow, WindowStore};
use crate::{Outcome, State};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Resolution of the jitter factor drawn from chrono-machines
const JITTER_SCALE_MS: u64 = 1_000_000;

/// Proof that a call was admitted, tied to the window it was admitted into
///
/// Reporting an outcome with a ticket from a window that has since rolled
/// over is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "report the call's outcome with `Breaker::record_outcome`"]
pub struct Ticket {
    batch: u64,
}

impl Ticket {
    /// Window batch the call was admitted into
    pub fn batch(&self) -> u64 {
        self.batch
    }
}

/// Windowed circuit breaker
///
/// Build once, then share by reference (`&Breaker` or `Arc<Breaker>`) across
/// every thread calling the protected operation.
pub struct Breaker {
    context: BreakerContext,
    gate: Mutex<DynamicGate>,
    callbacks: Callbacks,
    notifications: Option<NotifyWorker>,
    panic_policy: PanicPolicy,
}

impl Breaker {
    /// Create a breaker from a configuration (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let notifier = notify::from_webhook(config.webhook.as_deref());
        Self::assemble(
            name.into(),
            config.settings(),
            Arc::new(MonotonicClock::new()),
            Callbacks::new(),
            notifier,
            config.notify_format,
            config.panic_policy,
        )
    }

    /// Create a new breaker builder
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    pub(crate) fn assemble(
        name: String,
        settings: Settings,
        clock: Arc<dyn Clock>,
        callbacks: Callbacks,
        notifier: Option<Arc<dyn Notifier>>,
        notify_format: NotifyFormat,
        panic_policy: PanicPolicy,
    ) -> Self {
        let name = if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name
        };

        let context = BreakerContext {
            name,
            settings,
            window: Arc::new(WindowStore::new()),
            clock,
        };

        let notifications = notifier.and_then(|notifier| {
            match NotifyWorker::spawn(&context.name, notifier, notify_format) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    tracing::error!(
                        breaker = %context.name,
                        error = %e,
                        "failed to start notification worker, notifications disabled"
                    );
                    None
                }
            }
        });

        let gate = DynamicGate::new(context.clone());
        let breaker = Self {
            context,
            gate: Mutex::new(gate),
            callbacks,
            notifications,
            panic_policy,
        };

        let now = breaker.context.clock.now();
        breaker
            .context
            .window
            .roll(breaker.expiry_for(State::Closed, now));
        breaker
    }

    /// Ask to run the protected operation
    ///
    /// On success the call is counted in the current window; hand the ticket
    /// back to [`record_outcome`](Self::record_outcome) once the call is done.
    pub fn admit(&self) -> Result<Ticket, Rejection> {
        let mut changes = Vec::new();

        let result = {
            let mut gate = self.lock();
            let now = self.context.clock.now();
            self.advance(&mut gate, now, &mut changes);

            match state_of(&gate) {
                State::Open => Err(Rejection::Open {
                    breaker: self.context.name.clone(),
                    opened_at: gate.open_data().map(|d| d.opened_at).unwrap_or_default(),
                }),
                State::HalfOpen => {
                    let limit = self.context.settings.half_open_max_calls;
                    let admitted = self.context.window.update(|w| {
                        if w.total_requests >= limit {
                            None
                        } else {
                            w.record_request();
                            Some(w.batch)
                        }
                    });

                    match admitted {
                        Some(batch) => Ok(Ticket { batch }),
                        None => {
                            tracing::debug!(
                                breaker = %self.context.name,
                                limit,
                                "half-open trial budget exhausted"
                            );
                            Err(Rejection::HalfOpenSaturated {
                                breaker: self.context.name.clone(),
                                limit,
                            })
                        }
                    }
                }
                State::Closed => {
                    let batch = self.context.window.update(|w| {
                        w.record_request();
                        w.batch
                    });
                    Ok(Ticket { batch })
                }
            }
        };

        self.announce(changes);
        result
    }

    /// Report how an admitted call ended
    ///
    /// Never fails. Reports for a window that has already been superseded are
    /// dropped without touching the current window.
    pub fn record_outcome(&self, ticket: Ticket, outcome: Outcome) {
        let mut changes = Vec::new();

        {
            let mut gate = self.lock();
            let now = self.context.clock.now();
            self.advance(&mut gate, now, &mut changes);

            let current = self.context.window.batch();
            if ticket.batch != current {
                tracing::trace!(
                    breaker = %self.context.name,
                    ticket = ticket.batch,
                    current,
                    ?outcome,
                    "discarding outcome from superseded window"
                );
            } else {
                let state = state_of(&gate);
                match outcome {
                    Outcome::Success => {
                        self.context.window.update(MetricsWindow::record_success);
                        if state == State::HalfOpen && gate.handle(GateEvent::Close).is_ok() {
                            self.enter(&mut gate, state, State::Closed, now, &mut changes);
                        }
                    }
                    Outcome::Failure => {
                        self.context.window.update(MetricsWindow::record_failure);
                        if gate.handle(GateEvent::Trip).is_ok() {
                            self.enter(&mut gate, state, State::Open, now, &mut changes);
                        }
                    }
                }
            }
        }

        self.announce(changes);
    }

    /// Run `f` under breaker protection
    ///
    /// Admission is checked first; a rejected call never invokes `f`. `Ok`
    /// counts as a success, `Err` and panics as failures. The operation's
    /// value or error is returned unchanged. Panics follow the configured
    /// [`PanicPolicy`].
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let ticket = self.admit()?;

        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                self.record_outcome(ticket, Outcome::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_outcome(ticket, Outcome::Failure);
                Err(CallError::Execution(e))
            }
            Err(payload) => {
                self.record_outcome(ticket, Outcome::Failure);
                match self.panic_policy {
                    PanicPolicy::Propagate => panic::resume_unwind(payload),
                    PanicPolicy::Suppress => {
                        let message = panic_message(payload.as_ref());
                        tracing::warn!(
                            breaker = %self.context.name,
                            panic = %message,
                            "protected call panicked, recorded as failure"
                        );
                        Err(CallError::Panicked {
                            breaker: self.context.name.clone(),
                            message,
                        })
                    }
                }
            }
        }
    }

    /// Force the breaker back to Closed with a fresh window
    pub fn reset(&self) {
        let mut changes = Vec::new();

        {
            let mut gate = self.lock();
            let now = self.context.clock.now();
            let from = state_of(&gate);

            *gate = DynamicGate::new(self.context.clone());
            let batch = self
                .context
                .window
                .roll(self.expiry_for(State::Closed, now));
            tracing::info!(breaker = %self.context.name, %from, batch, "breaker reset");

            if from != State::Closed {
                changes.push(self.change(from, State::Closed, now));
            }
        }

        self.announce(changes);
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// State as of the last operation; pending time-driven transitions are
    /// applied by the next `admit` or `record_outcome`, not here
    pub fn state(&self) -> State {
        state_of(&self.lock())
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Snapshot of the current window
    pub fn metrics(&self) -> MetricsWindow {
        let _gate = self.lock();
        self.context.window.snapshot()
    }

    /// When the breaker last opened, while it is open
    pub fn opened_at(&self) -> Option<Duration> {
        self.lock().open_data().map(|d| d.opened_at)
    }

    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    fn lock(&self) -> MutexGuard<'_, DynamicGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the transition a passed deadline calls for. No-op otherwise.
    fn advance(&self, gate: &mut DynamicGate, now: Duration, changes: &mut Vec<StateChange>) {
        match state_of(gate) {
            State::Closed => {
                if self.context.window.is_expired(now) {
                    let batch = self
                        .context
                        .window
                        .roll(self.expiry_for(State::Closed, now));
                    tracing::debug!(breaker = %self.context.name, batch, "window rolled over");
                }
            }
            State::Open => {
                if self.context.window.is_expired(now)
                    && gate.handle(GateEvent::Probe).is_ok()
                {
                    self.enter(gate, State::Open, State::HalfOpen, now, changes);
                }
            }
            State::HalfOpen => {}
        }
    }

    /// Bookkeeping after the machine moved to `to`
    fn enter(
        &self,
        gate: &mut DynamicGate,
        from: State,
        to: State,
        now: Duration,
        changes: &mut Vec<StateChange>,
    ) {
        let batch = self.context.window.roll(self.expiry_for(to, now));
        if to == State::Open
            && let Some(data) = gate.open_data_mut()
        {
            data.opened_at = now;
        }

        tracing::info!(
            breaker = %self.context.name,
            %from,
            %to,
            batch,
            "breaker state changed"
        );
        changes.push(self.change(from, to, now));
    }

    fn expiry_for(&self, state: State, now: Duration) -> Option<Duration> {
        match state {
            State::Closed => self
                .context
                .settings
                .window
                .and_then(|window| now.checked_add(window)),
            State::Open => now.checked_add(self.cool_down()),
            State::HalfOpen => Some(now),
        }
    }

    /// Cool-down with jitter applied
    /// Uses chrono-machines formula: cool_down * (1 - jitter + rand * jitter)
    fn cool_down(&self) -> Duration {
        let settings = &self.context.settings;
        if settings.jitter_factor <= 0.0 {
            return settings.cool_down;
        }

        // Policy works in whole milliseconds; draw the factor on a fixed scale
        // and apply it to the exact cool-down
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: JITTER_SCALE_MS,
            multiplier: 1.0,
            max_delay_ms: JITTER_SCALE_MS,
        };
        let factor =
            policy.calculate_delay(1, settings.jitter_factor) as f64 / JITTER_SCALE_MS as f64;

        Duration::try_from_secs_f64(settings.cool_down.as_secs_f64() * factor)
            .unwrap_or(settings.cool_down)
    }

    fn change(&self, from: State, to: State, at: Duration) -> StateChange {
        StateChange {
            breaker: self.context.name.clone(),
            from,
            to,
            at,
        }
    }

    /// Fire hooks and queue notifications; never called with the lock held
    fn announce(&self, changes: Vec<StateChange>) {
        for change in changes {
            self.callbacks.trigger(&change);
            if matches!(change.to, State::Open | State::Closed)
                && let Some(worker) = &self.notifications
            {
                worker.send(change);
            }
        }
    }
}

impl std::fmt::Debug for Breaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breaker")
            .field("context", &self.context)
            .field("callbacks", &self.callbacks)
            .field("notifications", &self.notifications.is_some())
            .field("panic_policy", &self.panic_policy)
            .finish()
    }
}

fn state_of(gate: &DynamicGate) -> State {
    match gate.current_state() {
        "Open" => State::Open,
        "HalfOpen" => State::HalfOpen,
        _ => State::Closed,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
