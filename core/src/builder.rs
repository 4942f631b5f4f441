//! Builder API for ergonomic breaker configuration

use crate::{
    breaker::Breaker,
    callbacks::{Callbacks, StateChange},
    clock::{Clock, MonotonicClock},
    config::{Config, NotifyFormat, PanicPolicy},
    errors::ConfigError,
    notify::{self, Notifier},
    strategy::{StrategyKind, StrategyOptions},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating breakers with a fluent API
///
/// Every setter is infallible; values outside their valid range fall back to
/// defaults when the breaker is built. Only an unknown strategy name passed to
/// [`strategy_named`](Self::strategy_named) makes [`build`](Self::build) fail.
pub struct BreakerBuilder {
    name: String,
    config: Config,
    strategy_error: Option<ConfigError>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn Notifier>>,
    callbacks: Callbacks,
}

impl BreakerBuilder {
    /// Create a new builder for a breaker with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            strategy_error: None,
            clock: None,
            notifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Start from an existing configuration (e.g. parsed with `Config::from_json`)
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Closed-state sampling window; zero keeps one window forever
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window_secs = window.as_secs_f64();
        self
    }

    /// Time spent open before trial calls are admitted
    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.config.cool_down_secs = cool_down.as_secs_f64();
        self
    }

    /// Trial calls admitted while half-open, and successes needed to close
    pub fn half_open_max_calls(mut self, calls: u64) -> Self {
        self.config.half_open_max_calls = calls;
        self
    }

    /// Trip once the window holds `threshold` failures
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.strategy.kind = StrategyKind::Failures;
        self.config.strategy.failure_threshold = threshold;
        self
    }

    /// Trip after `threshold` failures in a row
    pub fn continuous_failure_threshold(mut self, threshold: u64) -> Self {
        self.config.strategy.kind = StrategyKind::ConsecutiveFailures;
        self.config.strategy.continuous_failure_threshold = threshold;
        self
    }

    /// Trip when failures / requests reaches `rate`, once the window has seen
    /// at least `minimum_calls` requests
    pub fn failure_rate(mut self, rate: f64, minimum_calls: u64) -> Self {
        self.config.strategy.kind = StrategyKind::FailureRate;
        self.config.strategy.failure_rate = rate;
        self.config.strategy.minimum_calls = minimum_calls;
        self
    }

    pub fn strategy(mut self, options: StrategyOptions) -> Self {
        self.config.strategy = options;
        self
    }

    /// Select the strategy kind by name, keeping the configured parameters
    ///
    /// # Examples
    ///
    /// ```rust
    /// use windowed_breaker::{Breaker, ConfigError};
    ///
    /// let breaker = Breaker::builder("api").strategy_named("continuous-failures").build();
    /// assert!(breaker.is_ok());
    ///
    /// let breaker = Breaker::builder("api").strategy_named("quorum").build();
    /// assert!(matches!(breaker, Err(ConfigError::UnknownStrategy(_))));
    /// ```
    pub fn strategy_named(mut self, name: &str) -> Self {
        match name.parse::<StrategyKind>() {
            Ok(kind) => self.config.strategy.kind = kind,
            Err(e) => self.strategy_error = Some(e),
        }
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: cool_down * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.config.panic_policy = policy;
        self
    }

    /// Set a custom time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Deliver state-change notifications through a custom notifier
    ///
    /// Takes precedence over [`webhook`](Self::webhook).
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Post state-change notifications to a robot webhook
    pub fn webhook(mut self, url: impl Into<String>) -> Self {
        self.config.webhook = Some(url.into());
        self
    }

    pub fn notify_format(mut self, format: NotifyFormat) -> Self {
        self.config.notify_format = format;
        self
    }

    /// Set callback for when the breaker opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when the breaker closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when the breaker enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Build the breaker
    pub fn build(self) -> Result<Breaker, ConfigError> {
        if let Some(e) = self.strategy_error {
            return Err(e);
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let notifier = self
            .notifier
            .or_else(|| notify::from_webhook(self.config.webhook.as_deref()));

        Ok(Breaker::assemble(
            self.name,
            self.config.settings(),
            clock,
            self.callbacks,
            notifier,
            self.config.notify_format,
            self.config.panic_policy,
        ))
    }
}
