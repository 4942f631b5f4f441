//! State-change notifications
//!
//! The breaker hands every transition into Open or Closed to a background
//! worker, which renders a message and pushes it through a [`Notifier`].
//! Delivery is best effort: failures are logged and never reach callers of
//! the breaker, and nothing here runs while the breaker lock is held.

#[cfg(feature = "webhook")]
mod webhook;

#[cfg(feature = "webhook")]
pub use webhook::WebhookNotifier;

use crate::callbacks::StateChange;
use crate::config::NotifyFormat;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use thiserror::Error;

/// Channel able to push plain-text or markdown messages
///
/// The endpoint is fixed once a notifier is handed to a breaker, which shares
/// it with a delivery thread. Change it beforehand, e.g. with
/// [`WebhookNotifier::set_webhook`], or build a new breaker.
pub trait Notifier: Send + Sync + Debug {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Endpoint the notifier delivers to
    fn webhook(&self) -> &str;

    fn notify_text(&self, content: &str, at_user_ids: &[String]) -> Result<(), NotifyError>;

    fn notify_markdown(&self, content: &str, at_user_ids: &[String]) -> Result<(), NotifyError>;
}

/// Errors raised while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[cfg(feature = "webhook")]
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook payload could not be encoded or decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("send message error = {message} (code {code})")]
    Remote { code: i64, message: String },
    #[error("{0}")]
    Other(String),
}

/// Notices waiting for delivery; further notices are dropped while full
pub(crate) const NOTIFY_QUEUE_CAPACITY: usize = 64;

/// Background delivery for one breaker
#[derive(Debug)]
pub(crate) struct NotifyWorker {
    sender: mpsc::SyncSender<StateChange>,
}

impl NotifyWorker {
    /// Start the delivery thread; it exits once the worker is dropped
    pub(crate) fn spawn(
        breaker: &str,
        notifier: Arc<dyn Notifier>,
        format: NotifyFormat,
    ) -> io::Result<Self> {
        Self::with_capacity(breaker, notifier, format, NOTIFY_QUEUE_CAPACITY)
    }

    pub(crate) fn with_capacity(
        breaker: &str,
        notifier: Arc<dyn Notifier>,
        format: NotifyFormat,
        capacity: usize,
    ) -> io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<StateChange>(capacity);

        thread::Builder::new()
            .name(format!("{breaker}-notify"))
            .spawn(move || {
                for change in receiver {
                    deliver(notifier.as_ref(), format, &change);
                }
            })?;

        Ok(Self { sender })
    }

    /// Queue a notice without blocking; returns whether it was queued
    pub(crate) fn send(&self, change: StateChange) -> bool {
        match self.sender.try_send(change) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(change)) => {
                tracing::warn!(
                    breaker = %change.breaker,
                    to = %change.to,
                    "notification queue full, dropping state change"
                );
                false
            }
            Err(mpsc::TrySendError::Disconnected(change)) => {
                tracing::warn!(
                    breaker = %change.breaker,
                    to = %change.to,
                    "notification worker has stopped, dropping state change"
                );
                false
            }
        }
    }
}

/// Notifier for a configured webhook URL; `None` when no URL is set
pub(crate) fn from_webhook(webhook: Option<&str>) -> Option<Arc<dyn Notifier>> {
    let webhook = webhook.filter(|url| !url.is_empty())?;

    #[cfg(feature = "webhook")]
    {
        Some(Arc::new(WebhookNotifier::new(webhook)))
    }

    #[cfg(not(feature = "webhook"))]
    {
        tracing::warn!(
            webhook,
            "webhook configured but the `webhook` feature is disabled, notifications off"
        );
        None
    }
}

fn deliver(notifier: &dyn Notifier, format: NotifyFormat, change: &StateChange) {
    let content = render(change, format);
    let result = match format {
        NotifyFormat::Text => notifier.notify_text(&content, &[]),
        NotifyFormat::Markdown => notifier.notify_markdown(&content, &[]),
    };

    match result {
        Ok(()) => tracing::debug!(
            breaker = %change.breaker,
            notifier = notifier.name(),
            to = %change.to,
            "state change notification sent"
        ),
        Err(e) => tracing::warn!(
            breaker = %change.breaker,
            notifier = notifier.name(),
            webhook = notifier.webhook(),
            error = %e,
            "failed to send state change notification"
        ),
    }
}

/// Message body for a transition
pub(crate) fn render(change: &StateChange, format: NotifyFormat) -> String {
    match format {
        NotifyFormat::Text => format!(
            "circuit breaker [{}] state changed: {} -> {} (at {:.3}s)",
            change.breaker,
            change.from,
            change.to,
            change.at.as_secs_f64()
        ),
        NotifyFormat::Markdown => format!(
            "### Circuit breaker {}\n\n- breaker: **{}**\n- transition: `{}` -> `{}`\n- at: {:.3}s",
            change.to,
            change.breaker,
            change.from,
            change.to,
            change.at.as_secs_f64()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct Recording {
        sender: Mutex<mpsc::Sender<(String, String)>>,
        fail: bool,
    }

    impl Recording {
        fn push(&self, kind: &str, content: &str) -> Result<(), NotifyError> {
            self.sender
                .lock()
                .unwrap()
                .send((kind.to_string(), content.to_string()))
                .unwrap();
            if self.fail {
                Err(NotifyError::Other("channel down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn webhook(&self) -> &str {
            ""
        }

        fn notify_text(&self, content: &str, _at: &[String]) -> Result<(), NotifyError> {
            self.push("text", content)
        }

        fn notify_markdown(&self, content: &str, _at: &[String]) -> Result<(), NotifyError> {
            self.push("markdown", content)
        }
    }

    fn open_change() -> StateChange {
        StateChange {
            breaker: "payments".to_string(),
            from: State::Closed,
            to: State::Open,
            at: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_render_text() {
        assert_eq!(
            render(&open_change(), NotifyFormat::Text),
            "circuit breaker [payments] state changed: closed -> open (at 1.500s)"
        );
    }

    #[test]
    fn test_render_markdown() {
        let body = render(&open_change(), NotifyFormat::Markdown);

        assert!(body.starts_with("### Circuit breaker open"));
        assert!(body.contains("**payments**"));
        assert!(body.contains("`closed` -> `open`"));
    }

    #[test]
    fn test_worker_delivers_in_order() {
        let (tx, rx) = mpsc::channel();
        let notifier = Arc::new(Recording {
            sender: Mutex::new(tx),
            fail: false,
        });

        let worker = NotifyWorker::spawn("payments", notifier, NotifyFormat::Markdown).unwrap();
        worker.send(open_change());
        worker.send(StateChange {
            from: State::HalfOpen,
            to: State::Closed,
            ..open_change()
        });

        let timeout = Duration::from_secs(5);
        let (kind, first) = rx.recv_timeout(timeout).unwrap();
        let (_, second) = rx.recv_timeout(timeout).unwrap();

        assert_eq!(kind, "markdown");
        assert!(first.contains("`closed` -> `open`"));
        assert!(second.contains("`half-open` -> `closed`"));
    }

    /// Parks inside every delivery until released
    #[derive(Debug)]
    struct Gated {
        started: Mutex<mpsc::Sender<String>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Notifier for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn webhook(&self) -> &str {
            ""
        }

        fn notify_text(&self, content: &str, _at: &[String]) -> Result<(), NotifyError> {
            let _ = self.started.lock().unwrap().send(content.to_string());
            let _ = self.release.lock().unwrap().recv();
            Ok(())
        }

        fn notify_markdown(&self, content: &str, at: &[String]) -> Result<(), NotifyError> {
            self.notify_text(content, at)
        }
    }

    #[test]
    fn test_stalled_delivery_drops_overflow_without_blocking() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let notifier = Arc::new(Gated {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });

        let worker =
            NotifyWorker::with_capacity("payments", notifier, NotifyFormat::Text, 2).unwrap();

        assert!(worker.send(open_change()));
        let timeout = Duration::from_secs(5);
        started_rx.recv_timeout(timeout).expect("first notice in delivery");

        // Delivery is parked: two notices fit in the queue, the rest are dropped
        let queued: Vec<bool> = (0..5).map(|_| worker.send(open_change())).collect();
        assert_eq!(queued, vec![true, true, false, false, false]);

        drop(release_tx);
        assert!(started_rx.recv_timeout(timeout).is_ok());
        assert!(started_rx.recv_timeout(timeout).is_ok());
        assert!(started_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_from_webhook() {
        assert!(from_webhook(None).is_none());
        assert!(from_webhook(Some("")).is_none());

        #[cfg(feature = "webhook")]
        {
            let notifier = from_webhook(Some("http://127.0.0.1:9/hook")).unwrap();
            assert_eq!(notifier.name(), "webhook");
            assert_eq!(notifier.webhook(), "http://127.0.0.1:9/hook");
        }
    }

    #[test]
    fn test_worker_survives_delivery_errors() {
        let (tx, rx) = mpsc::channel();
        let notifier = Arc::new(Recording {
            sender: Mutex::new(tx),
            fail: true,
        });

        let worker = NotifyWorker::spawn("payments", notifier, NotifyFormat::Text).unwrap();
        worker.send(open_change());
        worker.send(open_change());

        let timeout = Duration::from_secs(5);
        assert!(rx.recv_timeout(timeout).is_ok());
        assert!(rx.recv_timeout(timeout).is_ok());
    }
}
