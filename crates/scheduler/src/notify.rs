//! Notification sinks.
//!
//! Every lifecycle event of the scheduler goes through a [`Notifier`]. Sinks
//! are best-effort: callers use [`notify_best_effort`], which logs a failed
//! delivery and carries on.

use std::{fmt, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use hunter_metrics::{counter, labels, notify as notify_metrics};

use crate::{Error, Result};

/// Severity / kind of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
    Start,
    Complete,
    Heartbeat,
}

impl NotifyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Start => "START",
            Self::Complete => "COMPLETE",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Info => "ℹ️",
            Self::Success => "✅",
            Self::Warning => "⚠️",
            Self::Error => "❌",
            Self::Start => "🚀",
            Self::Complete => "🎯",
            Self::Heartbeat => "💓",
        }
    }
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, level: NotifyLevel) -> Result<()>;
}

/// Deliver `message`, logging instead of returning a failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, message: &str, level: NotifyLevel) {
    match notifier.notify(message, level).await {
        Ok(()) => {
            #[cfg(feature = "metrics")]
            counter!(notify_metrics::SENT_TOTAL, labels::LEVEL => level.as_str()).increment(1);
        },
        Err(e) => {
            warn!(error = %e, level = %level, "notification delivery failed");
            #[cfg(feature = "metrics")]
            counter!(notify_metrics::FAILURES_TOTAL, labels::LEVEL => level.as_str())
                .increment(1);
        },
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) -> Result<()> {
        match level {
            NotifyLevel::Error => error!(level = %level, "{message}"),
            NotifyLevel::Warning => warn!(level = %level, "{message}"),
            NotifyLevel::Heartbeat => debug!(level = %level, "{message}"),
            _ => info!(level = %level, "{message}"),
        }
        Ok(())
    }
}

/// Sends every notification to all sinks. Fails only after trying each one.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(message, level).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::message(format!(
                "{} of {} sinks failed: {}",
                failures.len(),
                self.sinks.len(),
                failures.join("; ")
            )))
        }
    }
}

/// Keeps every notification in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: std::sync::Mutex<Vec<(NotifyLevel, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NotifyLevel, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, level: NotifyLevel) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, message: &str, level: NotifyLevel) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str, _level: NotifyLevel) -> Result<()> {
            Err(Error::message("sink down"))
        }
    }

    #[tokio::test]
    async fn fanout_delivers_to_all_sinks_even_when_one_fails() {
        let a = Arc::new(MemoryNotifier::new());
        let b = Arc::new(MemoryNotifier::new());
        let fanout = FanoutNotifier::default()
            .with(a.clone())
            .with(Arc::new(FailingNotifier))
            .with(b.clone());

        let err = fanout.notify("hello", NotifyLevel::Info).await.unwrap_err();
        assert!(err.to_string().contains("1 of 3 sinks failed"));
        assert_eq!(a.messages(), vec![(NotifyLevel::Info, "hello".to_string())]);
        assert_eq!(b.count(NotifyLevel::Info), 1);
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        notify_best_effort(&FailingNotifier, "hello", NotifyLevel::Error).await;
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier
            .notify("hello", NotifyLevel::Heartbeat)
            .await
            .unwrap();
    }

    #[test]
    fn level_labels() {
        assert_eq!(NotifyLevel::Complete.as_str(), "COMPLETE");
        assert_eq!(NotifyLevel::Heartbeat.emoji(), "💓");
    }
}
