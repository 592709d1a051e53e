// 📣 Notifications - discrete outward events
// Display and timing belong to the caller; the core only emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: Level,
    /// Entity or workflow the event is about (e.g. "system_model:fx-forward-v1")
    pub subject: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: Level, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Notification {
            level,
            subject: subject.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Success, subject, message)
    }

    pub fn error(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, subject, message)
    }
}

/// Receiver of notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards every notification to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        match n.level {
            Level::Success | Level::Info => tracing::info!(subject = %n.subject, "{}", n.message),
            Level::Warning => tracing::warn!(subject = %n.subject, "{}", n.message),
            Level::Error => tracing::error!(subject = %n.subject, "{}", n.message),
        }
    }
}

/// Keeps notifications in memory until drained
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *events)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_and_drains() {
        let sink = MemorySink::new();
        sink.notify(Notification::success("mapping:1", "saved"));
        sink.notify(Notification::error("mapping:2", "rejected"));
        assert_eq!(sink.len(), 2);

        let events = sink.drain();
        assert_eq!(events[0].level, Level::Success);
        assert_eq!(events[1].subject, "mapping:2");
        assert!(sink.is_empty());
    }
}
