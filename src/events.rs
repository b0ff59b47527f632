//! Fire-and-forget event channel for log lines, progress and scan summaries.
//!
//! Every component reports through an [`EventBus`]. Publishing never blocks and
//! never fails when nobody is subscribed, and log events are mirrored into
//! `tracing` so they are visible even without a subscriber.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::decision::NestedArchiveRequest;
use crate::scanner::ScanSummary;

const CHANNEL_CAPACITY: usize = 256;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Progress of a move batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Item count of the outermost batch.
    pub total: usize,
    /// Items processed so far, including items from unpacked archives.
    pub processed: usize,
    /// The item that was just processed.
    pub current: Option<PathBuf>,
}

/// Everything the pipeline reports to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Progress(ProgressEvent),
    Summary(ScanSummary),
    DecisionRequested(NestedArchiveRequest),
}

/// Broadcast channel shared by all pipeline components.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Registers a new observer. Slow observers may miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event; a send with no receivers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Logs a message at `level` and forwards it to observers.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(Event::Log {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.emit(Event::Progress(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.info("nobody listens");
        bus.progress(ProgressEvent {
            total: 1,
            processed: 1,
            current: None,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_log() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.warn("careful");

        match rx.recv().await.unwrap() {
            Event::Log { level, message, .. } => {
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(message, "careful");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
