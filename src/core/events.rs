//! Lifecycle and progress events, and the sinks that receive them.
//!
//! Events are produced only by the drive watcher (`Inserted` / `Removed`)
//! and by workflow runners (everything else). A sink must never block the
//! emitting task for long: it is called from the watcher loop and from any
//! number of concurrent workflow tasks.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Inserted,
    Removed,
    Start,
    Progress,
    Info,
    Warning,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Removed => "removed",
            Self::Start => "start",
            Self::Progress => "progress",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// True for the two kinds that end a workflow instance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub volume_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(kind: EventKind, volume_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            volume_id: volume_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.kind.as_str(),
            self.volume_id,
            self.message
        )
    }
}

/// Receiver of the event stream.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: WorkflowEvent);
}

/// Forwards events into an unbounded channel. Sending never blocks; events
/// are dropped once the receiver is gone.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }
}

/// Writes every event as a structured log line.
#[derive(Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: WorkflowEvent) {
        let volume = event.volume_id.as_str();
        let message = event.message.as_str();
        match event.kind {
            EventKind::Error => error!(volume, kind = "error", "{message}"),
            EventKind::Warning => warn!(volume, kind = "warning", "{message}"),
            EventKind::Progress => debug!(volume, kind = "progress", "{message}"),
            kind => info!(volume, kind = kind.as_str(), "{message}"),
        }
    }
}

/// Delivers each event to every inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn notify(&self, event: WorkflowEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.notify(event.clone());
            }
            last.notify(event);
        }
    }
}

/// Per-volume event emitter handed to workflow stages.
#[derive(Clone)]
pub struct Reporter {
    volume_id: String,
    sink: Arc<dyn EventSink>,
}

impl Reporter {
    pub fn new(volume_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            volume_id: volume_id.into(),
            sink,
        }
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        self.sink
            .notify(WorkflowEvent::new(kind, self.volume_id.clone(), message));
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.emit(EventKind::Progress, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventKind::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(EventKind::Warning, message);
    }
}
