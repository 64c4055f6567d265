use std::sync::{mpsc, Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::operation::OperationId;

/// Logging threshold announced to the event pipeline.
///
/// The capture system only compares levels for equality; ordering and
/// filtering belong to whoever consumes the events.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Lifecycle,
    Warn,
    Quiet,
    Error,
}

/// One completed line of captured output.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StyledTextOutputEvent {
    pub timestamp: Timestamp,
    pub category: String,
    /// Captured text carries no styling; kept so renderers share one event shape.
    pub style: Option<String>,
    pub operation_id: Option<OperationId>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct LogLevelChangeEvent {
    pub new_level: LogLevel,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    StyledText(StyledTextOutputEvent),
    LogLevelChange(LogLevelChangeEvent),
}

impl OutputEvent {
    pub fn as_styled_text(&self) -> Option<&StyledTextOutputEvent> {
        match self {
            OutputEvent::StyledText(event) => Some(event),
            OutputEvent::LogLevelChange(_) => None,
        }
    }

    pub fn new_level(&self) -> Option<LogLevel> {
        match self {
            OutputEvent::LogLevelChange(event) => Some(event.new_level),
            OutputEvent::StyledText(_) => None,
        }
    }
}

/// Receiver of the events produced by a capture system.
///
/// Delivery is fire-and-forget: implementations must not block and have no
/// way to report failure back to the writer.
pub trait OutputEventListener: Send + Sync + 'static {
    fn on_output(&self, event: OutputEvent);
}

impl<T: OutputEventListener + ?Sized> OutputEventListener for Arc<T> {
    fn on_output(&self, event: OutputEvent) {
        (**self).on_output(event)
    }
}

/// Buffers every event in memory.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: Mutex<Vec<OutputEvent>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Text of every captured line, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(OutputEvent::as_styled_text)
            .map(|event| event.text.clone())
            .collect()
    }

    pub fn level_changes(&self) -> Vec<LogLevel> {
        self.events()
            .iter()
            .filter_map(OutputEvent::new_level)
            .collect()
    }

    pub fn take(&self) -> Vec<OutputEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputEventListener for CollectingListener {
    fn on_output(&self, event: OutputEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Events sent after the receiver hangs up are dropped.
impl OutputEventListener for mpsc::Sender<OutputEvent> {
    fn on_output(&self, event: OutputEvent) {
        let _ = self.send(event);
    }
}

#[cfg(feature = "tokio")]
impl OutputEventListener for tokio::sync::mpsc::UnboundedSender<OutputEvent> {
    fn on_output(&self, event: OutputEvent) {
        let _ = self.send(event);
    }
}

/// Re-emits events as `tracing` records under the `stdio_capture::output` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl OutputEventListener for TracingListener {
    fn on_output(&self, event: OutputEvent) {
        match event {
            OutputEvent::StyledText(event) => tracing::info!(
                target: "stdio_capture::output",
                category = %event.category,
                operation_id = ?event.operation_id,
                timestamp = event.timestamp.as_millis(),
                "{}",
                event.text
            ),
            OutputEvent::LogLevelChange(event) => tracing::debug!(
                target: "stdio_capture::output",
                level = ?event.new_level,
                "capture level changed"
            ),
        }
    }
}
