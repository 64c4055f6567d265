use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use crate::clock::TimeProvider;
use crate::event::{OutputEvent, OutputEventListener, StyledTextOutputEvent};
use crate::operation::OperationIdRegistry;
use crate::stream::SharedTarget;

/// Consumer of assembled lines. `terminated` is false for lines forced out by
/// a flush or by the line length limit.
pub trait TextListener: Send + Sync + 'static {
    fn on_output(&self, text: &str, terminated: bool) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: TextListener + ?Sized> TextListener for Arc<T> {
    fn on_output(&self, text: &str, terminated: bool) -> io::Result<()> {
        (**self).on_output(text, terminated)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }
}

struct Discard;

impl TextListener for Discard {
    fn on_output(&self, _text: &str, _terminated: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Holds where assembled lines currently go.
///
/// Writers clone the current listener out of the lock before delivering, so a
/// swap never waits on destination I/O.
pub struct ListenerSlot {
    current: RwLock<Arc<dyn TextListener>>,
}

impl Default for ListenerSlot {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(Discard)),
        }
    }
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Arc<dyn TextListener> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, listener: Arc<dyn TextListener>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }
}

impl TextListener for ListenerSlot {
    fn on_output(&self, text: &str, terminated: bool) -> io::Result<()> {
        self.get().on_output(text, terminated)
    }

    fn flush(&self) -> io::Result<()> {
        self.get().flush()
    }
}

/// Forwards lines verbatim to the target a stream had before capture.
pub struct OriginalDestination {
    target: SharedTarget,
}

impl OriginalDestination {
    pub fn new(target: SharedTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &SharedTarget {
        &self.target
    }
}

impl TextListener for OriginalDestination {
    fn on_output(&self, text: &str, terminated: bool) -> io::Result<()> {
        if terminated {
            let mut line = String::with_capacity(text.len() + 1);
            line.push_str(text);
            line.push('\n');
            self.target.write_text(line.as_bytes())
        } else {
            self.target.write_text(text.as_bytes())
        }
    }

    fn flush(&self) -> io::Result<()> {
        self.target.flush()
    }
}

/// Turns each line into a [`StyledTextOutputEvent`].
pub struct EventDestination {
    listener: Arc<dyn OutputEventListener>,
    category: String,
    clock: Arc<dyn TimeProvider>,
    operations: Arc<dyn OperationIdRegistry>,
}

impl EventDestination {
    pub fn new(
        listener: Arc<dyn OutputEventListener>,
        category: impl Into<String>,
        clock: Arc<dyn TimeProvider>,
        operations: Arc<dyn OperationIdRegistry>,
    ) -> Self {
        Self {
            listener,
            category: category.into(),
            clock,
            operations,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn clock(&self) -> Arc<dyn TimeProvider> {
        self.clock.clone()
    }

    pub fn operations(&self) -> Arc<dyn OperationIdRegistry> {
        self.operations.clone()
    }
}

impl TextListener for EventDestination {
    fn on_output(&self, text: &str, _terminated: bool) -> io::Result<()> {
        let operation_id = self.operations.current_operation_id();
        let event = StyledTextOutputEvent {
            timestamp: self.clock.now(),
            category: self.category.clone(),
            style: None,
            operation_id,
            text: text.to_string(),
        };
        self.listener.on_output(OutputEvent::StyledText(event));
        Ok(())
    }
}
