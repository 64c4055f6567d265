use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::clock::{SystemClock, TimeProvider};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::event::{LogLevel, LogLevelChangeEvent, OutputEvent, OutputEventListener};
use crate::line_buffer::LinePerThreadBuffer;
use crate::listener::{EventDestination, ListenerSlot, OriginalDestination};
use crate::operation::{OperationIdRegistry, ThreadOperationRegistry};
use crate::stream::{
    process_stream, same_target, Channel, RedirectableStream, SharedTarget, StreamAccessor,
};

/// A source of output events whose capture can be switched on and rolled back.
///
/// Every state change hands back a snapshot of the state it replaced. Restoring
/// that snapshot undoes the change, which is also the only way to stop capture.
pub trait LoggingSourceSystem {
    type Snapshot: Copy;

    fn snapshot(&self) -> Self::Snapshot;

    /// Puts the system back into the state a snapshot describes.
    ///
    /// Snapshots are tied to the system type that produced them:
    ///
    /// ```compile_fail
    /// use stdio_capture::{
    ///     CollectingListener, LogLevel, LoggingSourceSystem, PrintStreamLoggingSystem,
    /// };
    ///
    /// struct Silent;
    ///
    /// impl LoggingSourceSystem for Silent {
    ///     type Snapshot = bool;
    ///
    ///     fn snapshot(&self) -> bool {
    ///         false
    ///     }
    ///     fn restore(&self, _snapshot: bool) {}
    ///     fn set_level(&self, _level: LogLevel) -> bool {
    ///         false
    ///     }
    ///     fn start_capture(&self) -> bool {
    ///         false
    ///     }
    /// }
    ///
    /// let system = PrintStreamLoggingSystem::stdout(CollectingListener::new());
    /// system.restore(Silent.snapshot());
    /// ```
    fn restore(&self, snapshot: Self::Snapshot);

    fn set_level(&self, level: LogLevel) -> Self::Snapshot;

    fn start_capture(&self) -> Self::Snapshot;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CaptureSnapshot {
    enabled: bool,
    level: LogLevel,
}

impl CaptureSnapshot {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

struct CaptureState {
    enabled: bool,
    level: LogLevel,
    original: Option<Arc<OriginalDestination>>,
}

impl CaptureState {
    fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            enabled: self.enabled,
            level: self.level,
        }
    }
}

/// Routes text written to a stream into [`OutputEvent`]s while capture is on.
pub struct PrintStreamLoggingSystem<S: StreamAccessor> {
    stream: S,
    state: Mutex<CaptureState>,
    slot: Arc<ListenerSlot>,
    buffer: Arc<LinePerThreadBuffer<Arc<ListenerSlot>>>,
    events: Arc<dyn OutputEventListener>,
    destination: Arc<EventDestination>,
    category: String,
}

impl PrintStreamLoggingSystem<&'static RedirectableStream> {
    /// Captures the process-wide stdout stream under `system.out`.
    pub fn stdout(listener: impl OutputEventListener) -> Self {
        Self::build(
            process_stream(Channel::Stdout),
            Arc::new(listener),
            CaptureConfig::stdout(),
        )
    }

    /// Captures the process-wide stderr stream under `system.err`.
    pub fn stderr(listener: impl OutputEventListener) -> Self {
        Self::build(
            process_stream(Channel::Stderr),
            Arc::new(listener),
            CaptureConfig::stderr(),
        )
    }
}

impl<S: StreamAccessor> PrintStreamLoggingSystem<S> {
    pub fn new(
        stream: S,
        listener: impl OutputEventListener,
        config: CaptureConfig,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self::build(stream, Arc::new(listener), config))
    }

    fn build(stream: S, events: Arc<dyn OutputEventListener>, config: CaptureConfig) -> Self {
        let slot = Arc::new(ListenerSlot::new());
        let buffer = Arc::new(
            LinePerThreadBuffer::new(slot.clone()).with_max_line_bytes(config.max_line_bytes),
        );
        let destination = Arc::new(EventDestination::new(
            events.clone(),
            config.category.clone(),
            Arc::new(SystemClock),
            Arc::new(ThreadOperationRegistry),
        ));
        Self {
            stream,
            state: Mutex::new(CaptureState {
                enabled: false,
                level: config.initial_level,
                original: None,
            }),
            slot,
            buffer,
            events,
            destination,
            category: config.category,
        }
    }

    pub fn with_time_provider(self, clock: impl TimeProvider) -> Self {
        self.with_destination(Some(Arc::new(clock)), None)
    }

    pub fn with_operation_registry(self, operations: impl OperationIdRegistry) -> Self {
        self.with_destination(None, Some(Arc::new(operations)))
    }

    fn with_destination(
        mut self,
        clock: Option<Arc<dyn TimeProvider>>,
        operations: Option<Arc<dyn OperationIdRegistry>>,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| self.destination.clock());
        let operations = operations.unwrap_or_else(|| self.destination.operations());
        self.destination = Arc::new(EventDestination::new(
            self.events.clone(),
            self.category.clone(),
            clock,
            operations,
        ));
        if self.lock().enabled {
            self.slot.set(self.destination.clone());
        }
        self
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().enabled
    }

    pub fn level(&self) -> LogLevel {
        self.lock().level
    }

    /// The target the stream is pointed at while capture is installed.
    pub fn capture_target(&self) -> SharedTarget {
        self.buffer.clone()
    }

    /// Starts capture and restores the previous state when the guard drops.
    pub fn capture_scope(&self) -> CaptureGuard<'_, S> {
        CaptureGuard {
            snapshot: self.start_capture(),
            system: self,
        }
    }

    /// Emits the partial lines of every live thread, e.g. before process exit.
    pub fn flush_all(&self) -> io::Result<()> {
        self.buffer.flush_all()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_pending(&self) {
        if let Err(err) = self.buffer.flush_current() {
            warn!(category = %self.category, error = %err, "failed to flush captured output");
        }
    }

    fn announce_level(&self, level: LogLevel) {
        self.events
            .on_output(OutputEvent::LogLevelChange(LogLevelChangeEvent { new_level: level }));
    }

    fn install(&self, state: &mut CaptureState) {
        if state.original.is_none() {
            state.original = Some(Arc::new(OriginalDestination::new(self.stream.get())));
        }
        state.enabled = true;
        self.flush_pending();
        self.announce_level(state.level);
        self.slot.set(self.destination.clone());

        let capture_target = self.capture_target();
        if !same_target(&self.stream.get(), &capture_target) {
            self.stream.set(capture_target);
        }
        debug!(category = %self.category, level = ?state.level, "installed output capture");
    }

    fn uninstall(&self, state: &CaptureState) {
        let Some(original) = state.original.clone() else {
            return;
        };
        self.flush_pending();
        self.slot.set(original.clone());
        self.stream.set(original.target().clone());
        debug!(category = %self.category, "uninstalled output capture");
    }
}

impl<S: StreamAccessor> LoggingSourceSystem for PrintStreamLoggingSystem<S> {
    type Snapshot = CaptureSnapshot;

    fn snapshot(&self) -> CaptureSnapshot {
        self.lock().snapshot()
    }

    fn restore(&self, snapshot: CaptureSnapshot) {
        let mut state = self.lock();
        state.enabled = snapshot.enabled;
        state.level = snapshot.level;
        debug!(
            category = %self.category,
            enabled = snapshot.enabled,
            level = ?snapshot.level,
            "restoring output capture state"
        );
        if snapshot.enabled {
            self.install(&mut state);
        } else {
            self.uninstall(&state);
        }
    }

    fn set_level(&self, level: LogLevel) -> CaptureSnapshot {
        let mut state = self.lock();
        let snapshot = state.snapshot();
        if level != state.level {
            state.level = level;
            if state.enabled {
                self.flush_pending();
                self.announce_level(level);
            }
        }
        snapshot
    }

    fn start_capture(&self) -> CaptureSnapshot {
        let mut state = self.lock();
        let snapshot = state.snapshot();
        if !state.enabled {
            self.install(&mut state);
        }
        snapshot
    }
}

/// Restores the state captured by [`PrintStreamLoggingSystem::capture_scope`].
#[must_use = "capture is rolled back as soon as the guard is dropped"]
pub struct CaptureGuard<'a, S: StreamAccessor> {
    system: &'a PrintStreamLoggingSystem<S>,
    snapshot: CaptureSnapshot,
}

impl<S: StreamAccessor> CaptureGuard<'_, S> {
    pub fn snapshot(&self) -> CaptureSnapshot {
        self.snapshot
    }
}

impl<S: StreamAccessor> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        self.system.restore(self.snapshot);
    }
}
