#![forbid(unsafe_code)]
//! Capture text written to stdout/stderr as structured output events.
//!
//! A [`PrintStreamLoggingSystem`] redirects a [`RedirectableStream`] into a
//! per-thread line assembler. Every completed line becomes a
//! [`StyledTextOutputEvent`] stamped with a category, a timestamp and the
//! current [`OperationId`]. Capture can be undone exactly:
//! - every state change returns a [`CaptureSnapshot`] of the state it replaced;
//! - [`LoggingSourceSystem::restore`] re-arms or disarms capture from such a
//!   snapshot and points the stream back at its original target.
//!
//! The process-wide streams are reached through [`stdout()`]/[`stderr()`] or the
//! [`outln!`]/[`errln!`] family of macros. The macros evaluate to
//! `io::Result<()>`.
//!
//! ```rust
//! use std::sync::Arc;
//! use stdio_capture::{
//!     outln, CollectingListener, LogLevel, LoggingSourceSystem, PrintStreamLoggingSystem,
//! };
//!
//! # fn main() -> std::io::Result<()> {
//! let events = Arc::new(CollectingListener::new());
//! let system = PrintStreamLoggingSystem::stdout(events.clone());
//!
//! let before = system.start_capture();
//! system.set_level(LogLevel::Info);
//! outln!("hello")?;
//! system.restore(before);
//!
//! assert_eq!(events.lines(), vec!["hello".to_string()]);
//! # Ok(()) }
//! ```

mod clock;
mod config;
mod error;
mod event;
mod line_buffer;
mod listener;
mod operation;
mod stream;
mod system;

pub use clock::{FixedClock, SystemClock, TimeProvider, Timestamp};
pub use config::{CaptureConfig, STDERR_CATEGORY, STDOUT_CATEGORY};
pub use error::CaptureError;
pub use event::{
    CollectingListener, LogLevel, LogLevelChangeEvent, OutputEvent, OutputEventListener,
    StyledTextOutputEvent, TracingListener,
};
pub use line_buffer::LinePerThreadBuffer;
pub use listener::{EventDestination, ListenerSlot, OriginalDestination, TextListener};
pub use operation::{
    NoOperations, OperationId, OperationIdRegistry, OperationScope, ThreadOperationRegistry,
};
pub use stream::{
    process_stream, same_target, stderr, stdout, Channel, MemoryTarget, RedirectableStream,
    SharedTarget, StreamAccessor, StreamTarget, StreamWriter, WriterTarget,
};
pub use system::{CaptureGuard, CaptureSnapshot, LoggingSourceSystem, PrintStreamLoggingSystem};

/// Writes to the process-wide stdout stream, like `print!`.
#[macro_export]
macro_rules! out {
    ($($arg:tt)*) => {
        ::std::io::Write::write_fmt(&mut $crate::stdout(), ::std::format_args!($($arg)*))
    };
}

/// Writes a line to the process-wide stdout stream, like `println!`.
#[macro_export]
macro_rules! outln {
    () => {
        $crate::out!("\n")
    };
    ($($arg:tt)*) => {
        $crate::out!("{}\n", ::std::format_args!($($arg)*))
    };
}

/// Writes to the process-wide stderr stream, like `eprint!`.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        ::std::io::Write::write_fmt(&mut $crate::stderr(), ::std::format_args!($($arg)*))
    };
}

/// Writes a line to the process-wide stderr stream, like `eprintln!`.
#[macro_export]
macro_rules! errln {
    () => {
        $crate::err!("\n")
    };
    ($($arg:tt)*) => {
        $crate::err!("{}\n", ::std::format_args!($($arg)*))
    };
}
