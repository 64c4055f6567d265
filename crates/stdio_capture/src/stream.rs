use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// Byte sink a stream can point at.
pub trait StreamTarget: Send + Sync + 'static {
    fn write_text(&self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

pub type SharedTarget = Arc<dyn StreamTarget>;

/// Identity comparison; ignores vtable pointers.
pub fn same_target(a: &SharedTarget, b: &SharedTarget) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Read/replace access to the target behind one physical stream.
pub trait StreamAccessor: Send + Sync {
    fn get(&self) -> SharedTarget;
    fn set(&self, target: SharedTarget);
}

impl<T: StreamAccessor + ?Sized> StreamAccessor for &T {
    fn get(&self) -> SharedTarget {
        (**self).get()
    }

    fn set(&self, target: SharedTarget) {
        (**self).set(target)
    }
}

impl<T: StreamAccessor + ?Sized> StreamAccessor for Arc<T> {
    fn get(&self) -> SharedTarget {
        (**self).get()
    }

    fn set(&self, target: SharedTarget) {
        (**self).set(target)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl StreamTarget for Channel {
    fn write_text(&self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Channel::Stdout => io::stdout().lock().write_all(bytes),
            Channel::Stderr => io::stderr().lock().write_all(bytes),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Channel::Stdout => io::stdout().flush(),
            Channel::Stderr => io::stderr().flush(),
        }
    }
}

/// A stream whose target can be swapped while writers are active.
pub struct RedirectableStream {
    current: RwLock<SharedTarget>,
}

impl RedirectableStream {
    pub fn new(initial: SharedTarget) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn write_text(&self, bytes: &[u8]) -> io::Result<()> {
        self.get().write_text(bytes)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.get().flush()
    }

    pub fn writer(&self) -> StreamWriter<'_> {
        StreamWriter { stream: self }
    }
}

impl StreamAccessor for RedirectableStream {
    fn get(&self) -> SharedTarget {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, target: SharedTarget) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = target;
    }
}

impl std::fmt::Debug for RedirectableStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectableStream").finish_non_exhaustive()
    }
}

/// `io::Write` handle that resolves the stream's target on every call.
pub struct StreamWriter<'a> {
    stream: &'a RedirectableStream,
}

impl Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write_text(buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_text(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// The process-wide stream for `channel`, initially pointing at the real handle.
pub fn process_stream(channel: Channel) -> &'static RedirectableStream {
    static STDOUT: OnceLock<RedirectableStream> = OnceLock::new();
    static STDERR: OnceLock<RedirectableStream> = OnceLock::new();
    let cell = match channel {
        Channel::Stdout => &STDOUT,
        Channel::Stderr => &STDERR,
    };
    cell.get_or_init(|| RedirectableStream::new(Arc::new(channel)))
}

pub fn stdout() -> StreamWriter<'static> {
    process_stream(Channel::Stdout).writer()
}

pub fn stderr() -> StreamWriter<'static> {
    process_stream(Channel::Stderr).writer()
}

/// Adapts any `io::Write` into a target.
pub struct WriterTarget<W> {
    inner: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterTarget<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send + 'static> StreamTarget for WriterTarget<W> {
    fn write_text(&self, bytes: &[u8]) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

/// In-memory target, mostly for tests and for hosts that post-process output.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl StreamTarget for MemoryTarget {
    fn write_text(&self, bytes: &[u8]) -> io::Result<()> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
