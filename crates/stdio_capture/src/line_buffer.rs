use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use crate::listener::TextListener;
use crate::stream::StreamTarget;

type PendingMap = Mutex<HashMap<ThreadId, Vec<u8>>>;

thread_local! {
    static EXIT_HOOK: ThreadExitHook = ThreadExitHook::new();
}

/// Discards a thread's partial lines from every buffer it wrote to once the
/// thread exits.
struct ThreadExitHook {
    thread: ThreadId,
    buffers: RefCell<Vec<Weak<PendingMap>>>,
}

impl ThreadExitHook {
    fn new() -> Self {
        Self {
            thread: thread::current().id(),
            buffers: RefCell::new(Vec::new()),
        }
    }

    fn register(&self, pending: &Arc<PendingMap>) {
        let mut buffers = self.buffers.borrow_mut();
        buffers.retain(|weak| weak.strong_count() > 0);
        if !buffers
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(pending)))
        {
            buffers.push(Arc::downgrade(pending));
        }
    }
}

impl Drop for ThreadExitHook {
    fn drop(&mut self) {
        for pending in self.buffers.get_mut().drain(..) {
            if let Some(pending) = pending.upgrade() {
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&self.thread);
            }
        }
    }
}

struct PendingLine {
    bytes: Vec<u8>,
    terminated: bool,
}

/// Reassembles byte fragments into lines, keeping one partial line per thread.
///
/// Completed lines are handed to the sink with the terminator (`\n` or
/// `\r\n`) removed. The buffer lock is never held while the sink runs. A
/// thread that exits with a partial line takes it with it.
pub struct LinePerThreadBuffer<L: TextListener> {
    sink: L,
    pending: Arc<PendingMap>,
    max_line_bytes: Option<usize>,
}

impl<L: TextListener> LinePerThreadBuffer<L> {
    pub fn new(sink: L) -> Self {
        Self {
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            max_line_bytes: None,
        }
    }

    pub fn with_max_line_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_line_bytes = limit;
        self
    }

    pub fn sink(&self) -> &L {
        &self.sink
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let ready = self.split_lines(thread::current().id(), bytes);
        self.emit_all(ready)
    }

    /// Emits the calling thread's partial line, if any, then flushes the sink.
    pub fn flush_current(&self) -> io::Result<()> {
        let partial = self.lock().remove(&thread::current().id());
        if let Some(bytes) = partial {
            self.emit(PendingLine {
                bytes,
                terminated: false,
            })?;
        }
        self.sink.flush()
    }

    /// Emits every live thread's partial line. Intended for shutdown.
    pub fn flush_all(&self) -> io::Result<()> {
        let partials: Vec<Vec<u8>> = self.lock().drain().map(|(_, bytes)| bytes).collect();
        self.emit_all(partials.into_iter().map(|bytes| PendingLine {
            bytes,
            terminated: false,
        }))?;
        self.sink.flush()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ThreadId, Vec<u8>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn split_lines(&self, thread: ThreadId, bytes: &[u8]) -> Vec<PendingLine> {
        let mut pending = self.lock();
        if !pending.contains_key(&thread) {
            // Fails only while this thread's locals are being torn down.
            let _ = EXIT_HOOK.try_with(|hook| hook.register(&self.pending));
        }
        let buffer = pending.entry(thread).or_default();
        let mut ready = Vec::new();

        let mut rest = bytes;
        while let Some(idx) = rest.iter().position(|b| *b == b'\n') {
            buffer.extend_from_slice(&rest[..idx]);
            ready.push(PendingLine {
                bytes: std::mem::take(buffer),
                terminated: true,
            });
            rest = &rest[idx + 1..];
        }
        buffer.extend_from_slice(rest);

        if let Some(limit) = self.max_line_bytes {
            if buffer.len() > limit {
                let keep_from = incomplete_utf8_tail(buffer);
                if keep_from > 0 {
                    let tail = buffer.split_off(keep_from);
                    ready.push(PendingLine {
                        bytes: std::mem::replace(buffer, tail),
                        terminated: false,
                    });
                }
            }
        }

        if buffer.is_empty() {
            pending.remove(&thread);
        }
        ready
    }

    fn emit_all(&self, lines: impl IntoIterator<Item = PendingLine>) -> io::Result<()> {
        for line in lines {
            self.emit(line)?;
        }
        Ok(())
    }

    fn emit(&self, line: PendingLine) -> io::Result<()> {
        let mut bytes = line.bytes.as_slice();
        if line.terminated {
            bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        }
        let text = String::from_utf8_lossy(bytes);
        self.sink.on_output(&text, line.terminated)
    }

    #[cfg(test)]
    fn pending_threads(&self) -> usize {
        self.lock().len()
    }
}

/// Index where a trailing, still incomplete UTF-8 sequence starts, or
/// `bytes.len()` when the input does not end mid-character.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let start = len - back;
        let needed = match bytes[start] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { start } else { len };
    }
    len
}

impl<L: TextListener> StreamTarget for LinePerThreadBuffer<L> {
    fn write_text(&self, bytes: &[u8]) -> io::Result<()> {
        self.write_bytes(bytes)
    }

    fn flush(&self) -> io::Result<()> {
        self.flush_current()
    }
}
