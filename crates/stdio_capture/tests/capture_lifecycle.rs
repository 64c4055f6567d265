use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use stdio_capture::{
    same_target, CaptureConfig, CollectingListener, FixedClock, LogLevel, LoggingSourceSystem,
    MemoryTarget, OperationId, OutputEvent, PrintStreamLoggingSystem, RedirectableStream,
    SharedTarget, StreamAccessor, ThreadOperationRegistry, Timestamp,
};

/// Stream accessor that counts how often the target is replaced.
struct CountingStream {
    inner: RedirectableStream,
    sets: AtomicUsize,
}

impl CountingStream {
    fn new(initial: SharedTarget) -> Self {
        Self {
            inner: RedirectableStream::new(initial),
            sets: AtomicUsize::new(0),
        }
    }

    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn write(&self, text: &str) {
        self.inner.write_text(text.as_bytes()).unwrap();
    }

    fn flush(&self) {
        self.inner.flush().unwrap();
    }
}

impl StreamAccessor for CountingStream {
    fn get(&self) -> SharedTarget {
        self.inner.get()
    }

    fn set(&self, target: SharedTarget) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(target);
    }
}

struct Fixture {
    system: PrintStreamLoggingSystem<Arc<CountingStream>>,
    stream: Arc<CountingStream>,
    events: Arc<CollectingListener>,
    original: Arc<MemoryTarget>,
    original_target: SharedTarget,
}

fn fixture(level: LogLevel) -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    let original = Arc::new(MemoryTarget::new());
    let original_target: SharedTarget = original.clone();
    let stream = Arc::new(CountingStream::new(original_target.clone()));
    let events = Arc::new(CollectingListener::new());
    let system = PrintStreamLoggingSystem::new(
        stream.clone(),
        events.clone(),
        CaptureConfig::stdout().with_level(level),
    )
    .unwrap()
    .with_time_provider(FixedClock(Timestamp::from_millis(7)));
    Fixture {
        system,
        stream,
        events,
        original,
        original_target,
    }
}

#[test]
fn captured_line_becomes_event_and_restore_returns_original_target() {
    let f = fixture(LogLevel::Info);
    let before = f.system.start_capture();
    assert!(!before.enabled());

    f.stream.write("hello");
    f.stream.write("\n");

    let events = f.events.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].new_level(), Some(LogLevel::Info));
    let line = events[1].as_styled_text().unwrap();
    assert_eq!(line.category, "system.out");
    assert_eq!(line.text, "hello");
    assert_eq!(line.timestamp, Timestamp::from_millis(7));

    f.system.restore(before);
    assert!(same_target(&f.stream.get(), &f.original_target));

    f.stream.write("x\n");
    assert_eq!(f.events.lines(), vec!["hello".to_string()]);
    assert_eq!(f.original.contents(), "x\n");
}

#[test]
fn one_event_per_terminator() {
    let f = fixture(LogLevel::Lifecycle);
    f.system.start_capture();
    f.stream.write("a\nb");
    f.stream.write("c\n\nd\n");

    assert_eq!(
        f.events.lines(),
        vec!["a".to_string(), "bc".to_string(), String::new(), "d".to_string()]
    );
}

#[test]
fn flush_emits_buffered_content_only_when_present() {
    let f = fixture(LogLevel::Lifecycle);
    f.system.start_capture();

    f.stream.flush();
    assert!(f.events.lines().is_empty());

    f.stream.write("pending");
    f.stream.flush();
    f.stream.flush();
    assert_eq!(f.events.lines(), vec!["pending".to_string()]);
}

#[test]
fn repeated_start_capture_installs_once() {
    let f = fixture(LogLevel::Lifecycle);
    let first = f.system.start_capture();
    let second = f.system.start_capture();

    assert!(!first.enabled());
    assert!(second.enabled());
    assert_eq!(f.stream.sets(), 1);
    assert_eq!(f.events.level_changes(), vec![LogLevel::Lifecycle]);
}

#[test]
fn set_level_emits_only_on_change_while_installed() {
    let f = fixture(LogLevel::Info);
    f.system.start_capture();
    f.events.take();

    let unchanged = f.system.set_level(LogLevel::Info);
    assert_eq!(unchanged.level(), LogLevel::Info);
    assert!(f.events.events().is_empty());

    let previous = f.system.set_level(LogLevel::Warn);
    assert_eq!(previous.level(), LogLevel::Info);
    assert_eq!(f.events.level_changes(), vec![LogLevel::Warn]);
    assert_eq!(f.system.level(), LogLevel::Warn);
}

#[test]
fn set_level_flushes_partial_line_before_announcing() {
    let f = fixture(LogLevel::Info);
    f.system.start_capture();
    f.events.take();

    f.stream.write("half");
    f.system.set_level(LogLevel::Debug);

    let events = f.events.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].as_styled_text().unwrap().text, "half");
    assert_eq!(events[1].new_level(), Some(LogLevel::Debug));
}

#[test]
fn snapshot_then_restore_converges_state() {
    let f = fixture(LogLevel::Info);
    for enable in [false, true] {
        if enable {
            f.system.start_capture();
        }
        let snapshot = f.system.snapshot();
        f.system.restore(snapshot);
        assert_eq!(f.system.snapshot(), snapshot);
        assert_eq!(f.system.is_capturing(), enable);
    }
    assert!(same_target(&f.stream.get(), &f.system.capture_target()));
}

#[test]
fn nested_scopes_unwind_in_order() {
    let f = fixture(LogLevel::Lifecycle);

    let outer = f.system.start_capture();
    let quieter = f.system.set_level(LogLevel::Quiet);
    let inner = f.system.start_capture();
    assert!(inner.enabled());
    assert_eq!(inner.level(), LogLevel::Quiet);

    f.system.restore(quieter);
    assert!(f.system.is_capturing());
    assert_eq!(f.system.level(), LogLevel::Lifecycle);

    f.system.restore(outer);
    assert!(!f.system.is_capturing());
    assert!(same_target(&f.stream.get(), &f.original_target));
}

#[test]
fn original_target_survives_many_cycles() {
    let f = fixture(LogLevel::Lifecycle);
    let off = f.system.snapshot();
    for _ in 0..3 {
        f.system.start_capture();
        f.stream.write("captured\n");
        f.system.restore(off);
        f.stream.write("direct\n");
    }
    assert_eq!(f.original.contents(), "direct\ndirect\ndirect\n");
    assert_eq!(f.events.lines().len(), 3);
    assert!(same_target(&f.stream.get(), &f.original_target));
}

#[test]
fn restore_flushes_partial_line_into_events() {
    let f = fixture(LogLevel::Lifecycle);
    let off = f.system.start_capture();
    f.stream.write("unterminated");
    f.system.restore(off);

    assert_eq!(f.events.lines(), vec!["unterminated".to_string()]);
    assert_eq!(f.original.contents(), "");
}

#[test]
fn events_carry_operation_of_writing_thread() {
    let f = fixture(LogLevel::Lifecycle);
    f.system.start_capture();

    {
        let _scope = ThreadOperationRegistry::enter(OperationId::new(11));
        f.stream.write("in operation\n");
    }
    f.stream.write("no operation\n");

    let ids: Vec<Option<OperationId>> = f
        .events
        .events()
        .iter()
        .filter_map(OutputEvent::as_styled_text)
        .map(|event| event.operation_id)
        .collect();
    assert_eq!(ids, vec![Some(OperationId::new(11)), None]);
}

#[test]
fn concurrent_writers_never_interleave_lines() {
    let f = fixture(LogLevel::Lifecycle);
    f.system.start_capture();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let stream = f.stream.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for ch in name.chars() {
                    stream.write(&ch.to_string());
                    thread::yield_now();
                }
                stream.flush();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut lines = f.events.lines();
    lines.sort();
    assert_eq!(lines, vec!["left".to_string(), "right".to_string()]);
}
