//! End-to-end scenarios exercising the full frontend-queue-backend-sink
//! pipeline through the public `Engine` API.

use ringlog::{
    BackendConfig, ClockSource, Engine, Level, PlainFormatter, QueuePolicy, RecordingSink, Sink,
    StderrNotifier, ThreadQueueConfig,
};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

fn fast_backend_config() -> BackendConfig {
    BackendConfig {
        sleep_duration: Duration::from_micros(100),
        ..BackendConfig::default()
    }
}

fn text_of(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).expect("sink bytes are valid utf8")
}

#[test]
fn s1_single_thread_ordering() {
    let engine = Engine::start_with(
        fast_backend_config(),
        ThreadQueueConfig {
            policy: QueuePolicy::BoundedBlocking,
            initial_capacity: 64 * 1024,
            growth_ceiling: None,
        },
        Arc::new(StderrNotifier),
    )
    .expect("engine starts");

    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "app",
        Level::Info,
        ClockSource::System,
        None,
        vec![sink.clone() as Arc<dyn Sink>],
        Arc::new(PlainFormatter),
    );
    let context = engine.thread_context();

    for i in 0..5_i32 {
        ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Info, "i={}", i);
    }
    ringlog::rlog_flush!(&context, &logger, engine.tsc_reader());

    let records = sink.snapshot();
    assert_eq!(records.len(), 5);
    for (i, record) in records.iter().enumerate() {
        assert!(
            text_of(record).ends_with(&format!(" {i}")),
            "record {i} was {:?}",
            text_of(record)
        );
    }

    engine.shutdown();
}

#[test]
fn s2_multi_thread_strict_ordering() {
    let mut config = fast_backend_config();
    config.enable_strict_log_timestamp_order = true;

    let engine = Arc::new(
        Engine::start_with(
            config,
            ThreadQueueConfig {
                policy: QueuePolicy::BoundedBlocking,
                initial_capacity: 256 * 1024,
                growth_ceiling: None,
            },
            Arc::new(StderrNotifier),
        )
        .expect("engine starts"),
    );

    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "app",
        Level::Info,
        ClockSource::Tsc,
        None,
        vec![sink.clone() as Arc<dyn Sink>],
        Arc::new(PlainFormatter),
    );

    const PER_THREAD: u64 = 1000;
    let handles: Vec<_> = (0..4_u64)
        .map(|thread_idx| {
            let engine = Arc::clone(&engine);
            let logger = Arc::clone(&logger);
            std::thread::spawn(move || {
                let context = engine.thread_context();
                for seq in 0..PER_THREAD {
                    ringlog::rlog!(
                        &context,
                        &logger,
                        engine.tsc_reader(),
                        Level::Info,
                        "seq",
                        thread_idx,
                        seq
                    );
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let flush_context = engine.thread_context();
    ringlog::rlog_flush!(&flush_context, &logger, engine.tsc_reader());

    let records = sink.snapshot();
    assert_eq!(records.len(), 4000);

    let mut per_thread_seen = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    for record in &records {
        let text = text_of(record);
        let tail = text.rsplit(' ').take(2).collect::<Vec<_>>();
        // tail[1] is the thread index, tail[0] the sequence number.
        let thread_idx: usize = tail[1].parse().expect("thread index is numeric");
        let seq: u64 = tail[0].parse().expect("sequence is numeric");
        per_thread_seen[thread_idx].push(seq);
    }
    for seen in &per_thread_seen {
        assert_eq!(seen.len(), PER_THREAD as usize);
        assert_eq!(*seen, (0..PER_THREAD).collect::<Vec<_>>());
    }

    Arc::try_unwrap(engine)
        .unwrap_or_else(|_| panic!("engine still has outstanding references"))
        .shutdown();
}

#[test]
fn s3_drop_counting() {
    let engine = Engine::start_with(
        fast_backend_config(),
        ThreadQueueConfig {
            policy: QueuePolicy::BoundedDropping,
            initial_capacity: 4 * 1024,
            growth_ceiling: None,
        },
        Arc::new(StderrNotifier),
    )
    .expect("engine starts");

    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "app",
        Level::Info,
        ClockSource::System,
        None,
        vec![sink.clone() as Arc<dyn Sink>],
        Arc::new(PlainFormatter),
    );
    let context = engine.thread_context();

    const TOTAL: usize = 10_000;
    let mut queued = 0usize;
    for i in 0..TOTAL {
        let outcome = ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Info, "i={}", i as u64);
        if outcome == ringlog::EmitOutcome::Queued {
            queued += 1;
        }
    }
    assert!(queued < TOTAL, "a 4 KiB dropping queue under a 10,000-record burst should drop some");

    engine.shutdown();

    let records = sink.snapshot();
    let warnings: Vec<_> = records.iter().map(|r| text_of(r)).filter(|t| t.contains("dropped")).collect();
    assert!(!warnings.is_empty(), "expected at least one synthetic drop warning");

    let dispatched = records.len() - warnings.len();
    assert_eq!(dispatched, queued, "every queued record should have reached the sink");
}

#[test]
fn s4_backtrace_on_trigger() {
    let engine = Engine::start_with(
        fast_backend_config(),
        ThreadQueueConfig::default(),
        Arc::new(StderrNotifier),
    )
    .expect("engine starts");

    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "app",
        Level::Trace,
        ClockSource::System,
        None,
        vec![sink.clone() as Arc<dyn Sink>],
        Arc::new(PlainFormatter),
    );
    let context = engine.thread_context();

    ringlog::rlog_init_backtrace!(&context, &logger, engine.tsc_reader(), 2, Level::Error);
    ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Backtrace, "bt1");
    ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Backtrace, "bt2");
    ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Backtrace, "bt3");
    ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Info, "info");
    ringlog::rlog!(&context, &logger, engine.tsc_reader(), Level::Error, "boom");
    ringlog::rlog_flush!(&context, &logger, engine.tsc_reader());

    let records = sink.snapshot();
    let texts: Vec<String> = records.iter().map(|r| text_of(r)).collect();
    assert_eq!(texts.len(), 4, "bt1 should have been evicted: {texts:?}");
    assert!(texts[0].contains(": info"));
    assert!(texts[1].contains(": bt2"));
    assert!(texts[2].contains(": bt3"));
    assert!(texts[3].contains(": boom"));

    engine.shutdown();
}

#[test]
fn s5_clock_monotonicity_across_resync() {
    let mut config = BackendConfig::default();
    config.rdtsc_resync_interval = Duration::from_millis(20);
    let clock = ringlog::RdtscClock::new(config.rdtsc_resync_interval, Arc::new(StderrNotifier));

    let mut previous = 0u64;
    let deadline = std::time::Instant::now() + Duration::from_millis(300);
    while std::time::Instant::now() < deadline {
        let observed = clock.now();
        let actual = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        assert!(observed >= previous, "timestamps must never go backwards");
        let delta = actual.abs_diff(observed);
        assert!(
            delta < Duration::from_millis(50).as_nanos() as u64,
            "converted timestamp drifted {delta}ns from wall clock"
        );
        previous = observed;
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn s6_flush_barrier() {
    let engine = Arc::new(
        Engine::start_with(
            fast_backend_config(),
            ThreadQueueConfig {
                policy: QueuePolicy::BoundedBlocking,
                initial_capacity: 256 * 1024,
                growth_ceiling: None,
            },
            Arc::new(StderrNotifier),
        )
        .expect("engine starts"),
    );

    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "app",
        Level::Info,
        ClockSource::Tsc,
        None,
        vec![sink.clone() as Arc<dyn Sink>],
        Arc::new(PlainFormatter),
    );

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let b_engine = Arc::clone(&engine);
    let b_logger = Arc::clone(&logger);
    let b_stop = Arc::clone(&stop);
    let b_handle = std::thread::spawn(move || {
        let context = b_engine.thread_context();
        while !b_stop.load(std::sync::atomic::Ordering::Relaxed) {
            ringlog::rlog!(&context, &b_logger, b_engine.tsc_reader(), Level::Info, "B");
            std::thread::yield_now();
        }
    });

    let a_context = engine.thread_context();
    for _ in 0..1000 {
        ringlog::rlog!(&a_context, &logger, engine.tsc_reader(), Level::Info, "A");
    }

    static FLUSH_META: ringlog::MacroMetadata = ringlog::MacroMetadata::new(
        file!(),
        line!(),
        module_path!(),
        "flush",
        Level::Critical,
    )
    .with_event(ringlog::EventKind::Flush);
    let rx = ringlog::request_flush(&a_context, &logger, &FLUSH_META, engine.tsc_reader());
    match rx.recv_timeout(Duration::from_secs(10)) {
        Ok(()) => {}
        Err(RecvTimeoutError::Timeout) => panic!("flush did not complete within 10s"),
        Err(RecvTimeoutError::Disconnected) => panic!("flush waiter dropped without signaling"),
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    b_handle.join().unwrap();

    let records = sink.snapshot();
    let a_count = records.iter().filter(|r| text_of(r).ends_with(": A")).count();
    assert_eq!(a_count, 1000, "all of thread A's records must be dispatched before flush returns");

    Arc::try_unwrap(engine)
        .unwrap_or_else(|_| panic!("engine still has outstanding references"))
        .shutdown();
}
