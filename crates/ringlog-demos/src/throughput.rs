use ringlog::{BackendConfig, ClockSource, Engine, Level, PlainFormatter, RecordingSink};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const MSGS_PER_PRODUCER: u64 = 200_000;

fn run(num_producers: usize) {
    println!("\n{num_producers} producer(s) x 1 backend");
    println!("{}", "=".repeat(40));

    let engine = Arc::new(Engine::start(BackendConfig::default()).expect("failed to start backend"));
    let sink = Arc::new(RecordingSink::new());
    let logger = engine.logger(
        "bench",
        Level::Info,
        ClockSource::Tsc,
        None,
        vec![sink.clone() as Arc<dyn ringlog::Sink>],
        Arc::new(PlainFormatter),
    );

    let start = Instant::now();
    let handles: Vec<_> = (0..num_producers)
        .map(|id| {
            let engine = Arc::clone(&engine);
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                let context = engine.thread_context();
                let tsc_reader = engine.tsc_reader();
                for i in 0..MSGS_PER_PRODUCER {
                    ringlog::rlog!(&context, &logger, &tsc_reader, Level::Info, "producer {} item {}", id, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let context = engine.thread_context();
    let tsc_reader = engine.tsc_reader();
    ringlog::rlog_flush!(&context, &logger, &tsc_reader);
    let elapsed = start.elapsed();

    let total = num_producers as u64 * MSGS_PER_PRODUCER;
    println!("  total records:  {total}");
    println!("  duration:       {elapsed:.2?}");
    println!(
        "  throughput:     {:.2} M records/sec",
        total as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
    println!("  sink received:  {}", sink.snapshot().len());

    let engine = Arc::try_unwrap(engine).unwrap_or_else(|_| panic!("engine still shared"));
    engine.shutdown();
}

fn main() {
    for num_producers in [1, 2, 4] {
        run(num_producers);
    }
}
