use ringlog::{BackendConfig, ClockSource, Engine, Level, PlainFormatter, StdoutSink};
use std::sync::Arc;

fn main() {
    let engine = Engine::start(BackendConfig::default()).expect("failed to start backend");
    let logger = engine.logger(
        "app",
        Level::Info,
        ClockSource::System,
        None,
        vec![Arc::new(StdoutSink)],
        Arc::new(PlainFormatter),
    );

    let context = engine.thread_context();
    let tsc_reader = engine.tsc_reader();

    for i in 0..10 {
        ringlog::rlog!(&context, &logger, &tsc_reader, Level::Info, "tick {}", i);
    }
    ringlog::rlog_flush!(&context, &logger, &tsc_reader);

    engine.shutdown();
}
