//! Call-site macro: builds a [`MacroMetadata`](crate::metadata::MacroMetadata)
//! once per call site and routes to [`crate::frontend::emit`].
//!
//! Rust has no stable `function!()` built-in, so the `function` field of
//! `MacroMetadata` is populated with `module_path!()` instead of a true
//! function name — the closest compile-time-constant identifier stable Rust
//! exposes at a call site.

/// Logs one record against a logger, capturing call-site metadata.
///
/// ```ignore
/// rlog!(context, logger, || engine.clock().now(), Level::Info, "connected to {}", addr);
/// ```
#[macro_export]
macro_rules! rlog {
    ($context:expr, $logger:expr, $tsc_reader:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        static METADATA: $crate::MacroMetadata =
            $crate::MacroMetadata::new(file!(), line!(), module_path!(), $fmt, $level);
        $crate::frontend::emit($context, $logger, &METADATA, ($($arg,)*), $tsc_reader)
    }};
}

/// Requests the backend flush `logger`'s sinks and block the caller until
/// it has happened.
#[macro_export]
macro_rules! rlog_flush {
    ($context:expr, $logger:expr, $tsc_reader:expr) => {{
        static METADATA: $crate::MacroMetadata = $crate::MacroMetadata::new(
            file!(),
            line!(),
            module_path!(),
            "flush",
            $crate::Level::Critical,
        )
        .with_event($crate::EventKind::Flush);
        let rx = $crate::frontend::request_flush($context, $logger, &METADATA, $tsc_reader);
        let _ = rx.recv();
    }};
}

/// Requests the backend (re)configure `logger`'s backtrace store.
#[macro_export]
macro_rules! rlog_init_backtrace {
    ($context:expr, $logger:expr, $tsc_reader:expr, $capacity:expr, $trigger:expr) => {{
        $crate::frontend::request_init_backtrace($context, $logger, $capacity, $trigger, $tsc_reader)
    }};
}

/// Requests the backend drain `logger`'s backtrace store now, regardless of
/// whether a triggering record has been seen.
#[macro_export]
macro_rules! rlog_flush_backtrace {
    ($context:expr, $logger:expr, $tsc_reader:expr) => {{
        static METADATA: $crate::MacroMetadata = $crate::MacroMetadata::new(
            file!(),
            line!(),
            module_path!(),
            "flush_backtrace",
            $crate::Level::Critical,
        )
        .with_event($crate::EventKind::FlushBacktrace);
        $crate::frontend::emit($context, $logger, &METADATA, (), $tsc_reader)
    }};
}

#[cfg(test)]
mod tests {
    use crate::logger::{ClockSource, LoggerRegistry};
    use crate::metadata::Level;
    use crate::queue::QueuePolicy;
    use crate::sink::{PlainFormatter, RecordingSink};
    use crate::thread_context::ThreadContextRegistry;
    use std::sync::Arc;

    #[test]
    fn macro_expands_and_queues_a_record() {
        let threads = ThreadContextRegistry::new();
        let context = threads.register("t".into(), QueuePolicy::BoundedDropping, 256, None);
        let loggers = LoggerRegistry::new();
        let sink = Arc::new(RecordingSink::new());
        let logger = loggers.create_or_get(
            "app",
            Level::Trace,
            ClockSource::System,
            None,
            vec![sink as Arc<dyn crate::sink::Sink>],
            Arc::new(PlainFormatter),
        );
        let outcome = crate::rlog!(&context, &logger, || 0, Level::Info, "connected to {}", 8080_i32);
        assert_eq!(outcome, crate::frontend::EmitOutcome::Queued);
    }
}
