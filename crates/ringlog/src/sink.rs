//! External trait contracts: `Sink`, `Formatter`, `UserClock`.
//!
//! These are the three points where a caller plugs application-specific
//! behavior into the engine. The engine ships reference implementations
//! sufficient for tests and simple programs; a production caller is
//! expected to supply its own.

use crate::metadata::{Level, MacroMetadata};
use crate::record::ArgValue;
use std::sync::Mutex;

/// A fully formatted record, ready to hand to a sink.
pub struct FormattedRecord<'a> {
    pub bytes: &'a [u8],
    pub level: Level,
    pub logger_name: &'a str,
}

/// Where the backend writes formatted records.
///
/// Called only from the backend thread, so implementations do not need to
/// be `Sync` in the sense of tolerating concurrent calls to `write` — they
/// do need `Send + Sync` at the type level because a `Logger` (itself
/// `Send + Sync`) holds an `Arc<dyn Sink>`.
pub trait Sink: Send + Sync {
    fn write(&self, record: &FormattedRecord<'_>);

    /// Flushes any internal buffering. Called when a `Flush` event reaches
    /// this sink's logger.
    fn flush(&self) {}

    /// Per-sink severity filter, checked before every `write`. The default
    /// accepts everything; a sink that only wants its own subset of a
    /// logger's traffic (e.g. an error-only alerting sink sharing a logger
    /// with a catch-all file sink) overrides this instead of filtering
    /// inside `write`.
    fn accept(&self, _level: Level) -> bool {
        true
    }
}

/// Turns a decoded record into bytes for a [`Sink`].
pub trait Formatter: Send + Sync {
    fn format(
        &self,
        metadata: &MacroMetadata,
        args: &[ArgValue],
        timestamp: u64,
        thread_id: u64,
        thread_name: &str,
        logger_name: &str,
        out: &mut Vec<u8>,
    );
}

/// A caller-supplied time source for loggers configured with
/// `ClockSource::User`.
pub trait UserClock: Send + Sync {
    /// Nanoseconds since the Unix epoch, or any caller-defined monotonic
    /// unit consistent across a logger's lifetime.
    fn now(&self) -> u64;
}

/// Discards everything. Useful for benchmarking the engine without I/O
/// cost and as the default when no sink is configured.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn write(&self, _record: &FormattedRecord<'_>) {}
}

/// Writes formatted bytes to stdout, one record per line.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn write(&self, record: &FormattedRecord<'_>) {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(record.bytes);
        let _ = stdout.write_all(b"\n");
    }

    fn flush(&self) {
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// Collects formatted records in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.records.lock().expect("recording sink lock poisoned").clone()
    }
}

impl Sink for RecordingSink {
    fn write(&self, record: &FormattedRecord<'_>) {
        self.records
            .lock()
            .expect("recording sink lock poisoned")
            .push(record.bytes.to_vec());
    }
}

/// `"{timestamp} {level} {thread_name}/{thread_id} {logger_name}: {args...}"`.
///
/// Does not honor `{}`-style placeholders in `format`; it simply joins the
/// decoded arguments space-separated after the format string, which is
/// enough to exercise the pipeline without pulling in a templating crate
/// the core does not otherwise need.
#[derive(Debug, Default)]
pub struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn format(
        &self,
        metadata: &MacroMetadata,
        args: &[ArgValue],
        timestamp: u64,
        thread_id: u64,
        thread_name: &str,
        logger_name: &str,
        out: &mut Vec<u8>,
    ) {
        use std::fmt::Write as _;
        let mut line = String::with_capacity(64);
        let _ = write!(
            line,
            "{timestamp} {} {thread_name}/{thread_id} {logger_name}: {}",
            metadata.level.as_str(),
            metadata.format,
        );
        for arg in args {
            let _ = write!(line, " {arg}");
        }
        out.extend_from_slice(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_write_order() {
        let sink = RecordingSink::new();
        sink.write(&FormattedRecord {
            bytes: b"one",
            level: Level::Info,
            logger_name: "app",
        });
        sink.write(&FormattedRecord {
            bytes: b"two",
            level: Level::Info,
            logger_name: "app",
        });
        assert_eq!(sink.snapshot(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn plain_formatter_includes_args() {
        let metadata = MacroMetadata::new("f.rs", 1, "f", "value={}", Level::Info);
        let mut out = Vec::new();
        PlainFormatter.format(&metadata, &[ArgValue::I64(7)], 42, 1, "main", "app", &mut out);
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("value={}"));
        assert!(rendered.ends_with(" 7"));
    }
}
