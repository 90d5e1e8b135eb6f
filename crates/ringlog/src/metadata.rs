//! Compile-time call-site metadata.

/// Severity level of a log record.
///
/// Ordered so that `Level::Error > Level::Info`, matching the convention
/// that higher-severity records compare greater. A logger's atomic
/// threshold is compared against this with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    /// Deferred-unless-triggered severity consumed by a logger's
    /// [`BacktraceStore`](crate::backtrace::BacktraceStore).
    Backtrace = 3,
    Warn = 4,
    Error = 5,
    Critical = 6,
}

impl Level {
    /// Short, fixed-width label used by reference formatters.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Backtrace => "BACKTRACE",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

/// The kind of event a queue record represents.
///
/// `Log` carries a formatted message; the other three are control events
/// consumed by the backend without ever reaching a sink directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A normal log statement.
    Log,
    /// Requests the backend (re)configure the logger's `BacktraceStore`.
    InitBacktrace { capacity: usize, trigger_level: Level },
    /// Requests the backend drain the logger's `BacktraceStore` on demand.
    FlushBacktrace,
    /// Requests the backend flush all sinks and release the caller.
    Flush,
    /// Backend-synthesized: a producer's queue dropped `count` records
    /// since the last drain cycle. Never produced by a
    /// call site; `TransitEvent::logger` is null for this kind.
    Dropped { count: u64 },
}

/// Immutable, one-per-call-site metadata.
///
/// Intended to be constructed once (conceptually "statically allocated")
/// and referenced by pointer from every queue record it produces; it is
/// never copied into the queue itself.
#[derive(Debug)]
pub struct MacroMetadata {
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
    pub format: &'static str,
    pub tag: Option<&'static str>,
    pub level: Level,
    pub event: EventKind,
    pub has_named_args: bool,
}

impl MacroMetadata {
    /// Creates call-site metadata for a plain log statement.
    pub const fn new(
        file: &'static str,
        line: u32,
        function: &'static str,
        format: &'static str,
        level: Level,
    ) -> Self {
        Self {
            file,
            line,
            function,
            format,
            tag: None,
            level,
            event: EventKind::Log,
            has_named_args: false,
        }
    }

    /// Builder-style tag attachment, mirroring call sites that attach a
    /// static tag pointer.
    pub const fn with_tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    pub const fn with_named_args(mut self) -> Self {
        self.has_named_args = true;
        self
    }

    /// Overrides the default `EventKind::Log`, for call sites that build a
    /// control event (`rlog_flush!` and friends).
    pub const fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }
}
