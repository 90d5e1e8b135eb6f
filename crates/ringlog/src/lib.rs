//! A lock-free, per-thread structured logging engine: every producer thread
//! writes formatted log records into its own single-producer/single-consumer
//! byte ring, and one dedicated backend thread drains, decodes, orders, and
//! dispatches them to sinks.
//!
//! The hot path (`rlog!`) never allocates a string, never takes a lock, and
//! never blocks under the default queue policy: it encodes the call site's
//! arguments directly into the calling thread's ring and returns. All
//! formatting, ordering, and I/O happens off the caller's thread.

mod backend;
mod backoff;
mod backtrace;
mod clock;
mod config;
mod error;
pub mod frontend;
mod invariants;
mod logger;
mod macros;
mod metadata;
mod queue;
mod record;
mod sink;
mod thread_context;
mod transit;

pub use backend::Backend;
pub use clock::RdtscClock;
pub use config::{BackendConfig, ErrorNotifier, StderrNotifier};
pub use error::{BackendError, ConfigError, RegistryError};
pub use frontend::{request_flush, request_init_backtrace, EmitOutcome};
pub use logger::{ClockSource, Logger, LoggerRegistry};
pub use metadata::{EventKind, Level, MacroMetadata};
pub use queue::QueuePolicy;
pub use record::ArgValue;
pub use sink::{FormattedRecord, Formatter, NullSink, PlainFormatter, RecordingSink, Sink, StdoutSink, UserClock};
pub use thread_context::{ThreadContext, ThreadContextRegistry};

use std::sync::Arc;

/// Per-thread settings used the first time a thread emits through a given
/// [`Engine`].
#[derive(Debug, Clone)]
pub struct ThreadQueueConfig {
    pub policy: QueuePolicy,
    pub initial_capacity: usize,
    pub growth_ceiling: Option<usize>,
}

impl Default for ThreadQueueConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicy::BoundedDropping,
            initial_capacity: 128 * 1024,
            growth_ceiling: None,
        }
    }
}

/// Marks its `ThreadContext` shut down when the owning thread-local is
/// torn down, so the registry can reclaim finished producer threads instead
/// of carrying their (permanently empty) contexts forever.
struct OwnContextGuard(Arc<ThreadContext>);

impl Drop for OwnContextGuard {
    fn drop(&mut self) {
        self.0.mark_shutdown();
    }
}

thread_local! {
    static OWN_CONTEXT: std::cell::RefCell<Option<OwnContextGuard>> = const { std::cell::RefCell::new(None) };
}

/// Top-level handle tying together the shared clock, the logger and thread
/// registries, and the running backend thread.
///
/// This is a convenience wrapper, not a required entry point: each piece it
/// holds (`LoggerRegistry`, `ThreadContextRegistry`, `RdtscClock`, `Backend`)
/// is independently constructible for callers who want finer control over
/// wiring.
pub struct Engine {
    threads: Arc<ThreadContextRegistry>,
    loggers: Arc<LoggerRegistry>,
    clock: Arc<RdtscClock>,
    thread_queue_config: ThreadQueueConfig,
    backend: Option<Backend>,
}

impl Engine {
    /// Calibrates a shared RDTSC clock and spawns the backend thread.
    pub fn start(config: BackendConfig) -> Result<Self, BackendError> {
        Self::start_with(config, ThreadQueueConfig::default(), Arc::new(StderrNotifier))
    }

    /// Like [`start`](Self::start), with explicit per-thread queue defaults
    /// and error notifier.
    pub fn start_with(
        config: BackendConfig,
        thread_queue_config: ThreadQueueConfig,
        error_notifier: Arc<dyn ErrorNotifier>,
    ) -> Result<Self, BackendError> {
        let threads = Arc::new(ThreadContextRegistry::new());
        let loggers = Arc::new(LoggerRegistry::new());
        let clock = Arc::new(RdtscClock::new(config.rdtsc_resync_interval, Arc::clone(&error_notifier)));
        let backend = Backend::start(
            config,
            Arc::clone(&threads),
            Arc::clone(&loggers),
            Arc::clone(&clock),
            error_notifier,
        )?;
        Ok(Self {
            threads,
            loggers,
            clock,
            thread_queue_config,
            backend: Some(backend),
        })
    }

    /// Returns the named logger, creating it with the given defaults if it
    /// does not already exist.
    #[allow(clippy::too_many_arguments)]
    pub fn logger(
        &self,
        name: &str,
        threshold: Level,
        clock_source: ClockSource,
        user_clock: Option<Arc<dyn UserClock>>,
        sinks: Vec<Arc<dyn Sink>>,
        formatter: Arc<dyn Formatter>,
    ) -> Arc<Logger> {
        self.loggers.create_or_get(name, threshold, clock_source, user_clock, sinks, formatter)
    }

    pub fn remove_logger(&self, name: &str) {
        self.loggers.remove(name);
    }

    /// Returns the calling thread's `ThreadContext`, registering one on
    /// first use.
    pub fn thread_context(&self) -> Arc<ThreadContext> {
        OWN_CONTEXT.with(|cell| {
            let mut slot = cell.borrow_mut();
            if let Some(guard) = slot.as_ref() {
                return Arc::clone(&guard.0);
            }
            let context = self.threads.register(
                frontend::current_thread_name(),
                self.thread_queue_config.policy,
                self.thread_queue_config.initial_capacity,
                self.thread_queue_config.growth_ceiling,
            );
            *slot = Some(OwnContextGuard(Arc::clone(&context)));
            context
        })
    }

    /// A closure suitable as `rlog!`'s `tsc_reader` argument: reads the
    /// engine's shared, already-calibrated clock.
    pub fn tsc_reader(&self) -> impl Fn() -> u64 + '_ {
        move || self.clock.now()
    }

    pub fn clock(&self) -> &Arc<RdtscClock> {
        &self.clock
    }

    /// Signals the backend to stop and joins its thread.
    pub fn shutdown(mut self) {
        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
    }
}
