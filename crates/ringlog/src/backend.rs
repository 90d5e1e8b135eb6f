//! The dedicated backend thread: drains every registered queue, merges
//! records into timestamp order, and dispatches them to sinks.

use crate::clock::RdtscClock;
use crate::config::{BackendConfig, ErrorNotifier};
use crate::error::BackendError;
use crate::logger::LoggerRegistry;
use crate::metadata::{EventKind, Level};
use crate::record::read_header;
use crate::sink::FormattedRecord;
use crate::thread_context::{ThreadContext, ThreadContextRegistry};
use crate::transit::{TransitBuffer, TransitEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

static BACKEND_ACTIVE: OnceLock<()> = OnceLock::new();

/// Handle to the running backend thread. Dropping it without calling
/// [`shutdown`](Self::shutdown) detaches the thread; it keeps running until
/// the process exits, which is safe but will not flush on drop.
pub struct Backend {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Backend {
    /// Spawns the backend thread. Fails if another `Backend` is already
    /// running in this process.
    ///
    /// `clock` is shared with every frontend thread: the
    /// backend does not keep a private calibration, since frontends read
    /// timestamps at the call site, before a record ever reaches this
    /// thread.
    pub fn start(
        config: BackendConfig,
        threads: Arc<ThreadContextRegistry>,
        loggers: Arc<LoggerRegistry>,
        clock: Arc<RdtscClock>,
        error_notifier: Arc<dyn ErrorNotifier>,
    ) -> Result<Self, BackendError> {
        BACKEND_ACTIVE.set(()).map_err(|_| BackendError::DuplicateInstance)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let thread_name = config.thread_name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                apply_cpu_affinity(config.cpu_affinity, &error_notifier);
                let mut worker = DrainLoop::new(config, threads, loggers, clock, error_notifier);
                worker.run(&worker_shutdown);
            })
            .expect("failed to spawn backend thread");

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signals the backend to stop and joins its thread. If
    /// `wait_for_queues_to_empty_before_exit` was set, the backend drains
    /// everything outstanding before returning.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

#[cfg(all(target_os = "linux", feature = "cpu-affinity"))]
fn apply_cpu_affinity(affinity: Option<usize>, notifier: &Arc<dyn ErrorNotifier>) {
    let Some(cpu) = affinity else { return };
    // SAFETY: `set` is a plain value type and `sched_setaffinity` only reads
    // it; pid 0 means "the calling thread".
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            notifier.notify(&format!("failed to pin backend thread to cpu {cpu}"));
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "cpu-affinity")))]
fn apply_cpu_affinity(affinity: Option<usize>, notifier: &Arc<dyn ErrorNotifier>) {
    if affinity.is_some() {
        notifier.notify("cpu affinity pinning requires the 'cpu-affinity' feature on linux");
    }
}

/// Assumed clock resolution for [`crate::invariants::debug_assert_timestamp_order`]:
/// the shared `RdtscClock` is monotonic to the nanosecond, so a dispatched
/// event is never allowed to precede the previous one at all.
const CUTOFF_RESOLUTION_NS: u64 = 0;

struct DrainLoop {
    config: BackendConfig,
    threads: Arc<ThreadContextRegistry>,
    loggers: Arc<LoggerRegistry>,
    clock: Arc<RdtscClock>,
    error_notifier: Arc<dyn ErrorNotifier>,
    cached_threads: Vec<Arc<ThreadContext>>,
    /// One staging buffer per live thread, keyed by `thread_id` and kept
    /// across drain cycles: a strict-ordering halt can leave a buffer
    /// holding records already pulled out of its raw queue, and those must
    /// survive to the next cycle rather than being dropped with a
    /// cycle-local `Vec`.
    buffers: std::collections::HashMap<u64, TransitBuffer>,
    /// Mirrors `buffers`' keys so `dispatch` can resolve a `ThreadContext`
    /// from an event's `thread_id` alone to call `note_dispatched`.
    context_by_id: std::collections::HashMap<u64, Arc<ThreadContext>>,
    /// Timestamp of the most recently dispatched event, for the
    /// strict-ordering sanity check.
    last_dispatched_ts: Option<u64>,
}

impl DrainLoop {
    fn new(
        config: BackendConfig,
        threads: Arc<ThreadContextRegistry>,
        loggers: Arc<LoggerRegistry>,
        clock: Arc<RdtscClock>,
        error_notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        Self {
            config,
            threads,
            loggers,
            clock,
            error_notifier,
            cached_threads: Vec::new(),
            buffers: std::collections::HashMap::new(),
            context_by_id: std::collections::HashMap::new(),
            last_dispatched_ts: None,
        }
    }

    fn run(&mut self, shutdown: &AtomicBool) {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let did_work = self.drain_once();
            let should_exit = shutdown.load(Ordering::Acquire)
                && (!self.config.wait_for_queues_to_empty_before_exit || !did_work);
            if should_exit {
                break;
            }
            if did_work {
                backoff.reset();
            } else if self.config.enable_yield_when_idle {
                backoff.snooze();
            } else {
                std::thread::sleep(self.config.sleep_duration);
            }
        }
    }

    /// One full drain cycle. Returns `true` if any record was dispatched or
    /// any queue still held unprocessed bytes.
    fn drain_once(&mut self) -> bool {
        // Step 1/2: refresh the cached thread list if the registry changed.
        // Hold a context back from eviction while this drain loop still has
        // undispatched records buffered for it, even though its raw queue is
        // already empty and the registry would otherwise consider it
        // reclaimable.
        if self.threads.take_dirty() || self.cached_threads.is_empty() {
            let buffers = &self.buffers;
            self.threads.reclaim_if(|id| buffers.get(&id).map_or(true, TransitBuffer::is_empty));
            self.cached_threads = self.threads.snapshot();
        }

        let live_ids: std::collections::HashSet<u64> =
            self.cached_threads.iter().map(|c| c.thread_id).collect();
        self.buffers.retain(|id, _| live_ids.contains(id));
        self.context_by_id.retain(|id, _| live_ids.contains(id));
        let initial_capacity = self.config.transit_event_buffer_initial_capacity;
        let soft_limit = self.config.transit_events_soft_limit;
        let hard_limit = self.config.transit_events_hard_limit;
        for context in &self.cached_threads {
            self.buffers
                .entry(context.thread_id)
                .or_insert_with(|| TransitBuffer::new(initial_capacity, soft_limit, hard_limit));
            self.context_by_id.entry(context.thread_id).or_insert_with(|| Arc::clone(context));
        }

        // Captured once per cycle: under strict ordering, any record whose
        // timestamp is at or before this instant is guaranteed to already be
        // sitting in its producer's queue (timestamps are assigned from this
        // same shared clock before a record is queued), so it is safe to
        // dispatch regardless of what any other thread's buffer currently
        // holds. Records stamped after it might still be in flight and must
        // wait for a later cycle.
        let now_cutoff = self.clock.now();

        let mut any_nonempty = false;
        for context in &self.cached_threads {
            let buffer = self.buffers.get_mut(&context.thread_id).expect("buffer populated above");
            let growth = context.take_growth_delta();
            if growth > 0 {
                self.error_notifier.notify(&format!(
                    "thread '{}' queue grew {growth} time(s) since last cycle",
                    context.thread_name
                ));
            }

            let dropped = context.take_dropped();
            if dropped > 0 {
                any_nonempty = true;
                buffer.push(TransitEvent {
                    timestamp: now_cutoff,
                    level: Level::Warn,
                    event: EventKind::Dropped { count: dropped },
                    thread_id: context.thread_id,
                    thread_name: context.thread_name.clone(),
                    logger: std::ptr::null(),
                    file: "",
                    line: 0,
                    function: "",
                    format: "",
                    args: Vec::new(),
                });
            }

            while !buffer.is_over_soft_limit() {
                let Some(record) = context.queue.peek() else { break };
                let header = read_header(record.bytes);
                if self.config.enable_strict_log_timestamp_order && header.timestamp > now_cutoff {
                    // Not yet eligible; leave it on the queue for a later cycle.
                    break;
                }
                any_nonempty = true;
                let metadata = unsafe { &*header.metadata };
                let payload = &record.bytes[crate::record::HEADER_LEN..];
                let args = (header.decode_fn)(payload);
                buffer.push(TransitEvent {
                    timestamp: header.timestamp,
                    level: metadata.level,
                    event: metadata.event,
                    thread_id: context.thread_id,
                    thread_name: context.thread_name.clone(),
                    logger: header.logger,
                    file: metadata.file,
                    line: metadata.line,
                    function: metadata.function,
                    format: metadata.format,
                    args,
                });
                context.queue.consume(record.stride);
            }
        }

        let dispatched = self.dispatch_in_order(now_cutoff);
        self.loggers.advance_epoch(!any_nonempty);
        dispatched || any_nonempty
    }

    /// Repeatedly dispatches the globally-oldest *eligible* buffered record,
    /// where eligible means "timestamped at or before `now_cutoff`" under
    /// strict ordering (every record, otherwise). A thread whose buffer is
    /// currently empty simply contributes no candidate; it no longer blocks
    /// dispatch for every other thread, since any record it might still
    /// produce will be stamped after `now_cutoff` and thus excluded from
    /// this cycle's eligibility set regardless. Ties break on the smaller
    /// `thread_id`.
    fn dispatch_in_order(&mut self, now_cutoff: u64) -> bool {
        let order: Vec<u64> = self.cached_threads.iter().map(|c| c.thread_id).collect();
        let mut dispatched_any = false;
        loop {
            let strict = self.config.enable_strict_log_timestamp_order;
            let Some(oldest_id) = order
                .iter()
                .filter_map(|id| {
                    self.buffers.get(id).and_then(TransitBuffer::front_timestamp).and_then(|ts| {
                        if !strict || ts <= now_cutoff {
                            Some((ts, *id))
                        } else {
                            None
                        }
                    })
                })
                .min()
                .map(|(_, id)| id)
            else {
                break;
            };
            let event = self
                .buffers
                .get_mut(&oldest_id)
                .and_then(TransitBuffer::pop_front)
                .expect("front_timestamp implies pop_front succeeds");
            if let Some(prev_ts) = self.last_dispatched_ts {
                crate::invariants::debug_assert_timestamp_order!(prev_ts, event.timestamp, CUTOFF_RESOLUTION_NS);
            }
            self.last_dispatched_ts = Some(event.timestamp);
            // The synthetic `Dropped` notice never went through `emit`, so it
            // must not count toward this thread's dispatched total or the
            // attempted/dispatched/dropped reconciliation would overcount.
            if !matches!(event.event, EventKind::Dropped { .. }) {
                if let Some(context) = self.context_by_id.get(&oldest_id) {
                    context.note_dispatched();
                }
            }
            self.dispatch(event);
            dispatched_any = true;
        }
        dispatched_any
    }

    /// Dispatches one transit event according to its `EventKind`.
    fn dispatch(&self, event: TransitEvent) {
        if let EventKind::Dropped { count } = event.event {
            self.dispatch_dropped_warning(&event, count);
            return;
        }
        if event.logger.is_null() {
            return;
        }
        // SAFETY: resolved in the same drain cycle the record was read out
        // of its queue (see `TransitEvent::logger`'s doc comment) — the
        // `Logger` allocation is guaranteed to still be live.
        let logger = unsafe { &*event.logger };
        if !logger.is_valid() {
            return;
        }

        match event.event {
            EventKind::Log if event.level == Level::Backtrace => {
                logger.with_backtrace(|store| {
                    if let Some(store) = store {
                        store.push(event);
                    }
                });
            }
            EventKind::Log => {
                if event.level >= logger.backtrace_trigger() {
                    let pending = logger.with_backtrace(|store| store.map(crate::backtrace::BacktraceStore::drain));
                    for pending_event in pending.into_iter().flatten() {
                        self.dispatch_formatted(logger, &pending_event);
                    }
                }
                self.dispatch_formatted(logger, &event);
            }
            EventKind::InitBacktrace { capacity, trigger_level } => {
                logger.configure_backtrace(capacity, trigger_level);
            }
            EventKind::FlushBacktrace => {
                let pending = logger.with_backtrace(|store| store.map(crate::backtrace::BacktraceStore::drain));
                for pending_event in pending.into_iter().flatten() {
                    self.dispatch_formatted(logger, &pending_event);
                }
            }
            EventKind::Flush => {
                for sink in logger.sinks() {
                    sink.flush();
                }
                if let Some(crate::record::ArgValue::U64(token)) = event.args.first() {
                    crate::frontend::resolve_flush_waiter(*token);
                }
            }
        }
    }

    /// A producer's queue dropped records; this has no single owning
    /// logger, so the synthetic record fans out to every currently valid logger's
    /// sinks rather than picking one.
    fn dispatch_dropped_warning(&self, event: &TransitEvent, count: u64) {
        use std::fmt::Write as _;
        let mut line = String::new();
        let _ = write!(line, "dropped {count} record(s) on thread '{}' (queue full)", event.thread_name);
        let formatted = line.into_bytes();
        let record = FormattedRecord {
            bytes: &formatted,
            level: Level::Warn,
            logger_name: "*",
        };
        for logger in self.loggers.snapshot() {
            if !logger.is_valid() {
                continue;
            }
            for sink in logger.sinks() {
                if sink.accept(Level::Warn) {
                    sink.write(&record);
                }
            }
        }
    }

    fn dispatch_formatted(&self, logger: &crate::logger::Logger, event: &TransitEvent) {
        let mut formatted = Vec::new();
        logger.formatter().format(
            &crate::metadata::MacroMetadata::new(event.file, event.line, event.function, event.format, event.level),
            &event.args,
            event.timestamp,
            event.thread_id,
            &event.thread_name,
            logger.name(),
            &mut formatted,
        );
        let record = FormattedRecord {
            bytes: &formatted,
            level: event.level,
            logger_name: logger.name(),
        };
        for sink in logger.sinks() {
            if sink.accept(event.level) {
                sink.write(&record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StderrNotifier;
    use crate::logger::ClockSource;
    use crate::metadata::MacroMetadata;
    use crate::queue::QueuePolicy;
    use crate::record::ArgTuple;
    use crate::sink::{PlainFormatter, RecordingSink};
    use std::time::Duration;

    static META: MacroMetadata = MacroMetadata::new("t.rs", 1, "f", "n={}", Level::Info);

    #[test]
    fn drain_once_dispatches_queued_records() {
        let threads = Arc::new(ThreadContextRegistry::new());
        let loggers = Arc::new(LoggerRegistry::new());
        let sink = Arc::new(RecordingSink::new());
        let logger = loggers.create_or_get(
            "app",
            Level::Trace,
            ClockSource::System,
            None,
            vec![sink.clone() as Arc<dyn crate::sink::Sink>],
            Arc::new(PlainFormatter),
        );

        let context = threads.register("producer".into(), QueuePolicy::BoundedDropping, 256, None);
        crate::frontend::emit(&context, &logger, &META, (42_i32,), || 0);

        let mut loop_ = DrainLoop::new(
            BackendConfig::default(),
            Arc::clone(&threads),
            Arc::clone(&loggers),
            Arc::new(RdtscClock::new(Duration::from_millis(500), Arc::new(StderrNotifier))),
            Arc::new(StderrNotifier),
        );
        // strict ordering with a single producer never blocks on "others empty"
        let mut cfg = BackendConfig::default();
        cfg.enable_strict_log_timestamp_order = false;
        loop_.config = cfg;
        let did_work = loop_.drain_once();
        assert!(did_work);
        assert_eq!(sink.snapshot().len(), 1);
    }
}
