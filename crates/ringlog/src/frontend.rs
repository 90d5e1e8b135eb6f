//! The hot path: turning a log call site into a queued record.

use crate::logger::{ClockSource, Logger};
use crate::metadata::{EventKind, Level, MacroMetadata};
use crate::record::{decode_dispatch, write_header, ArgTuple, DecodeFn};
use crate::thread_context::ThreadContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static THREAD_NAME: String = std::thread::current()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("thread-{:?}", std::thread::current().id()));
}

/// Reads a timestamp according to a logger's configured clock source. `tsc_reader` is supplied by the caller (typically the
/// engine's shared [`crate::clock::RdtscClock`]) so this function stays
/// decoupled from any particular clock instance.
pub fn read_timestamp(logger: &Logger, tsc_reader: impl FnOnce() -> u64) -> u64 {
    match logger.clock_source() {
        ClockSource::Tsc => tsc_reader(),
        ClockSource::System => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
        ClockSource::User => logger
            .user_clock()
            .map(|clock| clock.now())
            .unwrap_or(0),
    }
}

/// The result of attempting to emit a record.
#[derive(Debug, PartialEq, Eq)]
pub enum EmitOutcome {
    Queued,
    /// Below the logger's threshold; never reached the queue.
    Filtered,
    /// The logger has been removed from the registry.
    LoggerInvalid,
    /// The queue had no room and the policy is non-blocking, or it is
    /// blocking but the queue closed while waiting.
    Dropped,
}

/// Attempts to log one record.
///
/// `args` is the call site's argument tuple; its `ArgTuple` impl is
/// monomorphized once per distinct tuple shape and supplies the decoder
/// function pointer stored in the record header.
#[allow(clippy::too_many_arguments)]
pub fn emit<T: ArgTuple + 'static>(
    context: &ThreadContext,
    logger: &Arc<Logger>,
    metadata: &'static MacroMetadata,
    args: T,
    tsc_reader: impl FnOnce() -> u64,
) -> EmitOutcome {
    if !logger.is_valid() {
        return EmitOutcome::LoggerInvalid;
    }
    crate::invariants::debug_assert_level_admitted!(metadata.level, logger.threshold());
    if metadata.level < logger.threshold() {
        return EmitOutcome::Filtered;
    }

    let payload_len = args.total_len();
    let timestamp = read_timestamp(logger, tsc_reader);
    let decode_fn: DecodeFn = decode_dispatch::<T>;
    let logger_ptr = Arc::as_ptr(logger);

    context.note_attempted();
    let reservation = if context.queue.policy().is_blocking() {
        context.queue.reserve_with_backoff(payload_len)
    } else {
        context.queue.reserve(payload_len)
    };

    let mut reservation = match reservation {
        Some(r) => r,
        None => {
            context.note_dropped();
            return EmitOutcome::Dropped;
        }
    };

    {
        let buf = reservation.as_mut_slice();
        write_header(buf, payload_len, timestamp, metadata as *const MacroMetadata, logger_ptr, decode_fn);
        let header_len = crate::record::HEADER_LEN;
        let mut payload = Vec::with_capacity(payload_len);
        args.encode_into(&mut payload);
        buf[header_len..header_len + payload_len].copy_from_slice(&payload);
    }
    reservation.commit();
    EmitOutcome::Queued
}

pub fn current_thread_name() -> String {
    THREAD_NAME.with(Clone::clone)
}

static NEXT_FLUSH_TOKEN: AtomicU64 = AtomicU64::new(1);

fn flush_waiters() -> &'static Mutex<HashMap<u64, SyncSender<()>>> {
    static WAITERS: OnceLock<Mutex<HashMap<u64, SyncSender<()>>>> = OnceLock::new();
    WAITERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Queues a `Flush` event carrying a fresh token as its sole argument, and
/// registers a one-shot waiter for it. The wire
/// record format only carries `ArgValue` primitives, so the token — rather
/// than a channel endpoint — is what actually travels through the queue;
/// `resolve_flush_waiter` is how the backend signals this receiver once it
/// has processed the corresponding record.
pub fn request_flush(
    context: &ThreadContext,
    logger: &Arc<Logger>,
    metadata: &'static MacroMetadata,
    tsc_reader: impl FnOnce() -> u64,
) -> Receiver<()> {
    let token = NEXT_FLUSH_TOKEN.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = sync_channel::<()>(1);
    flush_waiters().lock().unwrap().insert(token, tx);
    emit(context, logger, metadata, (token,), tsc_reader);
    rx
}

/// Signals the waiter registered for `token`, if any is still pending.
/// Called by the backend when dispatching a `Flush` event.
pub(crate) fn resolve_flush_waiter(token: u64) {
    if let Some(tx) = flush_waiters().lock().unwrap().remove(&token) {
        let _ = tx.send(());
    }
}

/// Requests the backend (re)configure `logger`'s `BacktraceStore`. `capacity`/`trigger_level` are runtime values, so
/// unlike `rlog!`'s call-site statics this leaks one small `MacroMetadata`
/// per call — configuration calls are expected to be rare, not hot-path.
pub fn request_init_backtrace(
    context: &ThreadContext,
    logger: &Arc<Logger>,
    capacity: usize,
    trigger_level: Level,
    tsc_reader: impl FnOnce() -> u64,
) -> EmitOutcome {
    let metadata: &'static MacroMetadata = Box::leak(Box::new(
        MacroMetadata::new("<init_backtrace>", 0, "init_backtrace", "init_backtrace", Level::Critical)
            .with_event(EventKind::InitBacktrace { capacity, trigger_level }),
    ));
    emit(context, logger, metadata, (), tsc_reader)
}
