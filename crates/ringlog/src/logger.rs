//! Logger handles and the process-wide logger registry.

use crate::backtrace::BacktraceStore;
use crate::metadata::Level;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Where a logger reads its timestamps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// `RdtscClock`, calibrated against wall-clock time.
    Tsc,
    /// `std::time::SystemTime`, read directly at the call site.
    System,
    /// A caller-supplied [`UserClock`](crate::sink::UserClock).
    User,
}

/// A named, independently-configured log destination.
///
/// A `Logger` is shared between the frontend (which reads its threshold and
/// clock source on every emit) and the backend (which reads everything else
/// once per drain cycle). All mutable state is therefore atomic or, for the
/// parts only ever touched by the backend, a plain field behind the
/// registry's lock.
pub struct Logger {
    name: String,
    threshold: AtomicU8,
    clock_source: ClockSource,
    user_clock: Option<Arc<dyn crate::sink::UserClock>>,
    sinks: Vec<Arc<dyn crate::sink::Sink>>,
    formatter: Arc<dyn crate::sink::Formatter>,
    valid: std::sync::atomic::AtomicBool,
    backtrace: Mutex<Option<BacktraceStore>>,
    backtrace_trigger: AtomicU8,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("threshold", &self.threshold())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Logger {
    fn new(
        name: String,
        threshold: Level,
        clock_source: ClockSource,
        user_clock: Option<Arc<dyn crate::sink::UserClock>>,
        sinks: Vec<Arc<dyn crate::sink::Sink>>,
        formatter: Arc<dyn crate::sink::Formatter>,
    ) -> Self {
        Self {
            name,
            threshold: AtomicU8::new(threshold as u8),
            clock_source,
            user_clock,
            sinks,
            formatter,
            valid: std::sync::atomic::AtomicBool::new(true),
            backtrace: Mutex::new(None),
            backtrace_trigger: AtomicU8::new(Level::Error as u8),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read on every emit: cheap, uncontended, Relaxed is
    /// sufficient since an observer only needs the most recent setting, not
    /// a synchronization point with any other state.
    #[inline]
    pub fn threshold(&self) -> Level {
        level_from_u8(self.threshold.load(Ordering::Relaxed))
    }

    pub fn set_threshold(&self, level: Level) {
        self.threshold.store(level as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    pub fn user_clock(&self) -> Option<&Arc<dyn crate::sink::UserClock>> {
        self.user_clock.as_ref()
    }

    pub fn sinks(&self) -> &[Arc<dyn crate::sink::Sink>] {
        &self.sinks
    }

    pub fn formatter(&self) -> &Arc<dyn crate::sink::Formatter> {
        &self.formatter
    }

    /// `false` once [`LoggerRegistry::remove`] has been called; the backend
    /// stops dispatching to this logger's sinks and reaps it once its
    /// queues carry no more records addressed to it.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn backtrace_trigger(&self) -> Level {
        level_from_u8(self.backtrace_trigger.load(Ordering::Relaxed))
    }

    /// Backend-only: configures or reconfigures this logger's backtrace
    /// store in response to an `InitBacktrace` event.
    pub(crate) fn configure_backtrace(&self, capacity: usize, trigger_level: Level) {
        self.backtrace_trigger.store(trigger_level as u8, Ordering::Relaxed);
        let mut guard = self.backtrace.lock().expect("backtrace store lock poisoned");
        match guard.as_mut() {
            Some(store) => store.resize(capacity),
            None => *guard = Some(BacktraceStore::new(capacity)),
        }
    }

    pub(crate) fn with_backtrace<R>(&self, f: impl FnOnce(Option<&mut BacktraceStore>) -> R) -> R {
        let mut guard = self.backtrace.lock().expect("backtrace store lock poisoned");
        f(guard.as_mut())
    }
}

fn level_from_u8(v: u8) -> Level {
    match v {
        0 => Level::Trace,
        1 => Level::Debug,
        2 => Level::Info,
        3 => Level::Backtrace,
        4 => Level::Warn,
        5 => Level::Error,
        _ => Level::Critical,
    }
}

/// Process-wide name-to-logger table.
///
/// One instance lives for the process's lifetime behind
/// [`std::sync::OnceLock`] in [`crate::backend`]; frontends look loggers up
/// by name, the backend walks it each drain cycle to notice removals.
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
    dirty: std::sync::atomic::AtomicBool,
    /// Invalidated loggers, kept alive past removal because an in-flight
    /// queue record may still carry a raw `*const Logger` into this
    /// allocation (written by the frontend via `Arc::as_ptr` — see
    /// `crate::frontend::emit`). Each entry is tagged with the epoch at
    /// removal time; once the registry has since observed a cycle where
    /// every thread's queue was empty, nothing can still be holding that
    /// pointer, and it is safe to actually drop.
    retired: Mutex<Vec<(u64, Arc<Logger>)>>,
    epoch: AtomicU64,
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self {
            loggers: RwLock::new(HashMap::new()),
            dirty: std::sync::atomic::AtomicBool::new(false),
            retired: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns the existing logger for `name` if present, otherwise creates,
    /// registers, and returns a new one.
    #[allow(clippy::too_many_arguments)]
    pub fn create_or_get(
        &self,
        name: &str,
        threshold: Level,
        clock_source: ClockSource,
        user_clock: Option<Arc<dyn crate::sink::UserClock>>,
        sinks: Vec<Arc<dyn crate::sink::Sink>>,
        formatter: Arc<dyn crate::sink::Formatter>,
    ) -> Arc<Logger> {
        if let Some(existing) = self.loggers.read().expect("logger registry lock poisoned").get(name) {
            return Arc::clone(existing);
        }
        let mut loggers = self.loggers.write().expect("logger registry lock poisoned");
        if let Some(existing) = loggers.get(name) {
            return Arc::clone(existing);
        }
        let logger = Arc::new(Logger::new(
            name.to_string(),
            threshold,
            clock_source,
            user_clock,
            sinks,
            formatter,
        ));
        loggers.insert(name.to_string(), Arc::clone(&logger));
        self.dirty.store(true, Ordering::Release);
        logger
    }

    pub fn get(&self, name: &str) -> Option<Arc<Logger>> {
        self.loggers.read().expect("logger registry lock poisoned").get(name).cloned()
    }

    /// Marks `name`'s logger invalid and drops the registry's reference to
    /// it. Any frontend holding an `Arc` it already acquired keeps it alive
    /// (and able to emit, harmlessly, into a now-ignored logger) until it is
    /// dropped; the backend notices `is_valid() == false` and stops
    /// dispatching to it once its queues are empty.
    pub fn remove(&self, name: &str) {
        let mut loggers = self.loggers.write().expect("logger registry lock poisoned");
        if let Some(logger) = loggers.remove(name) {
            logger.invalidate();
            self.dirty.store(true, Ordering::Release);
            let epoch = self.epoch.load(Ordering::Acquire);
            self.retired.lock().expect("retired loggers lock poisoned").push((epoch, logger));
        }
    }

    /// Called once per backend drain cycle with whether every thread queue
    /// was observed empty this cycle. Advances the epoch on a quiescent
    /// cycle and reaps any retired logger tagged with an earlier epoch.
    pub(crate) fn advance_epoch(&self, all_queues_were_empty: bool) {
        if !all_queues_were_empty {
            return;
        }
        let new_epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let mut retired = self.retired.lock().expect("retired loggers lock poisoned");
        retired.retain(|(tagged_epoch, _)| *tagged_epoch >= new_epoch);
    }

    /// `true` if loggers have been added or removed since the backend last
    /// rebuilt its cached snapshot; the backend clears this after rebuilding.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> Vec<Arc<Logger>> {
        self.loggers.read().expect("logger registry lock poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NullSink, PlainFormatter};

    fn registry_with_one(name: &str) -> (LoggerRegistry, Arc<Logger>) {
        let registry = LoggerRegistry::new();
        let logger = registry.create_or_get(
            name,
            Level::Info,
            ClockSource::System,
            None,
            vec![Arc::new(NullSink)],
            Arc::new(PlainFormatter),
        );
        (registry, logger)
    }

    #[test]
    fn create_or_get_returns_same_logger_for_repeated_name() {
        let (registry, first) = registry_with_one("app");
        let second = registry.create_or_get(
            "app",
            Level::Trace,
            ClockSource::System,
            None,
            vec![Arc::new(NullSink)],
            Arc::new(PlainFormatter),
        );
        assert!(Arc::ptr_eq(&first, &second));
        // The second call's threshold argument is ignored for an existing logger.
        assert_eq!(second.threshold(), Level::Info);
    }

    #[test]
    fn remove_invalidates_but_does_not_break_existing_handles() {
        let (registry, logger) = registry_with_one("app");
        assert!(logger.is_valid());
        registry.remove("app");
        assert!(!logger.is_valid());
        assert!(registry.get("app").is_none());
    }

    #[test]
    fn dirty_flag_set_on_create_and_remove_cleared_by_take() {
        let (registry, _logger) = registry_with_one("app");
        assert!(registry.take_dirty());
        assert!(!registry.take_dirty());
        registry.remove("app");
        assert!(registry.take_dirty());
    }

    #[test]
    fn threshold_is_mutable_after_construction() {
        let (_registry, logger) = registry_with_one("app");
        logger.set_threshold(Level::Warn);
        assert_eq!(logger.threshold(), Level::Warn);
    }
}
