//! Per-thread frontend state and the registry the backend scans each drain
//! cycle.

use crate::queue::{QueuePolicy, SpscQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Everything one producer thread owns: its queue, its identity, and its
/// drop counter. Held in a thread-local by the frontend and, via `Arc`, by
/// the registry the backend scans.
pub struct ThreadContext {
    pub thread_id: u64,
    pub thread_name: String,
    pub queue: SpscQueue,
    dropped: AtomicU64,
    dropped_total: AtomicU64,
    attempted: AtomicU64,
    dispatched: AtomicU64,
    shutdown: AtomicBool,
    last_growth_notified: AtomicU64,
}

impl ThreadContext {
    fn new(thread_id: u64, thread_name: String, policy: QueuePolicy, initial_capacity: usize, ceiling: Option<usize>) -> Self {
        Self {
            thread_id,
            thread_name,
            queue: SpscQueue::new(policy, initial_capacity, ceiling),
            dropped: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            attempted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            last_growth_notified: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically reads and resets the drop counter. Called once per drain
    /// cycle by the backend; the returned count becomes a synthetic
    /// `EventKind::Dropped`-equivalent record.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Records that the frontend attempted to emit a record (reached the
    /// reserve step), regardless of whether it was ultimately admitted,
    /// dropped, or dispatched. Feeds [`Self::is_reclaimable`]'s accounting
    /// check.
    #[inline]
    pub fn note_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that the backend handed one of this thread's records to a
    /// sink. Called from the drain loop's dispatch step.
    #[inline]
    pub fn note_dispatched(&self) {
        let old = self.dispatched.fetch_add(1, Ordering::Relaxed);
        crate::invariants::debug_assert_fifo_count!(self.thread_id, old, old + 1);
    }

    pub fn mark_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// `true` if the thread is gone (shut down) and its queue has been
    /// fully drained; the registry reclaims contexts meeting this
    /// condition, in registration order, each drain cycle.
    ///
    /// At this point the thread can no longer attempt new emits, so
    /// attempted/dispatched/dropped have reached their final values and
    /// must reconcile exactly.
    pub fn is_reclaimable(&self) -> bool {
        let reclaimable = self.is_shutdown() && self.queue.peek().is_none();
        if reclaimable {
            crate::invariants::debug_assert_drop_accounting!(
                self.attempted.load(Ordering::Relaxed),
                self.dispatched.load(Ordering::Relaxed),
                self.dropped_total.load(Ordering::Relaxed)
            );
        }
        reclaimable
    }

    pub(crate) fn take_growth_delta(&self) -> u64 {
        let current = self.queue.growth_count();
        let previous = self.last_growth_notified.swap(current, Ordering::Relaxed);
        current - previous
    }
}

/// Process-wide table of live (and not-yet-reclaimed) thread contexts.
///
/// A producer registers once, at first emit, and keeps its `Arc` for its
/// whole lifetime. The backend holds the authoritative list and rebuilds
/// its cached snapshot whenever [`take_dirty`](Self::take_dirty) reports a
/// change.
pub struct ThreadContextRegistry {
    contexts: Mutex<Vec<Arc<ThreadContext>>>,
    dirty: AtomicBool,
    next_thread_id: AtomicU64,
}

impl Default for ThreadContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadContextRegistry {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            next_thread_id: AtomicU64::new(1),
        }
    }

    pub fn register(
        &self,
        thread_name: String,
        policy: QueuePolicy,
        initial_capacity: usize,
        ceiling: Option<usize>,
    ) -> Arc<ThreadContext> {
        let thread_id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let context = Arc::new(ThreadContext::new(thread_id, thread_name, policy, initial_capacity, ceiling));
        self.contexts.lock().expect("thread registry lock poisoned").push(Arc::clone(&context));
        self.dirty.store(true, Ordering::Release);
        context
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> Vec<Arc<ThreadContext>> {
        self.contexts.lock().expect("thread registry lock poisoned").clone()
    }

    /// Drops reclaimable contexts from the registry, preserving the
    /// relative order of the ones that remain. Returns how many were
    /// reclaimed, which the backend uses to decide whether to mark itself
    /// dirty again.
    pub fn reclaim(&self) -> usize {
        self.reclaim_if(|_| true)
    }

    /// Like [`reclaim`](Self::reclaim), but only evicts a reclaimable
    /// context when `extra_check` also returns `true` for its `thread_id`.
    /// Lets the backend hold a context in the registry until its own
    /// per-thread staging buffer (invisible to this registry) is also
    /// empty, so a strict-ordering halt never loses buffered records to a
    /// premature eviction.
    pub fn reclaim_if(&self, mut extra_check: impl FnMut(u64) -> bool) -> usize {
        let mut contexts = self.contexts.lock().expect("thread registry lock poisoned");
        let before = contexts.len();
        contexts.retain(|ctx| !(ctx.is_reclaimable() && extra_check(ctx.thread_id)));
        let reclaimed = before - contexts.len();
        if reclaimed > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_marks_registry_dirty() {
        let registry = ThreadContextRegistry::new();
        assert!(!registry.take_dirty());
        registry.register("t1".into(), QueuePolicy::BoundedDropping, 64, None);
        assert!(registry.take_dirty());
        assert!(!registry.take_dirty());
    }

    #[test]
    fn reclaim_removes_only_drained_shutdown_contexts() {
        let registry = ThreadContextRegistry::new();
        let a = registry.register("a".into(), QueuePolicy::BoundedDropping, 64, None);
        let b = registry.register("b".into(), QueuePolicy::BoundedDropping, 64, None);
        a.mark_shutdown();
        assert_eq!(registry.reclaim(), 1);
        let remaining = registry.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].thread_id, b.thread_id);
    }

    #[test]
    fn dropped_counter_resets_on_take() {
        let registry = ThreadContextRegistry::new();
        let ctx = registry.register("a".into(), QueuePolicy::BoundedDropping, 64, None);
        ctx.note_dropped();
        ctx.note_dropped();
        assert_eq!(ctx.take_dropped(), 2);
        assert_eq!(ctx.take_dropped(), 0);
    }
}
