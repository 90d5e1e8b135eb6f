//! Per-logger backtrace ring.
//!
//! Holds the last `capacity` below-threshold records a logger produced, so
//! that a later high-severity record can trigger a dump of the context that
//! led up to it. Owned entirely by the backend thread: the frontend only
//! ever sends `InitBacktrace`/`FlushBacktrace` events, never touches the
//! store directly.

use crate::transit::TransitEvent;
use std::collections::VecDeque;

/// Fixed-capacity ring of deferred records, oldest first.
pub struct BacktraceStore {
    capacity: usize,
    entries: VecDeque<TransitEvent>,
}

impl BacktraceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a record, evicting the oldest if already at capacity.
    pub fn push(&mut self, event: TransitEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
        crate::invariants::debug_assert_backtrace_capacity!(self.entries.len(), self.capacity);
    }

    /// Resizes the store in place.
    pub fn resize(&mut self, new_capacity: usize) {
        while self.entries.len() > new_capacity {
            self.entries.pop_front();
        }
        self.capacity = new_capacity;
    }

    /// Drains all entries, oldest first, for dispatch to sinks. Leaves the
    /// store empty but keeps its configured capacity.
    pub fn drain(&mut self) -> Vec<TransitEvent> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Level;

    fn event(seq: u64) -> TransitEvent {
        TransitEvent {
            timestamp: seq,
            level: Level::Debug,
            event: crate::metadata::EventKind::Log,
            thread_id: 1,
            thread_name: "t".to_string(),
            logger: std::ptr::null(),
            file: "f.rs",
            line: 1,
            function: "f",
            format: "seq={}",
            args: vec![crate::record::ArgValue::U64(seq)],
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut store = BacktraceStore::new(2);
        store.push(event(1));
        store.push(event(2));
        store.push(event(3));
        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].timestamp, 2);
        assert_eq!(drained[1].timestamp, 3);
    }

    #[test]
    fn shrinking_truncates_oldest_first() {
        let mut store = BacktraceStore::new(4);
        for i in 1..=4 {
            store.push(event(i));
        }
        store.resize(2);
        let drained = store.drain();
        assert_eq!(drained.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn drain_empties_store() {
        let mut store = BacktraceStore::new(2);
        store.push(event(1));
        assert!(!store.is_empty());
        store.drain();
        assert!(store.is_empty());
    }
}
