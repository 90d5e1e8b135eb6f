//! Decoded, backend-owned record representation and per-thread collection
//! buffer.

use crate::logger::Logger;
use crate::metadata::{EventKind, Level};
use crate::record::ArgValue;

/// A record after the backend has decoded it out of a thread's raw byte
/// queue, but before it has been dispatched to sinks.
///
/// This is the unit the strict-ordering merge and the backtrace store
/// operate on; neither needs the raw bytes again once a record has reached
/// this shape.
#[derive(Debug, Clone)]
pub struct TransitEvent {
    pub timestamp: u64,
    pub level: Level,
    pub event: EventKind,
    pub thread_id: u64,
    pub thread_name: String,
    /// Resolved in the same drain cycle that read this event out of the
    /// raw queue, so the pointer is always into a `Logger` that is either
    /// still registered or only just retired (see
    /// `LoggerRegistry::advance_epoch`) — never one reclaimed earlier.
    pub logger: *const Logger,
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
    pub format: &'static str,
    /// For a `Flush` event, `args[0]` is the `u64` token the frontend used
    /// to register a waiter in `crate::frontend`'s flush-waiter table.
    pub args: Vec<ArgValue>,
}

/// Per-thread staging area the backend fills from one [`crate::queue::SpscQueue`]
/// during a drain cycle, observing `transit_events_soft_limit` /
/// `transit_events_hard_limit`.
///
/// The soft limit is advisory: once crossed, the backend should prioritize
/// draining this thread before others. The hard limit is enforced here:
/// further records are left on the queue (picked up next cycle) rather than
/// grown past it, bounding backend memory regardless of producer rate.
pub struct TransitBuffer {
    events: Vec<TransitEvent>,
    soft_limit: usize,
    hard_limit: usize,
}

impl TransitBuffer {
    pub fn new(initial_capacity: usize, soft_limit: usize, hard_limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(initial_capacity),
            soft_limit,
            hard_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_over_soft_limit(&self) -> bool {
        self.events.len() >= self.soft_limit
    }

    pub fn has_room(&self) -> bool {
        self.events.len() < self.hard_limit
    }

    pub fn push(&mut self, event: TransitEvent) {
        self.events.push(event);
    }

    pub fn front_timestamp(&self) -> Option<u64> {
        self.events.first().map(|e| e.timestamp)
    }

    pub fn pop_front(&mut self) -> Option<TransitEvent> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u64) -> TransitEvent {
        TransitEvent {
            timestamp: ts,
            level: Level::Info,
            event: EventKind::Log,
            thread_id: 1,
            thread_name: "worker".into(),
            logger: std::ptr::null(),
            file: "f.rs",
            line: 10,
            function: "f",
            format: "hello",
            args: Vec::new(),
        }
    }

    #[test]
    fn respects_hard_limit() {
        let mut buf = TransitBuffer::new(4, 2, 4);
        for i in 0..4 {
            assert!(buf.has_room());
            buf.push(sample(i));
        }
        assert!(!buf.has_room());
    }

    #[test]
    fn soft_limit_flagged_before_hard_limit() {
        let mut buf = TransitBuffer::new(4, 2, 8);
        buf.push(sample(0));
        assert!(!buf.is_over_soft_limit());
        buf.push(sample(1));
        assert!(buf.is_over_soft_limit());
        assert!(buf.has_room());
    }

    #[test]
    fn pop_front_preserves_order() {
        let mut buf = TransitBuffer::new(4, 10, 10);
        buf.push(sample(5));
        buf.push(sample(6));
        assert_eq!(buf.pop_front().unwrap().timestamp, 5);
        assert_eq!(buf.pop_front().unwrap().timestamp, 6);
        assert!(buf.pop_front().is_none());
    }
}
