//! Loom-based concurrency tests for the bounded ring's reserve/commit/advance
//! protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! `SpscQueue` is not part of this crate's public surface, so these model a
//! simplified ring buffer using the same atomic-ordering protocol
//! (`BoundedRing::reserve`/`commit`/`advance` in `src/queue.rs`) at a capacity
//! small enough for loom's exhaustive interleaving search to stay tractable.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

/// Simplified SPSC ring mirroring `BoundedRing`'s cached-head/tail protocol.
struct LoomRing {
    tail: AtomicU64,
    head: AtomicU64,
    buffer: UnsafeCell<[u64; 4]>,
    capacity: usize,
}

unsafe impl Send for LoomRing {}
unsafe impl Sync for LoomRing {}

impl LoomRing {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            buffer: UnsafeCell::new([0; 4]),
            capacity: 4,
        }
    }

    fn mask(&self) -> usize {
        self.capacity - 1
    }

    /// Producer: reserve-then-commit in one step for this simplified model.
    fn push(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let space = self.capacity.saturating_sub((tail - head) as usize);
        if space == 0 {
            return false;
        }

        let idx = (tail as usize) & self.mask();

        // SAFETY: space > 0, so no consumer can read this slot concurrently.
        unsafe {
            (*self.buffer.get())[idx] = value;
        }

        self.tail.store(tail + 1, Ordering::Release);
        true
    }

    /// Consumer: peek-then-advance in one step for this simplified model.
    fn pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = (head as usize) & self.mask();
        // SAFETY: tail > head, so this slot holds a committed write.
        let value = unsafe { (*self.buffer.get())[idx] };

        self.head.store(head + 1, Ordering::Release);
        Some(value)
    }
}

#[test]
fn loom_bounded_ring_preserves_fifo() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());
        let ring2 = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            ring2.push(10);
            ring2.push(11);
        });

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            for _ in 0..10 {
                if let Some(v) = ring.pop() {
                    received.push(v);
                }
                if received.len() == 2 {
                    break;
                }
                loom::thread::yield_now();
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();

        if received.len() >= 2 {
            assert_eq!(received[0], 10);
            assert_eq!(received[1], 11);
        }
    });
}

#[test]
fn loom_bounded_ring_rejects_push_past_capacity() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());
        let ring2 = Arc::clone(&ring);

        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(ring.push(4));
        assert!(!ring.push(5));

        let consumer = thread::spawn(move || ring2.pop());
        let value = consumer.join().unwrap();
        assert_eq!(value, Some(1));

        assert!(ring.push(5));
    });
}

#[test]
fn loom_bounded_ring_never_yields_more_than_was_pushed() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());
        let ring_producer = Arc::clone(&ring);
        let ring_consumer = Arc::clone(&ring);

        let sent = Arc::new(loom::sync::atomic::AtomicUsize::new(0));
        let received = Arc::new(loom::sync::atomic::AtomicUsize::new(0));
        let sent_clone = Arc::clone(&sent);
        let received_clone = Arc::clone(&received);

        let producer = thread::spawn(move || {
            if ring_producer.push(100) {
                sent_clone.fetch_add(1, Ordering::SeqCst);
            }
            if ring_producer.push(200) {
                sent_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let consumer = thread::spawn(move || {
            for _ in 0..4 {
                if ring_consumer.pop().is_some() {
                    received_clone.fetch_add(1, Ordering::SeqCst);
                }
                loom::thread::yield_now();
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();

        let s = sent.load(Ordering::SeqCst);
        let r = received.load(Ordering::SeqCst);
        assert!(r <= s, "received {r} but only sent {s}");
    });
}
