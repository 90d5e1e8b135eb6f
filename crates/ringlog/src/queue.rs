//! The per-thread SPSC byte queue.
//!
//! Two concrete shapes share one public surface via [`SpscQueue`]:
//!
//! - **Bounded**: a fixed-capacity power-of-two ring. A record that does not
//!   fit before the end of the buffer is preceded by a pad record so no
//!   payload is ever split. Every committed record's
//!   in-ring stride is rounded up to a multiple of 4 bytes, which keeps the
//!   write cursor 4-byte aligned at all times and guarantees there is always
//!   room for the 4-byte pad sentinel when padding is needed.
//! - **Unbounded**: a singly-linked chain of growing, non-wrapping blocks.
//!   When a record does not fit in the current block, the producer seals it
//!   (simply stops writing; the unused tail space is never read) and links a
//!   new block sized at double the previous one, up to an optional ceiling.
//!   The consumer frees blocks as it fully drains them — safe because SPSC
//!   guarantees nothing else will ever touch a sealed block again.
//!
//! Both shapes implement the same [`reserve`]/[`commit`]/[`peek`]/[`consume`]
//! contract.

use crate::invariants::{debug_assert_bounded_occupancy, debug_assert_monotonic, debug_assert_no_wrap_split};
use crate::record::{read_frame_len, HEADER_LEN, PAD_SENTINEL};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

/// How a queue behaves when it cannot find room for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Fixed capacity; `reserve` fails silently on a full queue.
    BoundedDropping,
    /// Fixed capacity; `reserve` spins (see [`crate::backoff::Backoff`])
    /// until space frees up or the queue closes.
    BoundedBlocking,
    /// Grows by doubling up to an optional ceiling; fails silently once the
    /// ceiling is hit.
    UnboundedDropping,
    /// Grows by doubling up to an optional ceiling; spins once the ceiling
    /// is hit.
    UnboundedBlocking,
    /// Grows by doubling with no ceiling. `reserve` never fails.
    UnboundedUnlimited,
}

impl QueuePolicy {
    pub const fn is_bounded(self) -> bool {
        matches!(self, Self::BoundedDropping | Self::BoundedBlocking)
    }

    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::BoundedBlocking | Self::UnboundedBlocking)
    }
}

#[inline]
const fn align_up4(n: usize) -> usize {
    (n + 3) & !3
}

// =============================================================================
// Bounded ring
// =============================================================================

struct BoundedRing {
    tail: CachePadded<AtomicU64>,
    cached_head: CachePadded<UnsafeCell<u64>>,
    head: CachePadded<AtomicU64>,
    cached_tail: CachePadded<UnsafeCell<u64>>,
    buffer: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    mask: usize,
}

// Safety: exactly one producer thread touches the producer-owned fields and
// exactly one consumer thread (the backend) touches the consumer-owned
// ones; cross-thread visibility is established by the Acquire/Release pairs
// on `head`/`tail`.
unsafe impl Send for BoundedRing {}
unsafe impl Sync for BoundedRing {}

impl BoundedRing {
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "bounded queue capacity must be a power of two");
        assert!(capacity >= HEADER_LEN * 2, "bounded queue capacity too small to hold a record and a pad");
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            buffer: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
            mask: capacity - 1,
        }
    }

    fn reserve(&self, payload_len: usize) -> Option<(usize, usize)> {
        let stride = align_up4(HEADER_LEN + payload_len);
        if stride > self.capacity {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let idx = (tail as usize) & self.mask;
        let remaining_to_end = self.capacity - idx;
        let (write_idx, needed, pad) = if stride <= remaining_to_end {
            (idx, stride, 0)
        } else {
            (0, remaining_to_end + stride, remaining_to_end)
        };

        // SAFETY: cached_head is producer-owned.
        let cached_head = unsafe { *self.cached_head.get() };
        let mut space = self.capacity - (tail.wrapping_sub(cached_head) as usize);
        if space < needed {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: producer-owned write, synchronized by the Acquire load above.
            unsafe {
                *self.cached_head.get() = head;
            }
            space = self.capacity - (tail.wrapping_sub(head) as usize);
            if space < needed {
                return None;
            }
        }

        if pad > 0 {
            debug_assert!(pad >= 4, "pad region must fit a 4-byte sentinel");
            // SAFETY: idx..idx+4 lies within the buffer by construction of `remaining_to_end`.
            unsafe {
                let buf = &mut *self.buffer.get();
                buf[idx..idx + 4].copy_from_slice(&PAD_SENTINEL.to_le_bytes());
            }
            self.tail.store(tail.wrapping_add(pad as u64), Ordering::Release);
        }

        debug_assert_no_wrap_split!(write_idx, stride, self.capacity);
        let occupied_after = self.capacity - (space - needed);
        debug_assert_bounded_occupancy!(occupied_after, self.capacity);

        Some((write_idx, stride))
    }

    fn commit(&self, extra_tail: u64) {
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(extra_tail);
        debug_assert_monotonic!("bounded ring tail", tail, new_tail);
        self.tail.store(new_tail, Ordering::Release);
    }

    /// SAFETY: caller must only call while holding the matching reservation
    /// (single producer).
    unsafe fn write_slice(&self, idx: usize, len: usize) -> &mut [u8] {
        let buf = &mut *self.buffer.get();
        &mut buf[idx..idx + len]
    }

    fn peek(&self) -> Option<(usize, usize)> {
        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: cached_tail is consumer-owned.
        let mut cached_tail = unsafe { *self.cached_tail.get() };
        let mut avail = cached_tail.wrapping_sub(head) as usize;
        if avail == 0 {
            cached_tail = self.tail.load(Ordering::Acquire);
            unsafe {
                *self.cached_tail.get() = cached_tail;
            }
            avail = cached_tail.wrapping_sub(head) as usize;
            if avail == 0 {
                return None;
            }
        }
        let idx = (head as usize) & self.mask;
        Some((idx, avail))
    }

    fn record_at(&self, idx: usize) -> &[u8] {
        // SAFETY: the consumer only reads bytes in [head, tail) which were
        // published by the producer's Release store observed via Acquire.
        unsafe {
            let buf = &*self.buffer.get();
            &buf[idx..]
        }
    }

    fn advance(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        debug_assert_monotonic!("bounded ring head", head, new_head);
        self.head.store(new_head, Ordering::Release);
    }
}

// =============================================================================
// Unbounded block chain
// =============================================================================

struct Block {
    data: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    tail: AtomicUsize,
    head: AtomicUsize,
    next: AtomicPtr<Block>,
}

unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    fn new(capacity: usize) -> Box<Self> {
        Box::new(Self {
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
            tail: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
            next: AtomicPtr::new(std::ptr::null_mut()),
        })
    }
}

struct BlockChain {
    root: *mut Block,
    producer_cursor: UnsafeCell<*mut Block>,
    consumer_cursor: UnsafeCell<*mut Block>,
    ceiling: Option<usize>,
    growth_count: AtomicU64,
}

unsafe impl Send for BlockChain {}
unsafe impl Sync for BlockChain {}

impl BlockChain {
    fn new(initial_capacity: usize, ceiling: Option<usize>) -> Self {
        let root = Box::into_raw(Block::new(initial_capacity));
        Self {
            root,
            producer_cursor: UnsafeCell::new(root),
            consumer_cursor: UnsafeCell::new(root),
            ceiling,
            growth_count: AtomicU64::new(0),
        }
    }

    fn reserve(&self, payload_len: usize) -> Option<(*mut Block, usize, usize)> {
        let stride = align_up4(HEADER_LEN + payload_len);
        // SAFETY: producer_cursor is producer-owned.
        let mut current = unsafe { &mut *self.producer_cursor.get() };
        loop {
            let block = unsafe { &**current };
            let tail = block.tail.load(Ordering::Relaxed);
            if tail + stride <= block.capacity {
                return Some((*current, tail, stride));
            }

            // Current block can't fit this record: seal it and grow.
            let next_capacity = match self.ceiling {
                Some(ceiling) if block.capacity >= ceiling => {
                    if stride > ceiling {
                        return None;
                    }
                    ceiling
                }
                Some(ceiling) => (block.capacity * 2).min(ceiling).max(stride),
                None => (block.capacity * 2).max(stride),
            };

            let new_block = Box::into_raw(Block::new(next_capacity));
            block.next.store(new_block, Ordering::Release);
            *current = new_block;
            self.growth_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn commit(&self, block: *mut Block, extra_tail: usize) {
        let block = unsafe { &*block };
        let tail = block.tail.load(Ordering::Relaxed);
        let new_tail = tail + extra_tail;
        debug_assert_monotonic!("block tail", tail, new_tail);
        debug_assert_bounded_occupancy!(new_tail, block.capacity);
        block.tail.store(new_tail, Ordering::Release);
    }

    unsafe fn write_slice(&self, block: *mut Block, idx: usize, len: usize) -> &mut [u8] {
        let data = &mut *(*block).data.get();
        &mut data[idx..idx + len]
    }

    fn peek(&self) -> Option<(*mut Block, usize, usize)> {
        loop {
            // SAFETY: consumer_cursor is consumer-owned.
            let cursor = unsafe { *self.consumer_cursor.get() };
            let block = unsafe { &*cursor };
            let head = block.head.load(Ordering::Relaxed);
            let tail = block.tail.load(Ordering::Acquire);
            let avail = tail - head;
            if avail > 0 {
                return Some((cursor, head, avail));
            }
            let next = block.next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }
            // Fully drained and sealed: safe to free, nothing else can see it.
            unsafe {
                *self.consumer_cursor.get() = next;
                drop(Box::from_raw(cursor));
            }
        }
    }

    fn record_at(&self, block: *mut Block, idx: usize) -> &[u8] {
        unsafe {
            let data = &*(*block).data.get();
            &data[idx..]
        }
    }

    fn advance(&self, block: *mut Block, n: usize) {
        let block = unsafe { &*block };
        let head = block.head.load(Ordering::Relaxed);
        let new_head = head + n;
        debug_assert_monotonic!("block head", head, new_head);
        block.head.store(new_head, Ordering::Release);
    }
}

impl Drop for BlockChain {
    fn drop(&mut self) {
        let mut cursor = unsafe { *self.consumer_cursor.get() };
        // Producer's cursor may be ahead of the consumer's if the queue is
        // dropped mid-flight; walk from the earlier of the two.
        loop {
            if cursor.is_null() {
                break;
            }
            let next = unsafe { (*cursor).next.load(Ordering::Relaxed) };
            unsafe {
                drop(Box::from_raw(cursor));
            }
            cursor = next;
        }
    }
}

// =============================================================================
// Public SpscQueue
// =============================================================================

enum Shape {
    Bounded(BoundedRing),
    Unbounded(BlockChain),
}

/// A lock-free byte-stream queue between one producer thread and the
/// backend.
pub struct SpscQueue {
    shape: Shape,
    policy: QueuePolicy,
    closed: AtomicBool,
}

/// A writable region returned by [`SpscQueue::reserve`]. Write the record's
/// header and payload into [`as_mut_slice`](Self::as_mut_slice), then call
/// [`commit`](Self::commit).
pub struct QueueReservation<'q> {
    queue: &'q SpscQueue,
    slice: &'q mut [u8],
    block: Option<*mut Block>,
    stride: usize,
}

impl<'q> QueueReservation<'q> {
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.slice
    }

    pub fn commit(self) {
        match (&self.queue.shape, self.block) {
            (Shape::Bounded(ring), None) => ring.commit(self.stride as u64),
            (Shape::Unbounded(chain), Some(block)) => chain.commit(block, self.stride),
            _ => unreachable!("reservation shape must match queue shape"),
        }
    }
}

/// A readable record handed back by [`SpscQueue::peek`].
pub struct QueueRecord<'q> {
    pub bytes: &'q [u8],
    /// Total in-ring size (stride) to pass to [`SpscQueue::consume`].
    pub stride: usize,
}

impl SpscQueue {
    /// Creates a new queue for the given policy.
    ///
    /// `initial_capacity` must be a power of two for bounded policies; for
    /// unbounded policies it is the first block's size, also rounded up to
    /// a power of two for consistency with the bounded case even though
    /// blocks never wrap. `ceiling` is ignored for bounded policies and for
    /// `UnboundedUnlimited`.
    pub fn new(policy: QueuePolicy, initial_capacity: usize, ceiling: Option<usize>) -> Self {
        let shape = if policy.is_bounded() {
            Shape::Bounded(BoundedRing::new(initial_capacity))
        } else {
            let ceiling = if matches!(policy, QueuePolicy::UnboundedUnlimited) {
                None
            } else {
                ceiling
            };
            Shape::Unbounded(BlockChain::new(initial_capacity, ceiling))
        };
        Self {
            shape,
            policy,
            closed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of times an unbounded queue has grown by allocating a new
    /// block. Always 0 for bounded queues. Polled by the backend to decide
    /// when to invoke the error notifier.
    pub fn growth_count(&self) -> u64 {
        match &self.shape {
            Shape::Bounded(_) => 0,
            Shape::Unbounded(chain) => chain.growth_count.load(Ordering::Relaxed),
        }
    }

    /// Reserves room for a record whose payload is `payload_len` bytes.
    /// Returns `None` if there is no room (bounded: full; unbounded: at
    /// ceiling).
    pub fn reserve(&self, payload_len: usize) -> Option<QueueReservation<'_>> {
        if self.is_closed() {
            return None;
        }
        match &self.shape {
            Shape::Bounded(ring) => {
                let (idx, stride) = ring.reserve(payload_len)?;
                // SAFETY: single producer, reservation is exclusive until committed.
                let slice = unsafe { ring.write_slice(idx, stride) };
                Some(QueueReservation {
                    queue: self,
                    slice,
                    block: None,
                    stride,
                })
            }
            Shape::Unbounded(chain) => {
                let (block, idx, stride) = chain.reserve(payload_len)?;
                // SAFETY: single producer, reservation is exclusive until committed.
                let slice = unsafe { chain.write_slice(block, idx, stride) };
                Some(QueueReservation {
                    queue: self,
                    slice,
                    block: Some(block),
                    stride,
                })
            }
        }
    }

    /// Reserves with the adaptive [`crate::backoff::Backoff`] strategy,
    /// spinning until space frees up or the queue closes. Intended for
    /// `*Blocking` policies; callers choose whether to use this or the
    /// non-blocking `reserve`.
    pub fn reserve_with_backoff(&self, payload_len: usize) -> Option<QueueReservation<'_>> {
        let mut backoff = crate::backoff::Backoff::new();
        loop {
            if let Some(r) = self.reserve(payload_len) {
                return Some(r);
            }
            if self.is_closed() || backoff.is_completed() {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Returns the next readable record without consuming it, skipping any
    /// pad records transparently. Returns `None` if the queue is empty.
    pub fn peek(&self) -> Option<QueueRecord<'_>> {
        match &self.shape {
            Shape::Bounded(ring) => loop {
                let (idx, avail) = ring.peek()?;
                if avail < 4 {
                    return None;
                }
                let bytes = ring.record_at(idx);
                let frame_len = read_frame_len(bytes);
                if frame_len == PAD_SENTINEL {
                    // Skip to the next capacity boundary.
                    let head = ring.head.load(Ordering::Relaxed);
                    let next_boundary = (head | ring.mask as u64) + 1;
                    ring.head.store(next_boundary, Ordering::Release);
                    continue;
                }
                let stride = align_up4(frame_len as usize + 4);
                if avail < stride {
                    // Record not fully committed yet.
                    return None;
                }
                return Some(QueueRecord {
                    bytes: &bytes[..stride],
                    stride,
                });
            },
            Shape::Unbounded(chain) => {
                let (block, idx, avail) = chain.peek()?;
                let bytes = chain.record_at(block, idx);
                let frame_len = read_frame_len(bytes);
                let stride = align_up4(frame_len as usize + 4);
                if avail < stride {
                    return None;
                }
                Some(QueueRecord {
                    bytes: &bytes[..stride],
                    stride,
                })
            }
        }
    }

    /// Advances the read cursor past a record of the given stride (as
    /// returned in [`QueueRecord::stride`]).
    pub fn consume(&self, stride: usize) {
        match &self.shape {
            Shape::Bounded(ring) => ring.advance(stride),
            Shape::Unbounded(chain) => {
                // SAFETY: consumer_cursor is consumer-owned and peek() just
                // positioned it at the block this stride belongs to.
                let block = unsafe { *chain.consumer_cursor.get() };
                chain.advance(block, stride);
            }
        }
    }
}
