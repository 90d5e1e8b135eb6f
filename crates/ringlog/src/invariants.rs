//! Debug assertion macros for this crate's correctness invariants.
//!
//! Active only in debug builds (`#[cfg(debug_assertions)]`), so there is zero
//! overhead in release builds. Mirrors the `INV-*` macro convention used
//! throughout this workspace's ring buffer crates.

// =============================================================================
// INV-Q-01: Bounded count, wrap-free framing
// =============================================================================

/// Assert a queue's occupied byte count never exceeds its capacity.
///
/// **Invariant**: `0 ≤ (tail - head) ≤ capacity`
macro_rules! debug_assert_bounded_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied <= $capacity,
            "INV-Q-01 violated: occupancy {} exceeds capacity {}",
            $occupied,
            $capacity
        )
    };
}

/// Assert that a reservation never spans the end of the ring buffer.
///
/// **Invariant**: `idx + len <= capacity` for any committed record.
macro_rules! debug_assert_no_wrap_split {
    ($idx:expr, $len:expr, $capacity:expr) => {
        debug_assert!(
            $idx + $len <= $capacity,
            "INV-Q-01 violated: record at {} len {} would split across end of buffer (capacity {})",
            $idx,
            $len,
            $capacity
        )
    };
}

// =============================================================================
// INV-Q-02: Monotonic sequence progress
// =============================================================================

/// Assert a sequence counter (head or tail) only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-Q-02 violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-FIFO-01: Per-producer FIFO
// =============================================================================

/// Assert a per-producer consumption counter is monotonic, approximating
/// FIFO-preservation across batches.
macro_rules! debug_assert_fifo_count {
    ($thread_id:expr, $old_count:expr, $new_count:expr) => {
        debug_assert!(
            $new_count >= $old_count,
            "INV-FIFO-01 violated: thread {} consumption count went from {} to {}",
            $thread_id,
            $old_count,
            $new_count
        )
    };
}

// =============================================================================
// INV-ORD-01: Strict timestamp ordering within cutoff
// =============================================================================

/// Assert a dispatched event's timestamp respects the cutoff resolution
/// relative to the previously dispatched event.
macro_rules! debug_assert_timestamp_order {
    ($prev_ts:expr, $cur_ts:expr, $cutoff_resolution_ns:expr) => {
        debug_assert!(
            $cur_ts + $cutoff_resolution_ns >= $prev_ts,
            "INV-ORD-01 violated: dispatched timestamp {} precedes previous {} by more than cutoff resolution {}",
            $cur_ts,
            $prev_ts,
            $cutoff_resolution_ns
        )
    };
}

// =============================================================================
// INV-BT-01: Backtrace store capacity bound
// =============================================================================

/// Assert a backtrace store never holds more than its configured capacity.
macro_rules! debug_assert_backtrace_capacity {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "INV-BT-01 violated: backtrace store holds {} entries, capacity is {}",
            $len,
            $capacity
        )
    };
}

// =============================================================================
// INV-DROP-01: Dropped accounting
// =============================================================================

/// Assert that dispatched + dropped reconciles with attempted emits.
macro_rules! debug_assert_drop_accounting {
    ($attempted:expr, $dispatched:expr, $dropped:expr) => {
        debug_assert!(
            $attempted == $dispatched + $dropped,
            "INV-DROP-01 violated: attempted {} != dispatched {} + dropped {}",
            $attempted,
            $dispatched,
            $dropped
        )
    };
}

// =============================================================================
// INV-THRESH-01: Threshold enforcement at the call site
// =============================================================================

/// Assert an emitted record's level meets or exceeds the logger's threshold.
macro_rules! debug_assert_level_admitted {
    ($level:expr, $threshold:expr) => {
        debug_assert!(
            $level >= $threshold,
            "INV-THRESH-01 violated: emitted level {:?} below threshold {:?}",
            $level,
            $threshold
        )
    };
}

pub(crate) use debug_assert_backtrace_capacity;
pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_drop_accounting;
pub(crate) use debug_assert_fifo_count;
pub(crate) use debug_assert_level_admitted;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap_split;
pub(crate) use debug_assert_timestamp_order;
