//! TSC-to-wall-clock conversion.
//!
//! Ported from the calibration algorithm in Quill's `RdtscClock.cpp`: take
//! the median tick rate over several short busy-spin trials, then maintain
//! a versioned `(base_wall_time, base_tsc, ticks_per_nanosecond)` anchor,
//! resyncing periodically and escalating the resync interval when the
//! resync measurement itself looks unreliable.

use crate::config::ErrorNotifier;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(target_arch = "x86_64")]
#[inline]
fn read_tsc() -> u64 {
    // SAFETY: RDTSC is available on every x86_64 target this crate supports.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn read_tsc() -> u64 {
    // No cycle counter available through stable std APIs; fall back to a
    // monotonic nanosecond source so callers see a still-increasing value.
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_nanos() as u64
}

fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Measures the TSC tick rate by running several short busy-spin trials and
/// taking the median, as Quill's `RdtscTicks` does.
fn calibrate_ticks_per_nanosecond(trials: usize, trial_duration: Duration) -> f64 {
    let mut rates = Vec::with_capacity(trials);
    for _ in 0..trials {
        let beg_tsc = read_tsc();
        let beg_wall = std::time::Instant::now();
        while beg_wall.elapsed() < trial_duration {
            std::hint::spin_loop();
        }
        let end_tsc = read_tsc();
        let elapsed_ns = beg_wall.elapsed().as_nanos().max(1) as f64;
        rates.push((end_tsc - beg_tsc) as f64 / elapsed_ns);
    }
    rates.sort_by(|a, b| a.partial_cmp(b).expect("calibration rate is never NaN"));
    rates[rates.len() / 2]
}

/// A `(base_wall_time, base_tsc)` anchor, published with a version counter
/// so readers can detect a concurrent resync and retry (a seqlock without
/// ever blocking a writer, since there is exactly one writer: the backend
/// thread that owns this clock).
struct Anchor {
    version: AtomicU64,
    base_tsc: AtomicU64,
    base_wall_ns: AtomicU64,
}

impl Anchor {
    fn new(base_tsc: u64, base_wall_ns: u64) -> Self {
        Self {
            version: AtomicU64::new(0),
            base_tsc: AtomicU64::new(base_tsc),
            base_wall_ns: AtomicU64::new(base_wall_ns),
        }
    }

    fn store(&self, base_tsc: u64, base_wall_ns: u64) {
        let v = self.version.fetch_add(1, Ordering::AcqRel);
        self.base_tsc.store(base_tsc, Ordering::Release);
        self.base_wall_ns.store(base_wall_ns, Ordering::Release);
        self.version.store(v.wrapping_add(2), Ordering::Release);
    }

    fn load(&self) -> (u64, u64) {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let base_tsc = self.base_tsc.load(Ordering::Acquire);
            let base_wall_ns = self.base_wall_ns.load(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Acquire);
            if v1 == v2 {
                return (base_tsc, base_wall_ns);
            }
        }
    }
}

/// Starting (and default-resync) jitter bound, in TSC ticks, for a resync
/// sample to be trusted (Quill uses 2000 cycles as its bound; this crate
/// follows the wider 2500-to-10000 escalation spec'd for degraded hosts).
const RESYNC_JITTER_LIMIT_TICKS: u64 = 2500;
const RESYNC_JITTER_LIMIT_CEILING_TICKS: u64 = 10_000;
const RESYNC_MAX_ATTEMPTS: u32 = 4;

/// The jitter bound allowed on resync attempt `attempt` (0-based), escalating
/// linearly from [`RESYNC_JITTER_LIMIT_TICKS`] to
/// [`RESYNC_JITTER_LIMIT_CEILING_TICKS`] across the last attempt, so a noisy
/// host gets more tolerance on later tries instead of failing outright.
fn jitter_limit_for_attempt(attempt: u32) -> u64 {
    let span = RESYNC_JITTER_LIMIT_CEILING_TICKS - RESYNC_JITTER_LIMIT_TICKS;
    RESYNC_JITTER_LIMIT_TICKS + u64::from(attempt) * span / u64::from(RESYNC_MAX_ATTEMPTS - 1)
}

pub struct RdtscClock {
    ticks_per_nanosecond: f64,
    anchor: Anchor,
    resync_interval_ticks: AtomicU64,
    error_notifier: Arc<dyn ErrorNotifier>,
    /// Set once if calibration could not produce a usable rate; `now()` then
    /// bypasses the TSC conversion entirely and reads the system clock
    /// directly, per the documented failure semantics.
    degraded: AtomicBool,
}

impl RdtscClock {
    /// Calibrates and performs an initial resync. `resync_interval` mirrors
    /// `BackendOptions::rdtsc_resync_interval` (quill default: 500ms).
    ///
    /// If calibration yields a zero or negative rate, warns via
    /// `error_notifier` and falls back to reading the system clock directly
    /// for every subsequent `now()` call.
    pub fn new(resync_interval: Duration, error_notifier: Arc<dyn ErrorNotifier>) -> Self {
        let ticks_per_nanosecond = calibrate_ticks_per_nanosecond(13, Duration::from_millis(10));
        let degraded = ticks_per_nanosecond <= 0.0;
        if degraded {
            error_notifier.notify("rdtsc calibration produced a non-positive rate; falling back to the system clock");
        }
        let resync_interval_ticks = (resync_interval.as_nanos() as f64 * ticks_per_nanosecond) as u64;
        let clock = Self {
            ticks_per_nanosecond,
            anchor: Anchor::new(read_tsc(), now_unix_nanos()),
            resync_interval_ticks: AtomicU64::new(resync_interval_ticks.max(1)),
            error_notifier,
            degraded: AtomicBool::new(degraded),
        };
        if !degraded {
            clock.resync();
        }
        clock
    }

    /// Converts a captured TSC value into nanoseconds since the Unix epoch.
    /// Triggers a resync if the sample is further from the anchor than the
    /// current resync interval, as Quill's `time_since_epoch` does.
    pub fn time_since_epoch(&self, rdtsc_value: u64) -> u64 {
        if self.degraded.load(Ordering::Relaxed) {
            return now_unix_nanos();
        }
        let (base_tsc, base_wall_ns) = self.anchor.load();
        let diff = rdtsc_value.saturating_sub(base_tsc);
        if diff > self.resync_interval_ticks.load(Ordering::Relaxed) {
            self.resync();
            let (base_tsc, base_wall_ns) = self.anchor.load();
            let diff = rdtsc_value.saturating_sub(base_tsc);
            return base_wall_ns + (diff as f64 / self.ticks_per_nanosecond) as u64;
        }
        base_wall_ns + (diff as f64 / self.ticks_per_nanosecond) as u64
    }

    pub fn now(&self) -> u64 {
        self.time_since_epoch(read_tsc())
    }

    #[inline]
    pub fn read_tsc(&self) -> u64 {
        read_tsc()
    }

    /// Re-measures the anchor, retrying up to `RESYNC_MAX_ATTEMPTS` times
    /// with a jitter bound escalating from 2500 to 10000 ticks, for a sample
    /// tight enough to trust. If every attempt is too jittery, warns via
    /// `error_notifier` and doubles the resync interval so the next resync
    /// is attempted less eagerly (quill does the same under sustained
    /// scheduler noise); timestamps stay monotone but may drift.
    fn resync(&self) {
        for attempt in 0..RESYNC_MAX_ATTEMPTS {
            let beg_tsc = read_tsc();
            let wall_ns = now_unix_nanos();
            let end_tsc = read_tsc();
            if end_tsc - beg_tsc <= jitter_limit_for_attempt(attempt) {
                self.anchor.store(end_tsc, wall_ns);
                let fresh_interval = (Duration::from_millis(500).as_nanos() as f64 * self.ticks_per_nanosecond) as u64;
                self.resync_interval_ticks.store(fresh_interval.max(1), Ordering::Relaxed);
                return;
            }
        }
        self.error_notifier
            .notify("rdtsc resync failed after 4 attempts; doubling the resync interval");
        let doubled = self.resync_interval_ticks.load(Ordering::Relaxed).saturating_mul(2);
        self.resync_interval_ticks.store(doubled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StderrNotifier;

    fn test_clock(resync_interval: Duration) -> RdtscClock {
        RdtscClock::new(resync_interval, Arc::new(StderrNotifier))
    }

    #[test]
    fn now_is_close_to_wall_clock() {
        let clock = test_clock(Duration::from_millis(500));
        let observed = clock.now();
        let actual = now_unix_nanos();
        let delta = actual.abs_diff(observed);
        // Generous bound: this runs on shared CI hardware, not bare metal.
        assert!(delta < Duration::from_secs(1).as_nanos() as u64, "delta_ns={delta}");
    }

    #[test]
    fn time_since_epoch_is_monotonic_for_increasing_tsc() {
        let clock = test_clock(Duration::from_millis(500));
        let t0 = clock.read_tsc();
        std::thread::sleep(Duration::from_millis(5));
        let t1 = clock.read_tsc();
        assert!(clock.time_since_epoch(t1) >= clock.time_since_epoch(t0));
    }

    #[test]
    fn degraded_calibration_falls_back_to_system_clock() {
        let clock = RdtscClock {
            ticks_per_nanosecond: 1.0,
            anchor: Anchor::new(0, 0),
            resync_interval_ticks: AtomicU64::new(1),
            error_notifier: Arc::new(StderrNotifier),
            degraded: AtomicBool::new(true),
        };
        let observed = clock.now();
        let actual = now_unix_nanos();
        assert!(actual.abs_diff(observed) < Duration::from_secs(1).as_nanos() as u64);
    }
}
