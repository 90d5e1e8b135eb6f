//! Error taxonomy.
//!
//! The frontend emit path is infallible by contract — errors never reach the
//! caller that issued a log statement. Everything here is surfaced either as
//! a `Result` from a configuration/lifecycle API, or through the backend's
//! [`ErrorNotifier`](crate::config::ErrorNotifier) callback.

use thiserror::Error;

/// Errors returned by configuration-time APIs.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A ring buffer capacity must be a power of two.
    #[error("capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),

    /// `backend_cpu_affinity` named a CPU index the host does not have.
    #[error("invalid CPU affinity: {0}")]
    InvalidAffinity(String),

    /// A growth ceiling smaller than the initial capacity was requested.
    #[error("growth ceiling {ceiling} is smaller than initial capacity {initial}")]
    CeilingBelowInitial { initial: usize, ceiling: usize },
}

/// Errors surfaced while registering or looking up loggers.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The logger registry has been shut down.
    #[error("logger registry is shut down")]
    ShutDown,
}

/// Errors the backend can report, either returned from `Backend::start`
/// or passed as a formatted string to the error notifier.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// A second backend was started in the same process.
    #[error("a ringlog backend is already running in this process")]
    DuplicateInstance,

    /// A queue record's length prefix was zero or exceeded the buffer
    /// capacity — the queue is corrupt and that producer's remaining data
    /// cannot be trusted.
    #[error("corrupt queue framing from thread {thread_id}: header length {header_len} invalid for capacity {capacity}")]
    CorruptFraming {
        thread_id: u64,
        header_len: u32,
        capacity: usize,
    },

    /// The RDTSC clock's initial calibration produced a non-positive rate.
    #[error("rdtsc calibration failed: {0}")]
    ClockCalibrationFailed(String),
}
