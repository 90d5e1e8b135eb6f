//! Backend configuration.

use std::time::Duration;

/// Tunables mirroring Quill's `BackendOptions`. Field-for-field defaults
/// follow the original: a dedicated, low-priority-by-default worker thread
/// trading a little latency for bounded memory use.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub thread_name: String,
    pub enable_yield_when_idle: bool,
    pub sleep_duration: Duration,
    pub transit_event_buffer_initial_capacity: usize,
    pub transit_events_soft_limit: usize,
    pub transit_events_hard_limit: usize,
    pub enable_strict_log_timestamp_order: bool,
    pub wait_for_queues_to_empty_before_exit: bool,
    /// `None` means "no affinity pinning", the undefined-sentinel default.
    pub cpu_affinity: Option<usize>,
    pub rdtsc_resync_interval: Duration,
}

impl BackendConfig {
    /// Validates and returns a config built from explicit values, panicking
    /// on shapes that can never work.
    ///
    /// # Panics
    ///
    /// Panics if `transit_events_soft_limit > transit_events_hard_limit`.
    pub fn new(
        thread_name: impl Into<String>,
        sleep_duration: Duration,
        transit_events_soft_limit: usize,
        transit_events_hard_limit: usize,
    ) -> Self {
        assert!(
            transit_events_soft_limit <= transit_events_hard_limit,
            "transit_events_soft_limit must not exceed transit_events_hard_limit"
        );
        Self {
            thread_name: thread_name.into(),
            sleep_duration,
            transit_events_soft_limit,
            transit_events_hard_limit,
            ..Self::default()
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            thread_name: "RinglogBackend".to_string(),
            enable_yield_when_idle: false,
            sleep_duration: Duration::from_nanos(500),
            transit_event_buffer_initial_capacity: 64,
            transit_events_soft_limit: 800,
            transit_events_hard_limit: 100_000,
            enable_strict_log_timestamp_order: true,
            wait_for_queues_to_empty_before_exit: true,
            cpu_affinity: None,
            rdtsc_resync_interval: Duration::from_millis(500),
        }
    }
}

/// Receives diagnostics the backend cannot otherwise surface, since it has
/// no caller to return a `Result` to.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Default notifier: writes to stderr, matching Quill's default
/// `fprintf(stderr, ...)` callback.
#[derive(Debug, Default)]
pub struct StderrNotifier;

impl ErrorNotifier for StderrNotifier {
    fn notify(&self, message: &str) {
        eprintln!("ringlog: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_soft_limit_above_hard_limit() {
        let result = std::panic::catch_unwind(|| BackendConfig::new("t", Duration::from_millis(1), 10, 5));
        assert!(result.is_err());
    }

    #[test]
    fn default_has_soft_below_hard() {
        let config = BackendConfig::default();
        assert!(config.transit_events_soft_limit <= config.transit_events_hard_limit);
    }
}
