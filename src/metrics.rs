//! Run counters for the control loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

/// Atomic counters covering one controller run. Shared between the loop and
/// the periodic summary task in the binary.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub cycles: AtomicU64,
    pub samples: AtomicU64,
    pub transitions_to_blocked: AtomicU64,
    pub transitions_to_allowed: AtomicU64,
    pub counter_read_errors: AtomicU64,
    pub rule_mutation_failures: AtomicU64,
    pub start_time_ms: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let metrics = Self::default();
        metrics.start_time_ms.store(now, Ordering::Relaxed);
        metrics
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_to_blocked(&self) {
        self.transitions_to_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_to_allowed(&self) {
        self.transitions_to_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_counter_read_error(&self) {
        self.counter_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_mutation_failure(&self) {
        self.rule_mutation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let uptime_secs = now.saturating_sub(self.start_time_ms.load(Ordering::Relaxed)) / 1000;

        info!(
            cycles = self.cycles.load(Ordering::Relaxed),
            samples = self.samples.load(Ordering::Relaxed),
            transitions_to_blocked = self.transitions_to_blocked.load(Ordering::Relaxed),
            transitions_to_allowed = self.transitions_to_allowed.load(Ordering::Relaxed),
            counter_read_errors = self.counter_read_errors.load(Ordering::Relaxed),
            rule_mutation_failures = self.rule_mutation_failures.load(Ordering::Relaxed),
            uptime_secs,
            "controller metrics"
        );
    }
}
