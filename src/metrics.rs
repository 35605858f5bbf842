//! Counters/gauges/histograms via the `metrics` facade: a handle struct
//! of `noop()`-initialized recorders tracking checkpoint outcomes,
//! storage writes, validations, circuit trips, browser-pool
//! utilization, and memory usage.

use metrics::{Counter, Gauge, Histogram};
use std::time::Duration;

pub struct Metrics {
    pub checkpoints_captured: Counter,
    pub checkpoints_failed: Counter,
    pub capture_duration: Histogram,
    pub storage_writes: Counter,
    pub storage_write_errors: Counter,
    pub validations_passed: Counter,
    pub validations_failed: Counter,
    pub circuit_breaker_trips: Counter,
    pub browser_pool_utilization: Gauge,
    pub memory_usage: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            checkpoints_captured: Counter::noop(),
            checkpoints_failed: Counter::noop(),
            capture_duration: Histogram::noop(),
            storage_writes: Counter::noop(),
            storage_write_errors: Counter::noop(),
            validations_passed: Counter::noop(),
            validations_failed: Counter::noop(),
            circuit_breaker_trips: Counter::noop(),
            browser_pool_utilization: Gauge::noop(),
            memory_usage: Gauge::noop(),
        }
    }

    pub fn record_checkpoint(&self, duration: Duration, passed: bool) {
        if passed {
            self.checkpoints_captured.increment(1);
        } else {
            self.checkpoints_failed.increment(1);
        }
        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_storage_write(&self, success: bool) {
        if success {
            self.storage_writes.increment(1);
        } else {
            self.storage_write_errors.increment(1);
        }
    }

    pub fn record_validation(&self, passed: bool) {
        if passed {
            self.validations_passed.increment(1);
        } else {
            self.validations_failed.increment(1);
        }
    }

    pub fn record_circuit_trip(&self) {
        self.circuit_breaker_trips.increment(1);
    }

    pub fn record_browser_usage(&self, busy_instances: usize, total_instances: usize) {
        let utilization = if total_instances > 0 {
            (busy_instances as f64 / total_instances as f64) * 100.0
        } else {
            0.0
        };
        self.browser_pool_utilization.set(utilization);
    }

    pub fn record_memory_usage(&self, bytes: u64) {
        self.memory_usage.set(bytes as f64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_default_constructs_noop_recorders() {
        let metrics = Metrics::default();
        metrics.record_checkpoint(Duration::from_millis(5), true);
        metrics.record_storage_write(false);
        metrics.record_validation(true);
        metrics.record_circuit_trip();
        metrics.record_browser_usage(1, 2);
        metrics.record_memory_usage(1024);
    }
}
