//! Statistics tracking for the proxy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters, reset on every snapshot.
pub struct Stats {
    pub requests: AtomicU64,
    pub routed: AtomicU64,
    pub passed: AtomicU64,
    pub failed: AtomicU64,
    pub routes_installed: AtomicU64,
    pub route_failures: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            routed: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            routes_installed: AtomicU64::new(0),
            route_failures: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_routed(&self, response_time_ms: f64, installed: u64, failures: u64) {
        self.record_request(response_time_ms);
        self.routed.fetch_add(1, Ordering::Relaxed);
        self.routes_installed.fetch_add(installed, Ordering::Relaxed);
        self.route_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_passed(&self, response_time_ms: f64) {
        self.record_request(response_time_ms);
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, response_time_ms: f64) {
        self.record_request(response_time_ms);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_request(&self, response_time_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            routed: self.routed.swap(0, Ordering::Relaxed),
            passed: self.passed.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            routes_installed: self.routes_installed.swap(0, Ordering::Relaxed),
            route_failures: self.route_failures.swap(0, Ordering::Relaxed),
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub routed: u64,
    pub passed: u64,
    pub failed: u64,
    pub routes_installed: u64,
    pub route_failures: u64,
    pub avg_response_ms: f64,
}
