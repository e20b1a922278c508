//! Cache Metrics Collection
//!
//! Lock-free counters for every lookup outcome, plus smoothed latencies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookup outcomes
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,

    // Tier movement
    promotions: AtomicU64,

    // Failures
    storage_read_failures: AtomicU64,
    storage_write_failures: AtomicU64,
    consecutive_write_failures: AtomicU64,
    origin_failures: AtomicU64,

    // Residency gauges
    l1_entries: AtomicU64,
    l2_entries: AtomicU64,

    // Operation latencies (microseconds, exponential moving average)
    l1_read_latency_us: AtomicU64,
    l2_read_latency_us: AtomicU64,
    origin_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_read_failure(&self) {
        self.storage_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_write_failure(&self) {
        self.storage_write_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_write_success(&self) {
        self.consecutive_write_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_origin_failure(&self) {
        self.origin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_entries(&self, l1: u64, l2: u64) {
        self.l1_entries.store(l1, Ordering::Relaxed);
        self.l2_entries.store(l2, Ordering::Relaxed);
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn storage_write_failures(&self) -> u64 {
        self.storage_write_failures.load(Ordering::Relaxed)
    }

    /// Share of cacheable lookups answered by either tier
    pub fn hit_ratio(&self) -> f64 {
        let hits = (self.l1_hits() + self.l2_hits()) as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    // Latency tracking
    pub fn record_l1_read_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.l1_read_latency_us, duration);
    }

    pub fn record_l2_read_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.l2_read_latency_us, duration);
    }

    pub fn record_origin_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.origin_latency_us, duration);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    fn latency(target: &AtomicU64) -> Duration {
        Duration::from_micros(target.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1_hits: self.l1_hits(),
            l2_hits: self.l2_hits(),
            misses: self.misses(),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            promotions: self.promotions(),
            storage_read_failures: self.storage_read_failures.load(Ordering::Relaxed),
            storage_write_failures: self.storage_write_failures(),
            consecutive_write_failures: self.consecutive_write_failures.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            l1_entries: self.l1_entries.load(Ordering::Relaxed),
            l2_entries: self.l2_entries.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            l1_read_latency: Self::latency(&self.l1_read_latency_us),
            l2_read_latency: Self::latency(&self.l2_read_latency_us),
            origin_latency: Self::latency(&self.origin_latency_us),
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub promotions: u64,
    pub storage_read_failures: u64,
    pub storage_write_failures: u64,
    pub consecutive_write_failures: u64,
    pub origin_failures: u64,
    pub l1_entries: u64,
    pub l2_entries: u64,
    pub hit_ratio: f64,
    pub l1_read_latency: Duration,
    pub l2_read_latency: Duration,
    pub origin_latency: Duration,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.l1_hits(), 0);
        assert_eq!(metrics.l2_hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_l2_hit();
        metrics.record_miss();
        metrics.record_bypass();

        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_l2_read_latency(Duration::from_micros(100));
        assert_eq!(metrics.snapshot().l2_read_latency, Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_l2_read_latency(Duration::from_micros(200));
        let latency = metrics.snapshot().l2_read_latency.as_micros();
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_promotion();
        metrics.record_storage_read_failure();
        metrics.record_storage_write_failure();
        metrics.record_origin_failure();
        metrics.update_entries(3, 7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.promotions, 1);
        assert_eq!(snapshot.storage_read_failures, 1);
        assert_eq!(snapshot.storage_write_failures, 1);
        assert_eq!(snapshot.consecutive_write_failures, 1);
        assert_eq!(snapshot.origin_failures, 1);
        assert_eq!(snapshot.l1_entries, 3);
        assert_eq!(snapshot.l2_entries, 7);
    }

    #[test]
    fn test_write_success_resets_failure_streak() {
        let metrics = CacheMetrics::new();
        metrics.record_storage_write_failure();
        metrics.record_storage_write_failure();
        metrics.record_storage_write_success();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.storage_write_failures, 2);
        assert_eq!(snapshot.consecutive_write_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["l1_hits"], 1);
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
