//! Prometheus Exposition
//!
//! Renders a cache metrics snapshot in the Prometheus text format.

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::cache::MetricsSnapshot;
use crate::error::{Error, Result};

/// Metric name prefix
const NAMESPACE: &str = "tierproxy";

/// Render `snapshot` as Prometheus text exposition
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> Result<String> {
    let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

    let lookups = IntCounterVec::new(
        Opts::new("cache_lookups_total", "Cacheable lookups by outcome"),
        &["outcome"],
    )?;
    lookups.with_label_values(&["l1_hit"]).inc_by(snapshot.l1_hits);
    lookups.with_label_values(&["l2_hit"]).inc_by(snapshot.l2_hits);
    lookups.with_label_values(&["miss"]).inc_by(snapshot.misses);
    registry.register(Box::new(lookups))?;

    let bypasses = IntCounter::new("cache_bypass_total", "Requests passed through uncached")?;
    bypasses.inc_by(snapshot.bypasses);
    registry.register(Box::new(bypasses))?;

    let promotions = IntCounter::new("cache_promotions_total", "Entries promoted from L2 to L1")?;
    promotions.inc_by(snapshot.promotions);
    registry.register(Box::new(promotions))?;

    let failures = IntCounterVec::new(
        Opts::new("failures_total", "Absorbed or propagated failures by kind"),
        &["kind"],
    )?;
    failures
        .with_label_values(&["storage_read"])
        .inc_by(snapshot.storage_read_failures);
    failures
        .with_label_values(&["storage_write"])
        .inc_by(snapshot.storage_write_failures);
    failures
        .with_label_values(&["origin"])
        .inc_by(snapshot.origin_failures);
    registry.register(Box::new(failures))?;

    let entries = IntGaugeVec::new(
        Opts::new("cache_entries", "Resident entries per tier"),
        &["tier"],
    )?;
    entries.with_label_values(&["l1"]).set(snapshot.l1_entries as i64);
    entries.with_label_values(&["l2"]).set(snapshot.l2_entries as i64);
    registry.register(Box::new(entries))?;

    let streak = IntGauge::new(
        "storage_write_failure_streak",
        "Consecutive failed L2 writes",
    )?;
    streak.set(snapshot.consecutive_write_failures as i64);
    registry.register(Box::new(streak))?;

    let hit_ratio = Gauge::new("cache_hit_ratio", "Share of cacheable lookups served from cache")?;
    hit_ratio.set(snapshot.hit_ratio);
    registry.register(Box::new(hit_ratio))?;

    let latency = GaugeVec::new(
        Opts::new("latency_seconds", "Smoothed operation latency"),
        &["operation"],
    )?;
    latency
        .with_label_values(&["l1_read"])
        .set(snapshot.l1_read_latency.as_secs_f64());
    latency
        .with_label_values(&["l2_read"])
        .set(snapshot.l2_read_latency.as_secs_f64());
    latency
        .with_label_values(&["origin"])
        .set(snapshot.origin_latency.as_secs_f64());
    registry.register(Box::new(latency))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Non-UTF-8 exposition: {}", e)))
}
