//! Observability
//!
//! Prometheus exposition and health reporting for the cache tiers. Both
//! read from [`crate::cache::MetricsSnapshot`]; neither touches the
//! request path.

mod exporter;
mod health;

pub use exporter::render_prometheus;
pub use health::{HealthReport, HealthStatus, DEGRADED_WRITE_FAILURE_STREAK};
