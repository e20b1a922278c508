//! Health Checks
//!
//! Liveness/readiness reporting. The proxy stays operational when L2 writes
//! fail; it just stops caching, which is reported as degraded.

use serde::{Deserialize, Serialize};

use crate::cache::MetricsSnapshot;

/// Consecutive failed L2 writes before the cache is reported degraded
pub const DEGRADED_WRITE_FAILURE_STREAK: u64 = 3;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Serving, but the warm tier is not accepting writes
    Degraded,
}

impl HealthStatus {
    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Health report served on the admin endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Why the status is not healthy
    pub message: Option<String>,
    /// Resident L1 entries
    pub l1_entries: u64,
    /// Resident L2 entries
    pub l2_entries: u64,
    /// Consecutive failed L2 writes
    pub write_failure_streak: u64,
}

impl HealthReport {
    /// Derive a report from a metrics snapshot
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let streak = snapshot.consecutive_write_failures;
        let (status, message) = if streak >= DEGRADED_WRITE_FAILURE_STREAK {
            (
                HealthStatus::Degraded,
                Some(format!(
                    "{} consecutive L2 writes failed; serving proxy-only",
                    streak
                )),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        Self {
            status,
            message,
            l1_entries: snapshot.l1_entries,
            l2_entries: snapshot.l2_entries,
            write_failure_streak: streak,
        }
    }
}
