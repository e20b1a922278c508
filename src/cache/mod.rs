//! Two-Tiered Response Cache
//!
//! Hot responses in RAM (L1), warm responses on local disk (L2).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Tier Controller                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  L1 Store (RAM)             │  L2 Store (Disk)                       │
//! │  ┌───────────────────────┐  │  ┌──────────────────────────────────┐  │
//! │  │ key -> Arc<L1Entry>   │  │  │ key -> Arc<L2Entry>              │  │
//! │  │ atomic hit counter    │  │  │ one object per key, re-read on   │  │
//! │  │ no eviction           │  │  │ every hit under the entry mutex  │  │
//! │  └───────────────────────┘  │  └──────────────────────────────────┘  │
//! │              ▲              │                 │                      │
//! │              └──── promotion after T hits ────┘                      │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                 │ miss
//!                         Origin Forwarder
//! ```
//!
//! # Design Principles
//!
//! - Store locks cover map inserts/removals only, never I/O
//! - Per-entry guards cover hit accounting (and the storage read for L2)
//! - Promotion is exactly-once and inserts into L1 before leaving L2
//! - Storage failures degrade to origin fetches, never to request errors

mod entry;
mod l1;
mod l2;
mod manager;
mod metrics;

pub use entry::{CacheKey, EntryRead, L1Entry, L2Entry, LockableEntry, Residency};
pub use l1::L1Store;
pub use l2::{L2Config, L2Hit, L2Store};
pub use manager::{CacheConfig, CacheStatus, CacheTier, CachedHit, Served, TierController, TierState};
pub use metrics::{CacheMetrics, MetricsSnapshot};

/// Default promotion threshold: an entry moves to L1 on its 11th L2 hit
pub const DEFAULT_PROMOTION_THRESHOLD: u64 = 10;

/// Default directory for L2 storage objects
pub const DEFAULT_L2_DIR: &str = "/var/cache/tierproxy/l2";

// =============================================================================
// Tests
// =============================================================================
