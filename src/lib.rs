//! tierproxy - Two-Tiered Caching Reverse Proxy
//!
//! An HTTP reverse proxy in front of a single origin that keeps successful
//! `GET` responses in a warm disk tier (L2) and promotes frequently read
//! entries into a hot RAM tier (L1).
//!
//! # Architecture
//!
//! ```text
//! ProxyServer → TierController → L1 Store (RAM)
//!                              → L2 Store (disk) ──promotion──▶ L1
//!                              → OriginForwarder (on miss)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tier stores, promotion and the tier controller
//! - [`error`] - Error types
//! - [`monitoring`] - Prometheus exposition and health reporting
//! - [`proxy`] - HTTP listeners and origin forwarding

pub mod cache;
pub mod error;
pub mod monitoring;
pub mod proxy;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheKey, CacheStatus, TierController};
pub use error::{Error, Result};
pub use proxy::{HttpOriginForwarder, OriginForwarder, ProxyConfig};
