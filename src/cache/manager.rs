//! Tier Controller - Unified Two-Tier Cache
//!
//! Orchestrates L1 (RAM) and L2 (disk) lookups, hit counting, promotion,
//! and the origin fetch on a miss.
//!
//! Per-key states:
//!
//! ```text
//!   Absent ──miss + 200 OK──▶ L2Resident ──hit T→T+1──▶ L1Resident
//!     ▲                         │   ▲                     │   ▲
//!     └──storage read failure───┘   └──hit below T        └───┘ every hit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{self, HeaderMap};
use hyper::{Method, StatusCode};
use tracing::{debug, warn};

use super::entry::{CacheKey, LockableEntry};
use super::l1::L1Store;
use super::l2::{L2Config, L2Store};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use crate::error::{Error, Result};
use crate::proxy::origin::{OriginForwarder, OriginRequest, OriginResponse};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// L1 - RAM (hot)
    L1,
    /// L2 - Disk (warm)
    L2,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (RAM)"),
            CacheTier::L2 => write!(f, "L2 (Disk)"),
        }
    }
}

/// Where a key currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierState {
    /// Not cached
    Absent,
    /// Cached on disk
    L2Resident,
    /// Cached in memory
    L1Resident,
}

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from L1
    L1Hit,
    /// Served from L2
    L2Hit,
    /// Fetched from the origin
    Miss,
    /// Not cacheable, passed straight to the origin
    Bypass,
}

impl CacheStatus {
    /// Value for the `X-Cache` response header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::L1Hit => "L1-HIT",
            CacheStatus::L2Hit => "L2-HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// L2 configuration (storage directory and promotion threshold)
    pub l2: L2Config,
}

impl CacheConfig {
    /// Configuration with an explicit storage directory and threshold
    pub fn new(cache_dir: impl Into<PathBuf>, promotion_threshold: u64) -> Self {
        Self {
            l2: L2Config {
                cache_dir: cache_dir.into(),
                promotion_threshold,
            },
        }
    }

    /// Promotion threshold T
    pub fn promotion_threshold(&self) -> u64 {
        self.l2.promotion_threshold
    }
}

/// A hit served from one of the tiers
#[derive(Debug, Clone)]
pub struct CachedHit {
    /// Tier that answered
    pub tier: CacheTier,
    /// Cached body
    pub payload: Bytes,
    /// Key's hit count after this hit
    pub hits: u64,
    /// True when this hit moved the key from L2 to L1
    pub promoted: bool,
}

/// A fully answered request
#[derive(Debug, Clone)]
pub struct Served {
    /// How the request was answered
    pub cache: CacheStatus,
    /// Response to write back
    pub response: OriginResponse,
}

impl From<CachedHit> for Served {
    fn from(hit: CachedHit) -> Self {
        let cache = match hit.tier {
            CacheTier::L1 => CacheStatus::L1Hit,
            CacheTier::L2 => CacheStatus::L2Hit,
        };
        Self {
            cache,
            response: OriginResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: hit.payload,
            },
        }
    }
}

/// Unified tier controller
pub struct TierController {
    /// L1 (RAM) store
    l1: L1Store,
    /// L2 (disk) store
    l2: L2Store,
    /// Upstream collaborator for misses
    origin: Arc<dyn OriginForwarder>,
    /// Configuration
    config: CacheConfig,
    /// Metrics collector
    metrics: Arc<CacheMetrics>,
}

impl TierController {
    /// Create a controller, opening the L2 storage directory
    pub fn new(config: CacheConfig, origin: Arc<dyn OriginForwarder>) -> Result<Self> {
        Ok(Self {
            l1: L1Store::new(),
            l2: L2Store::open(config.l2.clone())?,
            origin,
            config,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    /// Answer a request from the cache or the origin.
    ///
    /// Only `GET` goes through the cache. Only `200 OK` origin responses
    /// are stored, since storage keeps the body without status or headers.
    pub async fn lookup(&self, mut request: OriginRequest) -> Result<Served> {
        if request.method != Method::GET {
            self.metrics.record_bypass();
            let response = self.fetch(request).await?;
            return Ok(Served {
                cache: CacheStatus::Bypass,
                response,
            });
        }

        let key = CacheKey::new(request.path_and_query.as_str());
        if let Some(hit) = self.probe(&key) {
            return Ok(hit.into());
        }

        self.metrics.record_miss();
        debug!("Cache miss for {}, fetching from origin", key);

        // Hits are served without headers, so only identity bodies are kept.
        request.headers.remove(header::ACCEPT_ENCODING);

        let response = self.fetch(request).await?;
        if is_storable(&response) {
            self.admit(key, &response.body);
        } else if response.status == StatusCode::OK {
            debug!("Not caching {}: encoded response body", key);
        }

        Ok(Served {
            cache: CacheStatus::Miss,
            response,
        })
    }

    /// Cache-only lookup: L1, then L2 (with promotion). `None` is a miss.
    pub fn probe(&self, key: &CacheKey) -> Option<CachedHit> {
        if let Some(hit) = self.read_l1(key) {
            return Some(hit);
        }

        let tracker = LatencyTracker::start();
        match self.l2.read(key, &self.l1) {
            Ok(Some(hit)) => {
                self.metrics.record_l2_hit();
                self.metrics.record_l2_read_latency(tracker.elapsed());
                if hit.promoted {
                    self.metrics.record_promotion();
                    self.update_entries();
                }
                debug!("L2 hit for {} ({} hits)", key, hit.read.hits);
                Some(CachedHit {
                    tier: CacheTier::L2,
                    payload: hit.read.payload,
                    hits: hit.read.hits,
                    promoted: hit.promoted,
                })
            }
            // L1 is filled before L2 drops a promoted key, so a key that
            // vanished from L2 since the L1 check may be in L1 now.
            Ok(None) | Err(Error::EntryRetired { .. }) => self.read_l1(key),
            Err(err) => {
                self.metrics.record_storage_read_failure();
                self.update_entries();
                warn!("L2 read for {} failed, falling back to origin: {}", key, err);
                None
            }
        }
    }

    fn read_l1(&self, key: &CacheKey) -> Option<CachedHit> {
        let tracker = LatencyTracker::start();
        let entry = self.l1.get(key)?;
        let read = entry.read().ok()?;
        self.metrics.record_l1_hit();
        self.metrics.record_l1_read_latency(tracker.elapsed());
        debug!("L1 hit for {} ({} hits)", key, read.hits);
        Some(CachedHit {
            tier: CacheTier::L1,
            payload: read.payload,
            hits: read.hits,
            promoted: false,
        })
    }

    /// Store a fetched body in L2. Best effort: a failed write is logged
    /// and counted, and the caller still serves the response.
    pub fn admit(&self, key: CacheKey, payload: &[u8]) -> bool {
        let stored = match self.l2.put(key.clone(), payload, &self.l1) {
            Ok(Some(_)) => {
                self.metrics.record_storage_write_success();
                debug!("Stored {} in L2 ({} bytes)", key, payload.len());
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.metrics.record_storage_write_failure();
                warn!("Caching {} failed, serving uncached: {}", key, err);
                false
            }
        };
        self.update_entries();
        stored
    }

    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse> {
        let tracker = LatencyTracker::start();
        match self.origin.forward(request).await {
            Ok(response) => {
                self.metrics.record_origin_latency(tracker.elapsed());
                Ok(response)
            }
            Err(err) => {
                self.metrics.record_origin_failure();
                Err(err)
            }
        }
    }

    /// Current state of a key
    pub fn state(&self, key: &CacheKey) -> TierState {
        if self.l1.contains(key) {
            TierState::L1Resident
        } else if self.l2.contains(key) {
            TierState::L2Resident
        } else {
            TierState::Absent
        }
    }

    /// Hit count of a cached key
    pub fn hit_count(&self, key: &CacheKey) -> Option<u64> {
        self.l1.hit_count(key).or_else(|| self.l2.hit_count(key))
    }

    fn update_entries(&self) {
        self.metrics
            .update_entries(self.l1.len() as u64, self.l2.len() as u64);
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.update_entries();
        self.metrics.snapshot()
    }

    /// Get reference to L1 store
    pub fn l1(&self) -> &L1Store {
        &self.l1
    }

    /// Get reference to L2 store
    pub fn l2(&self) -> &L2Store {
        &self.l2
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// A response can be cached when it is a 200 with an identity body
fn is_storable(response: &OriginResponse) -> bool {
    response.status == StatusCode::OK
        && response
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |v| v.trim().eq_ignore_ascii_case("identity"))
}

// =============================================================================
// Tests
// =============================================================================
