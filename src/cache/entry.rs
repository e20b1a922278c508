//! Cache Entry Types
//!
//! Keys, per-tier entries, and the [`LockableEntry`] capability both tiers
//! implement. Each tier picks its own locking scope:
//!
//! - L1: immutable payload shared without a lock, atomic hit counter
//! - L2: one mutex covering the storage read and the counter increment

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Cache key - the request's path and query, verbatim
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from a path-and-query string.
    ///
    /// No case folding and no query reordering: `/a?x=1&y=2` and
    /// `/a?y=2&x=1` are different keys. An empty string maps to `/`.
    pub fn new(path_and_query: impl Into<String>) -> Self {
        let raw = path_and_query.into();
        if raw.is_empty() {
            Self("/".to_string())
        } else {
            Self(raw)
        }
    }

    /// Key for an inbound request URI
    pub fn from_uri(uri: &hyper::Uri) -> Self {
        Self::new(uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"))
    }

    /// The canonical key string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the path-and-query string
    pub fn into_string(self) -> String {
        self.0
    }

    /// Stable hex digest used to name the key's storage object
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Result of serving one hit from an entry
#[derive(Debug, Clone)]
pub struct EntryRead {
    /// Response body bytes
    pub payload: Bytes,
    /// Hit count after this read was recorded
    pub hits: u64,
}

/// An entry that can serve a hit under its own locking discipline
pub trait LockableEntry: Send + Sync {
    /// Return the payload and record one hit
    fn read(&self) -> Result<EntryRead>;

    /// Current hit count
    fn hit_count(&self) -> u64;
}

// =============================================================================
// L1 Entry
// =============================================================================

/// Hot entry - payload held in memory for the life of the process
pub struct L1Entry {
    payload: Bytes,
    hits: AtomicU64,
}

impl L1Entry {
    /// Create an entry carrying a hit count forward from another tier
    pub fn new(payload: Bytes, hits: u64) -> Self {
        Self {
            payload,
            hits: AtomicU64::new(hits),
        }
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl LockableEntry for L1Entry {
    #[inline]
    fn read(&self) -> Result<EntryRead> {
        // Payload is immutable; only the counter needs exclusion.
        let hits = self.hits.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(EntryRead {
            payload: self.payload.clone(),
            hits,
        })
    }

    #[inline]
    fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }
}

impl fmt::Debug for L1Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L1Entry")
            .field("size", &self.size())
            .field("hits", &self.hit_count())
            .finish()
    }
}

// =============================================================================
// L2 Entry
// =============================================================================

/// Where an L2 entry stands relative to its tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Serving from storage
    Resident,
    /// Moved to L1; readers must go there instead
    Promoted,
    /// Storage object lost; the key must be fetched again
    Invalidated,
}

#[derive(Debug)]
struct L2Slot {
    hits: u64,
    residency: Residency,
}

/// Warm entry - payload lives in a storage object and is re-read on every hit
pub struct L2Entry {
    key: CacheKey,
    path: PathBuf,
    size: u64,
    slot: Mutex<L2Slot>,
}

impl L2Entry {
    /// Register an entry for an already-persisted storage object
    pub fn new(key: CacheKey, path: PathBuf, size: u64) -> Self {
        Self {
            key,
            path,
            size,
            slot: Mutex::new(L2Slot {
                hits: 0,
                residency: Residency::Resident,
            }),
        }
    }

    /// Key this entry caches
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Backing storage object
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload size recorded at store time
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current residency
    pub fn residency(&self) -> Residency {
        self.slot.lock().residency
    }

    /// Take a resident entry out of service. False if it already left.
    pub fn retire(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.residency != Residency::Resident {
            return false;
        }
        slot.residency = Residency::Invalidated;
        true
    }

    /// Serve one hit and run `on_hit` before the entry guard is released.
    ///
    /// `on_hit` returns true when it moved the entry into L1; the entry is
    /// then marked promoted so queued readers go to L1 instead of storage.
    pub fn read_then<F>(&self, on_hit: F) -> Result<EntryRead>
    where
        F: FnOnce(&EntryRead) -> bool,
    {
        let mut slot = self.slot.lock();
        if slot.residency != Residency::Resident {
            return Err(Error::EntryRetired {
                key: self.key.to_string(),
            });
        }

        let payload = match std::fs::read(&self.path) {
            Ok(bytes) => Bytes::from(bytes),
            Err(source) => {
                slot.residency = Residency::Invalidated;
                return Err(Error::StorageRead {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        slot.hits += 1;
        let read = EntryRead {
            payload,
            hits: slot.hits,
        };

        if on_hit(&read) {
            slot.residency = Residency::Promoted;
        }
        Ok(read)
    }
}

impl LockableEntry for L2Entry {
    fn read(&self) -> Result<EntryRead> {
        self.read_then(|_| false)
    }

    fn hit_count(&self) -> u64 {
        self.slot.lock().hits
    }
}

impl fmt::Debug for L2Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("L2Entry")
            .field("key", &self.key.as_str())
            .field("path", &self.path)
            .field("hits", &slot.hits)
            .field("residency", &slot.residency)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
