//! L2 Store - Disk-backed Warm Tier
//!
//! Every entry owns one storage object under the cache directory, named by
//! the SHA-256 of its key. Payloads are never kept in memory; each hit
//! re-reads the object under the entry's guard.
//!
//! # Locking
//!
//! - The map lock guards inserts and removals only. It is never held for
//!   file I/O and never taken before an entry guard.
//! - A hit holds the entry guard across the storage read, the counter
//!   increment, and (for the promoting hit) the L1 insert.
//!
//! # Promotion
//!
//! The hit that moves an entry's count from `threshold` to `threshold + 1`
//! copies the payload into L1, then drops the L2 mapping and deletes the
//! storage object. L1 is written first so a concurrent reader always finds
//! the key in one of the tiers.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{CacheKey, EntryRead, L1Entry, L2Entry, LockableEntry};
use super::l1::L1Store;
use super::{DEFAULT_L2_DIR, DEFAULT_PROMOTION_THRESHOLD};
use crate::error::{Error, Result};

/// Suffix of a committed storage object
const OBJECT_SUFFIX: &str = ".bin";

/// Marker inside in-flight temp object names
const TEMP_MARKER: &str = ".tmp-";

/// L2 store configuration
#[derive(Debug, Clone)]
pub struct L2Config {
    /// Directory holding storage objects
    pub cache_dir: PathBuf,
    /// Hits an entry must exceed while in L2 before it moves to L1
    pub promotion_threshold: u64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_L2_DIR),
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
        }
    }
}

/// A successful L2 hit
#[derive(Debug, Clone)]
pub struct L2Hit {
    /// Payload and post-hit count
    pub read: EntryRead,
    /// True when this hit moved the entry into L1
    pub promoted: bool,
}

/// L2 store - disk-backed warm tier
pub struct L2Store {
    entries: RwLock<HashMap<CacheKey, Arc<L2Entry>>>,
    config: L2Config,
}

impl L2Store {
    /// Open the store, creating the cache directory and clearing objects
    /// left behind by an earlier process.
    pub fn open(config: L2Config) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;

        let mut stale = 0usize;
        for dirent in fs::read_dir(&config.cache_dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            if is_storage_object(&name.to_string_lossy()) && dirent.file_type()?.is_file() {
                fs::remove_file(dirent.path())?;
                stale += 1;
            }
        }
        if stale > 0 {
            info!(
                "Removed {} stale storage objects from {}",
                stale,
                config.cache_dir.display()
            );
        }

        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Storage object path for a key
    pub fn object_path(&self, key: &CacheKey) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}{}", key.digest(), OBJECT_SUFFIX))
    }

    /// Persist a fetched payload and register it with a zero hit count.
    ///
    /// Returns `Ok(None)` when the key is already hot in `l1`; the
    /// object is discarded in that case. A concurrent store for the same
    /// key replaces this one (last store wins).
    pub fn put(&self, key: CacheKey, payload: &[u8], l1: &L1Store) -> Result<Option<Arc<L2Entry>>> {
        let path = self.object_path(&key);
        let temp = self.config.cache_dir.join(format!(
            "{}{}{}",
            key.digest(),
            TEMP_MARKER,
            Uuid::new_v4().simple()
        ));

        write_object(&temp, &path, payload).map_err(|source| Error::StorageWrite {
            path: path.clone(),
            source,
        })?;

        let entry = Arc::new(L2Entry::new(key.clone(), path, payload.len() as u64));
        {
            let mut entries = self.entries.write();
            if !l1.contains(&key) {
                entries.insert(key, entry.clone());
                return Ok(Some(entry));
            }
        }

        debug!("{} already promoted, discarding warm copy", key);
        remove_object(entry.path());
        Ok(None)
    }

    /// Look up an entry without reading its payload
    pub fn get(&self, key: &CacheKey) -> Option<Arc<L2Entry>> {
        self.entries.read().get(key).cloned()
    }

    /// Serve one hit for `key`, promoting it into `l1` if this hit crosses
    /// the threshold.
    ///
    /// - `Ok(None)`: key not in L2
    /// - `Err(Error::EntryRetired)`: entry left L2 while this caller waited
    /// - `Err(Error::StorageRead)`: object unreadable; entry dropped from L2
    pub fn read(&self, key: &CacheKey, l1: &L1Store) -> Result<Option<L2Hit>> {
        let Some(entry) = self.get(key) else {
            return Ok(None);
        };

        let mut promoted = false;
        let result = entry.read_then(|read| {
            promoted = self.promote_if_eligible(&entry, read, l1);
            promoted
        });

        match result {
            Ok(read) => Ok(Some(L2Hit { read, promoted })),
            Err(err @ Error::StorageRead { .. }) => {
                self.detach(&entry);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Move `entry` into `l1` if `read` is the hit that crossed the
    /// threshold and the entry is still the live mapping for its key.
    ///
    /// Runs under the entry guard (see [`L2Entry::read_then`]).
    pub fn promote_if_eligible(&self, entry: &Arc<L2Entry>, read: &EntryRead, l1: &L1Store) -> bool {
        // A threshold of u64::MAX can never be crossed.
        match self.config.promotion_threshold.checked_add(1) {
            Some(crossing) if read.hits == crossing => {}
            _ => return false,
        }

        let key = entry.key();
        {
            let mut entries = self.entries.write();
            match entries.get(key) {
                Some(current) if Arc::ptr_eq(current, entry) => {}
                _ => {
                    debug!("{} was replaced before promotion, staying warm", key);
                    return false;
                }
            }
            l1.put(
                key.clone(),
                Arc::new(L1Entry::new(read.payload.clone(), read.hits)),
            );
            entries.remove(key);
        }

        remove_object(entry.path());
        info!("Promoted {} to L1 after {} hits", key, read.hits);
        true
    }

    /// Drop an invalidated entry if it is still the live mapping
    fn detach(&self, entry: &Arc<L2Entry>) -> bool {
        let detached = {
            let mut entries = self.entries.write();
            match entries.get(entry.key()) {
                Some(current) if Arc::ptr_eq(current, entry) => {
                    entries.remove(entry.key());
                    true
                }
                _ => false,
            }
        };
        if detached {
            remove_object(entry.path());
        }
        detached
    }

    /// Drop `key` from the store and delete its storage object.
    ///
    /// The entry is retired first so a reader queued on its guard re-checks
    /// L1 instead of reading a deleted object. Returns the removed entry.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<L2Entry>> {
        let entry = self.get(key)?;
        // Promoted or invalidated by a concurrent hit, or replaced by a
        // newer store.
        if !entry.retire() || !self.detach(&entry) {
            return None;
        }
        debug!("Removed {} from L2", key);
        Some(entry)
    }

    /// Check if a key is resident
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Hit count for a resident key
    pub fn hit_count(&self, key: &CacheKey) -> Option<u64> {
        self.get(key).map(|entry| entry.hit_count())
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total payload bytes on disk
    pub fn size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size()).sum()
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Get configuration
    pub fn config(&self) -> &L2Config {
        &self.config
    }
}

/// Write to a temp name, then rename into place so readers never see a
/// partial object.
fn write_object(temp: &Path, path: &Path, payload: &[u8]) -> io::Result<()> {
    fs::write(temp, payload)?;
    if let Err(err) = fs::rename(temp, path) {
        let _ = fs::remove_file(temp);
        return Err(err);
    }
    Ok(())
}

fn remove_object(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove storage object {}: {}", path.display(), err),
    }
}

fn is_storage_object(name: &str) -> bool {
    let stem = match name.split_once(TEMP_MARKER) {
        Some((stem, _)) => stem,
        None => match name.strip_suffix(OBJECT_SUFFIX) {
            Some(stem) => stem,
            None => return false,
        },
    };
    stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit())
}

// =============================================================================
// Tests
// =============================================================================
