//! L1 Store - RAM-based Hot Tier
//!
//! Key to entry map for promoted responses. The map lock guards inserts
//! only; a hit clones the entry handle, drops the lock, and then reads
//! through the entry's own counter.
//!
//! There is no eviction: every promoted key stays until shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::entry::{CacheKey, L1Entry, LockableEntry};

/// L1 store - in-memory hot tier
#[derive(Default)]
pub struct L1Store {
    entries: RwLock<HashMap<CacheKey, Arc<L1Entry>>>,
}

impl L1Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry
    pub fn get(&self, key: &CacheKey) -> Option<Arc<L1Entry>> {
        self.entries.read().get(key).cloned()
    }

    /// Insert an entry. Called by promotion only.
    pub fn put(&self, key: CacheKey, entry: Arc<L1Entry>) {
        self.entries.write().insert(key, entry);
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

    /// Total payload bytes held
    pub fn size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_entry(data: &'static [u8], hits: u64) -> Arc<L1Entry> {
        Arc::new(L1Entry::new(Bytes::from_static(data), hits))
    }

    #[test]
    fn test_l1_store_creation() {
        let store = L1Store::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_l1_store_put_get() {
        let store = L1Store::new();
        let key = CacheKey::new("/hot");
        store.put(key.clone(), make_entry(b"payload", 11));

        let entry = store.get(&key).unwrap();
        assert_eq!(entry.read().unwrap().payload.as_ref(), b"payload");
        assert_eq!(store.hit_count(&key), Some(12));
        assert!(store.contains(&key));
        assert_eq!(store.size(), 7);
    }

    #[test]
    fn test_l1_store_miss() {
        let store = L1Store::new();
        assert!(store.get(&CacheKey::new("/missing")).is_none());
        assert_eq!(store.hit_count(&CacheKey::new("/missing")), None);
    }

    #[test]
    fn test_l1_read_does_not_hold_map_lock() {
        let store = Arc::new(L1Store::new());
        let key = CacheKey::new("/k");
        store.put(key.clone(), make_entry(b"v", 0));

        let entry = store.get(&key).unwrap();
        // Inserting while a reader holds an entry handle must not block.
        store.put(CacheKey::new("/other"), make_entry(b"w", 0));
        entry.read().unwrap();
        assert_eq!(store.len(), 2);
    }
}
