//!
//! In-memory table of the keys currently under active publication.
//!
//! Shared between the naming facade (writes on publish) and the republisher
//! (reads and refreshes on every cycle); all access goes through one lock.
//!

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// The minimal state needed to republish a record later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Logical name of the signing key in the remote keystore.
    pub key_id: String,
    /// Content reference the record resolves to. Opaque, passed through unmodified.
    pub content: String,
    /// Expiry of the most recently published record for this key.
    pub last_expiry: SystemTime,
}

/// Table of currently published keys. One entry per `key_id`; re-inserting
/// the same key overwrites, never duplicates. Entries are never evicted,
/// only explicitly removed or lost on process exit.
#[derive(Debug, Clone, Default)]
pub struct RecordCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an entry for `key_id`, refreshing its expiry to now.
    pub fn set(&self, key_id: &str, content: &str) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            key_id.to_string(),
            CacheEntry {
                key_id: key_id.to_string(),
                content: content.to_string(),
                last_expiry: SystemTime::now(),
            },
        );
    }

    /// Point-in-time snapshot of all entries. Order is not significant.
    pub fn list(&self) -> Vec<CacheEntry> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.values().cloned().collect()
    }

    pub fn has(&self, key_id: &str) -> bool {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.contains_key(key_id)
    }

    /// Advance the expiry of a managed entry. Unknown keys are ignored.
    pub fn refresh_expiry(&self, key_id: &str, eol: SystemTime) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if let Some(entry) = entries.get_mut(key_id) {
            entry.last_expiry = eol;
        }
    }

    /// Stop managing a key. Returns whether an entry was removed.
    pub fn remove(&self, key_id: &str) -> bool {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(key_id).is_some()
    }

    /// Number of keys under active publication.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use crate::cache::RecordCache;

    #[test]
    fn set_with_same_key_overwrites() {
        let cache = RecordCache::new();
        cache.set("key-a", "/content/x");
        cache.set("key-a", "/content/y");

        assert_eq!(cache.len(), 1);
        let entries = cache.list();
        assert_eq!(entries[0].key_id, "key-a");
        assert_eq!(entries[0].content, "/content/y");
    }

    #[test]
    fn distinct_keys_accumulate() {
        let cache = RecordCache::new();
        cache.set("key-a", "/content/x");
        cache.set("key-b", "/content/y");

        assert_eq!(cache.len(), 2);
        assert!(cache.has("key-a"));
        assert!(cache.has("key-b"));
        assert!(!cache.has("key-c"));
    }

    #[test]
    fn refresh_expiry_advances_only_known_keys() {
        let cache = RecordCache::new();
        cache.set("key-a", "/content/x");
        let before = cache.list()[0].last_expiry;

        let eol = SystemTime::now() + Duration::from_secs(24 * 60 * 60);
        cache.refresh_expiry("key-a", eol);
        cache.refresh_expiry("key-b", eol);

        let entries = cache.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_expiry, eol);
        assert!(entries[0].last_expiry > before);
    }

    #[test]
    fn remove_returns_whether_an_entry_existed() {
        let cache = RecordCache::new();
        cache.set("key-a", "/content/x");

        assert!(cache.remove("key-a"));
        assert!(!cache.remove("key-a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn list_is_safe_concurrently_with_set() {
        let cache = RecordCache::new();
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    cache.set(&format!("key-{i}"), "/content/x");
                }
            })
        };
        for _ in 0..100 {
            let _ = cache.list();
        }
        writer.join().unwrap();
        assert_eq!(cache.len(), 100);
    }
}
