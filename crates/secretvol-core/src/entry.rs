//! Fetched secret values and their in-memory cache.
//!
//! Secret bytes live in [`Zeroizing`] buffers: they are wiped from memory
//! when dropped. The cache exists only while a volume is mounted; its owner
//! must call [`SecretCache::clear`] on every teardown path (unmount,
//! construction-failure rollback, shutdown).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use zeroize::Zeroizing;

/// Default time before a cached value is re-fetched from the backend.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(60);

/// One fetched secret value plus its logical path and fetch metadata.
pub struct SecretEntry {
    /// Logical path within the backend.
    pub path: String,
    /// The secret bytes, wiped on drop.
    pub value: Zeroizing<Vec<u8>>,
    fetched_at: Instant,
}

impl SecretEntry {
    /// Wraps freshly fetched bytes.
    pub fn new(path: impl Into<String>, value: Zeroizing<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            value,
            fetched_at: Instant::now(),
        }
    }

    /// True if the entry is older than `ttl` and should be re-fetched.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

impl std::fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never format secret bytes.
        f.debug_struct("SecretEntry")
            .field("path", &self.path)
            .field("len", &self.value.len())
            .finish()
    }
}

/// Thread-safe cache of secret values for one mounted volume.
///
/// Keyed by logical backend path. Values older than the configured TTL are
/// treated as absent so readers re-fetch them.
pub struct SecretCache {
    entries: Mutex<HashMap<String, SecretEntry>>,
    ttl: Duration,
}

impl SecretCache {
    /// Creates an empty cache with the given re-fetch TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// The configured re-fetch TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a copy of the fresh value at `path`, if cached.
    ///
    /// Stale entries are evicted (and wiped) rather than returned.
    pub fn get(&self, path: &str) -> Option<Zeroizing<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(entry) if !entry.is_stale(self.ttl) => {
                Some(Zeroizing::new(entry.value.to_vec()))
            }
            Some(_) => {
                entries.remove(path);
                None
            }
            None => None,
        }
    }

    /// Length of the fresh value at `path`, if cached.
    pub fn value_len(&self, path: &str) -> Option<u64> {
        let entries = self.entries.lock();
        entries
            .get(path)
            .filter(|e| !e.is_stale(self.ttl))
            .map(|e| e.value.len() as u64)
    }

    /// Inserts a freshly fetched value, replacing (and wiping) any previous
    /// entry for the same path.
    pub fn insert(&self, path: impl Into<String>, value: Zeroizing<Vec<u8>>) {
        let path = path.into();
        let entry = SecretEntry::new(path.clone(), value);
        self.entries.lock().insert(path, entry);
    }

    /// Number of cached entries, stale or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry, wiping all secret bytes.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Drop for SecretCache {
    fn drop(&mut self) {
        // Entries wipe themselves on drop; clearing here just makes the
        // teardown explicit for callers holding only an Arc.
        self.clear();
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(bytes: &[u8]) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(bytes.to_vec())
    }

    #[test]
    fn insert_and_get() {
        let cache = SecretCache::new(DEFAULT_ENTRY_TTL);
        cache.insert("secret/db", secret(b"hunter2"));

        let value = cache.get("secret/db").expect("cached value");
        assert_eq!(&value[..], b"hunter2");
        assert_eq!(cache.value_len("secret/db"), Some(7));
    }

    #[test]
    fn stale_entries_are_evicted() {
        let cache = SecretCache::new(Duration::ZERO);
        cache.insert("secret/db", secret(b"hunter2"));

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("secret/db").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties_cache() {
        let cache = SecretCache::new(DEFAULT_ENTRY_TTL);
        cache.insert("a", secret(b"1"));
        cache.insert("b", secret(b"2"));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn insert_replaces_previous_value() {
        let cache = SecretCache::new(DEFAULT_ENTRY_TTL);
        cache.insert("secret/db", secret(b"old"));
        cache.insert("secret/db", secret(b"new"));

        let value = cache.get("secret/db").unwrap();
        assert_eq!(&value[..], b"new");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn debug_never_prints_secret_bytes() {
        let entry = SecretEntry::new("secret/db", secret(b"hunter2"));
        let rendered = format!("{entry:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("secret/db"));
    }
}
