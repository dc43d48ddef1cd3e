//! In-memory secret store for tests.
//!
//! Enabled with the `test-utils` feature so the filesystem and driver
//! crates can exercise mount paths without a live backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::backend::SecretStore;
use crate::error::StoreError;

/// A [`SecretStore`] backed by an in-memory map of path → bytes.
///
/// Paths behave like Vault KV paths: listing a prefix returns direct
/// children, with `/`-suffixed names for sub-prefixes. Individual paths can
/// be poisoned to simulate fetch failures.
#[derive(Default)]
pub struct MemoryStore {
    secrets: RwLock<BTreeMap<String, Vec<u8>>>,
    failing: RwLock<Vec<String>>,
    fetch_count: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret at `path`.
    pub fn put(&self, path: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.secrets
            .write()
            .insert(path.into().trim_matches('/').to_string(), value.into());
    }

    /// Builder-style [`put`](Self::put).
    pub fn with(self, path: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.put(path, value);
        self
    }

    /// Makes every fetch of `path` fail with a backend error.
    pub fn fail_path(&self, path: impl Into<String>) {
        self.failing.write().push(path.into());
    }

    /// Number of fetch calls served so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

impl SecretStore for MemoryStore {
    fn fetch(&self, path: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let path = path.trim_matches('/');

        if self.failing.read().iter().any(|p| p == path) {
            return Err(StoreError::Backend(format!("injected failure for {path:?}")));
        }

        self.secrets
            .read()
            .get(path)
            .map(|v| Zeroizing::new(v.clone()))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.trim_matches('/');
        let secrets = self.secrets.read();

        let mut keys: Vec<String> = Vec::new();
        for path in secrets.keys() {
            let rest = if prefix.is_empty() {
                path.as_str()
            } else {
                match path.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };

            let key = match rest.split_once('/') {
                Some((head, _)) => format!("{head}/"),
                None => rest.to_string(),
            };
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }

        Ok(keys)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("secrets", &self.secrets.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_roundtrip() {
        let store = MemoryStore::new().with("secret/db/password", b"hunter2".to_vec());
        let value = store.fetch("secret/db/password").unwrap();
        assert_eq!(&value[..], b"hunter2");
        assert_eq!(store.fetch_count(), 1);
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.fetch("secret/nope"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_returns_direct_children() {
        let store = MemoryStore::new()
            .with("secret/db/password", b"a".to_vec())
            .with("secret/db/username", b"b".to_vec())
            .with("secret/api-key", b"c".to_vec());

        let mut keys = store.list("secret").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["api-key".to_string(), "db/".to_string()]);

        let keys = store.list("secret/db").unwrap();
        assert_eq!(keys, vec!["password".to_string(), "username".to_string()]);
    }

    #[test]
    fn injected_failures_surface_as_backend_errors() {
        let store = MemoryStore::new().with("secret/x", b"v".to_vec());
        store.fail_path("secret/x");
        assert!(matches!(
            store.fetch("secret/x"),
            Err(StoreError::Backend(_))
        ));
    }
}
