//! Secret store backend abstraction.
//!
//! A backend is anything that can authenticate against a secret service and
//! expose `{fetch, list}` over logical paths. Backends register a
//! constructor under an id; asking for an unregistered id is an explicit
//! [`StoreError::UnknownBackend`], never a silent empty value.

pub mod vault;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use zeroize::Zeroizing;

use crate::config::StoreConfig;
use crate::error::StoreError;

/// A connected secret store session.
///
/// Connecting is the constructor of the concrete type; a value of this
/// trait is already authenticated. Implementations must bound every call
/// with a deadline and surface it as [`StoreError::Timeout`] rather than
/// hanging.
pub trait SecretStore: Send + Sync {
    /// Fetches the secret value at `path`.
    fn fetch(&self, path: &str) -> Result<Zeroizing<Vec<u8>>, StoreError>;

    /// Lists the keys directly under `prefix`.
    ///
    /// Keys ending in `/` denote sub-prefixes that can be listed further.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Constructor for a backend: connect with the process-wide descriptor.
pub type Connector = fn(&StoreConfig) -> Result<Arc<dyn SecretStore>, StoreError>;

/// Registry of backend constructors keyed by backend id.
pub struct BackendRegistry {
    connectors: HashMap<&'static str, Connector>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Creates a registry with all built-in backends registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("vault", |config| {
            Ok(Arc::new(vault::VaultStore::connect(config)?) as Arc<dyn SecretStore>)
        });
        registry
    }

    /// Registers a constructor under `id`, replacing any previous one.
    pub fn register(&mut self, id: &'static str, connector: Connector) {
        info!(backend = id, "registering secret store backend");
        self.connectors.insert(id, connector);
    }

    /// True if a constructor is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.connectors.contains_key(id)
    }

    /// Ids of all registered backends, sorted.
    pub fn backend_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.connectors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Connects a new session using the descriptor's backend id.
    pub fn connect(&self, config: &StoreConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
        let connector = self
            .connectors
            .get(config.backend.as_str())
            .ok_or_else(|| StoreError::UnknownBackend(config.backend.clone()))?;
        connector(config)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backend_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_vault() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("vault"));
        assert_eq!(registry.backend_ids(), vec!["vault"]);
    }

    #[test]
    fn unknown_backend_is_an_explicit_error() {
        let registry = BackendRegistry::with_defaults();
        let config = StoreConfig::new("consul", "http://127.0.0.1:8500");

        match registry.connect(&config) {
            Err(StoreError::UnknownBackend(id)) => assert_eq!(id, "consul"),
            Err(e) => panic!("expected UnknownBackend, got {e}"),
            Ok(_) => panic!("expected UnknownBackend, got a session"),
        }
    }

    #[test]
    fn registered_connector_is_used() {
        let mut registry = BackendRegistry::new();
        registry.register("mem", |_config| {
            Ok(Arc::new(crate::testing::MemoryStore::new()) as Arc<dyn SecretStore>)
        });

        let config = StoreConfig::new("mem", "");
        let store = registry.connect(&config).unwrap();
        assert!(store.list("").unwrap().is_empty());
    }
}
