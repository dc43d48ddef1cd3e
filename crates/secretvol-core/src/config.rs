//! Backend descriptor shared process-wide by all volumes.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported secret store backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// HashiCorp-Vault-style KV store over HTTP.
    Vault,
}

impl BackendKind {
    /// The identifier used on the command line and in the backend registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vault" => Ok(Self::Vault),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide backend descriptor.
///
/// Built once at startup from the command line and shared read-only by all
/// volumes. The options map is passed opaquely to the backend constructor;
/// each backend documents the keys it understands.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend id, e.g. `"vault"`. Kept as a string so out-of-tree
    /// backends can register under their own id.
    pub backend: String,
    /// Backend address, e.g. `https://vault.service:8200`.
    pub addr: String,
    /// Free-form `key=value` options (auth token, timeouts, prefixes).
    pub opts: HashMap<String, String>,
}

impl StoreConfig {
    /// Creates a descriptor with no options.
    pub fn new(backend: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            addr: addr.into(),
            opts: HashMap::new(),
        }
    }

    /// Returns the option for `key`, if present.
    pub fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }
}

/// Parses repeated `key=value` option flags into a map.
///
/// A bare `key` with no `=` maps to an empty value, matching the behavior
/// container runtimes use for flag-style options.
pub fn parse_store_opts<I, S>(opts: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = HashMap::new();
    for opt in opts {
        let opt = opt.as_ref();
        match opt.split_once('=') {
            Some((k, v)) => map.insert(k.to_string(), v.to_string()),
            None => map.insert(opt.to_string(), String::new()),
        };
    }
    map
}
