//! HashiCorp-Vault-style KV backend over HTTP.
//!
//! Speaks the KV v1 read/list API: `GET /v1/<path>` returns the secret's
//! data object, `GET /v1/<path>?list=true` returns the keys under a
//! prefix. Authentication is token-based via the `X-Vault-Token` header.
//!
//! ## Options
//!
//! - `token` (required): authentication token
//! - `timeout`: per-request deadline in seconds (default 10)
//!
//! ## Value mapping
//!
//! A secret whose data object carries a string field named `value` exposes
//! that field's bytes. Any other shape exposes the compact JSON encoding of
//! the whole data object, so structured secrets remain readable.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use crate::config::StoreConfig;
use crate::error::StoreError;

use super::SecretStore;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct SecretResponse {
    data: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ListResponse {
    data: ListKeys,
}

#[derive(Deserialize)]
struct ListKeys {
    keys: Vec<String>,
}

/// A connected session against a Vault-style KV store.
pub struct VaultStore {
    client: Client,
    base: Url,
    // Credential material, wiped when the session drops.
    token: Zeroizing<String>,
    timeout: Duration,
}

impl VaultStore {
    /// Connects and verifies the address and token.
    ///
    /// Verification is a `lookup-self` call, so a bad address or bad
    /// credentials fail here, before any filesystem is built on top of
    /// this session.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.addr)
            .map_err(|e| StoreError::Backend(format!("invalid address {:?}: {e}", config.addr)))?;

        let token = Zeroizing::new(
            config
                .opt("token")
                .ok_or_else(|| {
                    StoreError::InvalidOption("vault backend requires token=<token>".into())
                })?
                .to_string(),
        );

        let timeout = match config.opt("timeout") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                StoreError::InvalidOption(format!("timeout must be seconds, got {raw:?}"))
            })?),
            None => DEFAULT_TIMEOUT,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to build http client: {e}")))?;

        let store = Self {
            client,
            base,
            token,
            timeout,
        };
        store.verify_session()?;

        info!(addr = %config.addr, "connected to vault backend");
        Ok(store)
    }

    fn verify_session(&self) -> Result<(), StoreError> {
        let url = self.api_url("auth/token/lookup-self")?;
        let response = self
            .client
            .get(url)
            .header("X-Vault-Token", self.token.as_str())
            .send()
            .map_err(|e| self.transport_error("auth/token/lookup-self", e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(StoreError::Backend(
                "vault rejected the supplied token".into(),
            )),
            status => Err(StoreError::Backend(format!(
                "vault token check failed with status {status}"
            ))),
        }
    }

    fn api_url(&self, path: &str) -> Result<Url, StoreError> {
        let trimmed = path.trim_matches('/');
        self.base
            .join(&format!("v1/{trimmed}"))
            .map_err(|e| StoreError::Backend(format!("invalid path {path:?}: {e}")))
    }

    fn transport_error(&self, path: &str, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                path: path.to_string(),
                timeout: self.timeout,
            }
        } else {
            StoreError::Backend(format!("request for {path:?} failed: {e}"))
        }
    }
}

impl SecretStore for VaultStore {
    fn fetch(&self, path: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        debug!(path, "fetching secret");
        let url = self.api_url(path)?;
        let response = self
            .client
            .get(url)
            .header("X-Vault-Token", self.token.as_str())
            .send()
            .map_err(|e| self.transport_error(path, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StoreError::NotFound(path.to_string())),
            status if !status.is_success() => {
                return Err(StoreError::Backend(format!(
                    "fetch of {path:?} failed with status {status}"
                )));
            }
            _ => {}
        }

        let secret: SecretResponse = response
            .json()
            .map_err(|e| StoreError::Backend(format!("malformed response for {path:?}: {e}")))?;

        // Flat string secrets expose their `value` field directly; anything
        // else is exposed as the JSON of the data object.
        let bytes = match secret.data.get("value") {
            Some(Value::String(s)) => s.clone().into_bytes(),
            _ => serde_json::to_vec(&secret.data)
                .map_err(|e| StoreError::Backend(format!("unencodable secret {path:?}: {e}")))?,
        };

        Ok(Zeroizing::new(bytes))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        debug!(prefix, "listing secret keys");
        let mut url = self.api_url(prefix)?;
        url.query_pairs_mut().append_pair("list", "true");

        let response = self
            .client
            .get(url)
            .header("X-Vault-Token", self.token.as_str())
            .send()
            .map_err(|e| self.transport_error(prefix, e))?;

        match response.status() {
            // An empty prefix lists as missing; expose it as no keys.
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            status if !status.is_success() => {
                return Err(StoreError::Backend(format!(
                    "list of {prefix:?} failed with status {status}"
                )));
            }
            _ => {}
        }

        let listing: ListResponse = response
            .json()
            .map_err(|e| StoreError::Backend(format!("malformed listing for {prefix:?}: {e}")))?;

        Ok(listing.data.keys)
    }
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("base", &self.base.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}
