//! Secret store clients and shared types for the secretvol volume plugin.
//!
//! This crate provides the pieces of the plugin that talk to the secret
//! backend and carry secret material:
//!
//! - [`SecretStore`] - Capability trait for a connected backend session
//!   (fetch a value by path, list keys under a prefix)
//! - [`BackendRegistry`] - Registry of backend constructors keyed by
//!   backend id, with an explicit error for unknown ids
//! - [`VaultStore`] - HTTP client for a HashiCorp-Vault-style KV store
//! - [`SecretCache`] - TTL-aware cache of fetched values, zeroed on clear
//! - [`StoreConfig`] - Process-wide backend descriptor (kind, address,
//!   opaque `key=value` options)
//!
//! Secret values are always handled as [`zeroize::Zeroizing`] buffers so
//! they are actively cleared from memory when dropped, not merely
//! dereferenced.

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use backend::{BackendRegistry, SecretStore};
pub use backend::vault::VaultStore;
pub use config::{parse_store_opts, BackendKind, StoreConfig};
pub use entry::{SecretCache, SecretEntry, DEFAULT_ENTRY_TTL};
pub use error::StoreError;
