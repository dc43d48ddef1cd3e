//! FUSE materialization of secret store contents.
//!
//! This crate turns a connected [`secretvol_core::SecretStore`] session
//! into a read-only filesystem rooted at a volume's mountpoint:
//!
//! - [`SecretFs`] - the `fuser` filesystem; lists the key space eagerly at
//!   construction, fetches values lazily on first open
//! - [`SecretTree`] - hierarchical inode table built from the key listing
//! - [`mount`] / [`SecretMount`] - the OS mount/unmount pair; unmounting
//!   wipes every cached secret value
//!
//! Construction never mounts. The mount itself happens in [`mount`], which
//! bounds the mount syscall with a timeout and polls for readiness before
//! returning, so a returned handle always refers to a live mount.

#![warn(missing_docs)]

pub mod error;
pub mod filesystem;
pub mod mount;
pub mod tree;

pub use error::{FsError, MountError};
pub use filesystem::{SecretFs, SecretFsConfig};
pub use mount::{mount, SecretMount};
pub use tree::{Node, NodeKind, SecretTree, ROOT_INODE};
