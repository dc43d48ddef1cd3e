//! Error handling and errno mapping for the secret filesystem.
//!
//! FUSE callbacks answer the kernel with POSIX error codes; this module
//! maps store and filesystem errors onto them. Mount lifecycle failures
//! have their own [`MountError`] so callers can tell a failed OS mount
//! apart from a failed backend call.

use std::io;

use secretvol_core::StoreError;
use thiserror::Error;

/// Errors raised while serving filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// A backend call failed or timed out.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The kernel referenced an inode we do not track.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    /// The kernel referenced a file handle we did not issue.
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    /// A file operation was attempted on a directory or vice versa.
    #[error("not a secret entry: inode {0}")]
    NotASecret(u64),
}

impl FsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Store(e) => store_error_to_errno(e),
            FsError::InvalidInode(_) => libc::ENOENT,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::NotASecret(_) => libc::EISDIR,
        }
    }
}

/// Converts a store error to a libc error code.
///
/// Missing secrets are `ENOENT`, elapsed deadlines `ETIMEDOUT`, and any
/// other backend failure a generic `EIO` scoped to the entry being read.
pub fn store_error_to_errno(e: &StoreError) -> i32 {
    match e {
        StoreError::NotFound(_) => libc::ENOENT,
        StoreError::Timeout { .. } => libc::ETIMEDOUT,
        StoreError::Backend(_) | StoreError::UnknownBackend(_) | StoreError::InvalidOption(_) => {
            libc::EIO
        }
    }
}

/// Errors raised by the mount/unmount lifecycle.
#[derive(Debug, Error)]
pub enum MountError {
    /// Building the filesystem view failed (backend connect or listing).
    #[error("filesystem construction failed: {0}")]
    FilesystemCreation(#[from] StoreError),

    /// The OS mount call failed or did not become ready in time.
    #[error("mount failed: {0}")]
    Mount(#[source] io::Error),

    /// The OS unmount call failed; the mount is still live.
    #[error("unmount failed: {0}")]
    Unmount(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn store_errors_map_to_errnos() {
        assert_eq!(
            store_error_to_errno(&StoreError::NotFound("x".into())),
            libc::ENOENT
        );
        assert_eq!(
            store_error_to_errno(&StoreError::Timeout {
                path: "x".into(),
                timeout: Duration::from_secs(1)
            }),
            libc::ETIMEDOUT
        );
        assert_eq!(
            store_error_to_errno(&StoreError::Backend("boom".into())),
            libc::EIO
        );
    }

    #[test]
    fn fs_errors_map_to_errnos() {
        assert_eq!(FsError::InvalidInode(9).to_errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidHandle(3).to_errno(), libc::EBADF);
        assert_eq!(FsError::NotASecret(1).to_errno(), libc::EISDIR);
        assert_eq!(
            FsError::Store(StoreError::NotFound("p".into())).to_errno(),
            libc::ENOENT
        );
    }

    #[test]
    fn mount_error_display_names_the_phase() {
        let e = MountError::Mount(io::Error::other("busy"));
        assert!(e.to_string().contains("mount failed"));

        let e = MountError::Unmount(io::Error::other("busy"));
        assert!(e.to_string().contains("unmount failed"));
    }
}
