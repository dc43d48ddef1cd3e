//! OS mount/unmount lifecycle for a secret filesystem.
//!
//! [`mount`] performs the actual FUSE mount for a built [`SecretFs`] and
//! returns a [`SecretMount`] handle owning the session. The mount syscall
//! and the readiness wait are both bounded with timeouts, since a stale
//! mount at the target can block either indefinitely.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fuser::{BackgroundSession, MountOption};
use secretvol_core::SecretCache;
use tracing::{debug, info, warn};

use crate::error::MountError;
use crate::filesystem::SecretFs;

/// How long to wait for the mount syscall and mount readiness.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval while waiting for the mount to appear.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timeout for a graceful session join before forcing the unmount.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a live secret filesystem mount.
///
/// Owns the fuser session and the shared value cache. Unmounting (or
/// dropping the handle) tears the OS mount down and wipes every cached
/// secret value.
pub struct SecretMount {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
    cache: Arc<SecretCache>,
}

/// Mounts `fs` at `mountpoint`.
///
/// All-or-nothing: on any failure the session is torn down, the cache is
/// cleared, and no handle is returned.
pub fn mount(fs: SecretFs, mountpoint: &Path, volume: &str) -> Result<SecretMount, MountError> {
    info!(
        volume,
        mountpoint = %mountpoint.display(),
        secrets = fs.secret_count(),
        "mounting secret filesystem"
    );

    if !mountpoint.exists() {
        std::fs::create_dir_all(mountpoint).map_err(MountError::Mount)?;
    }

    // The cache outlives the fs move into the session.
    let cache = fs.cache();

    let options = vec![
        MountOption::FSName(format!("secretvol:{volume}")),
        MountOption::Subtype("secretvol".to_string()),
        MountOption::RO,
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];

    let session = spawn_mount_with_timeout(fs, mountpoint, &options).inspect_err(|_| {
        cache.clear();
    })?;

    if let Err(e) = wait_for_mount(mountpoint) {
        // The session unmounts on drop; make the rollback explicit anyway.
        drop(session);
        cache.clear();
        return Err(e);
    }

    info!(volume, mountpoint = %mountpoint.display(), "mount successful");
    Ok(SecretMount {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
        cache,
    })
}

/// Run `fuser::spawn_mount2` on a helper thread so a blocked mount syscall
/// (e.g. over a stale mount) cannot hang the caller.
fn spawn_mount_with_timeout(
    fs: SecretFs,
    mountpoint: &Path,
    options: &[MountOption],
) -> Result<BackgroundSession, MountError> {
    let mountpoint = mountpoint.to_path_buf();
    let options: Vec<MountOption> = options.to_vec();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let result = fuser::spawn_mount2(fs, &mountpoint, &options);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(MountError::Mount(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Mount(io::Error::new(
            io::ErrorKind::TimedOut,
            "mount did not complete in time; the mountpoint may be a stale mount",
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Mount(io::Error::other(
            "mount thread terminated unexpectedly",
        ))),
    }
}

/// Poll until the mountpoint's device id differs from its parent's, which
/// marks the mount as active. Stat-based detection avoids parsing the
/// mount table, which can itself block on ghost mounts.
fn wait_for_mount(mountpoint: &Path) -> Result<(), MountError> {
    #[cfg(unix)]
    use std::os::unix::fs::MetadataExt;

    let deadline = Instant::now() + MOUNT_TIMEOUT;
    let parent = mountpoint.parent().unwrap_or(Path::new("/"));

    while Instant::now() < deadline {
        #[cfg(unix)]
        if let (Ok(path_meta), Ok(parent_meta)) =
            (std::fs::metadata(mountpoint), std::fs::metadata(parent))
        {
            if path_meta.dev() != parent_meta.dev() {
                debug!(mountpoint = %mountpoint.display(), "mount confirmed active");
                return Ok(());
            }
        }

        #[cfg(not(unix))]
        if mountpoint.is_dir() {
            return Ok(());
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    Err(MountError::Mount(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("mount did not become ready within {MOUNT_TIMEOUT:?}"),
    )))
}

impl SecretMount {
    /// The path this filesystem is mounted at.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// True while the OS mount is live.
    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Unmounts the filesystem and wipes all cached secret values.
    ///
    /// The OS unmount runs first; if it fails (e.g. an open file keeps the
    /// mount busy) the error is returned, the session is kept, and the
    /// volume remains mounted; the caller's state never diverges from the
    /// mount table.
    pub fn unmount(&mut self) -> Result<(), MountError> {
        if self.session.is_none() {
            return Ok(());
        }

        info!(mountpoint = %self.mountpoint.display(), "unmounting secret filesystem");
        os_unmount(&self.mountpoint).map_err(MountError::Unmount)?;

        if let Some(session) = self.session.take() {
            // The kernel connection is gone; join returns promptly and
            // runs the filesystem's destroy (which clears its cache).
            session.join();
        }
        self.cache.clear();
        info!(mountpoint = %self.mountpoint.display(), "unmount successful");
        Ok(())
    }
}

/// Ask the OS to detach the mount, reporting failures.
fn os_unmount(mountpoint: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    let output = Command::new("fusermount").arg("-u").arg(mountpoint).output()?;

    #[cfg(target_os = "macos")]
    let output = Command::new("umount").arg(mountpoint).output()?;

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    return Err(io::Error::other("unmount is not supported on this platform"));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(io::Error::other(format!(
                "unmount of {} failed: {}",
                mountpoint.display(),
                stderr.trim()
            )))
        }
    }
}

/// Last-resort detach when a graceful join stalls.
fn force_unmount(mountpoint: &Path) {
    #[cfg(target_os = "linux")]
    {
        // Lazy unmount detaches immediately and lets open handles drain.
        let _ = Command::new("fusermount").args(["-uz"]).arg(mountpoint).output();
    }

    #[cfg(target_os = "macos")]
    {
        let _ = Command::new("umount").arg("-f").arg(mountpoint).output();
    }
}

impl Drop for SecretMount {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(mountpoint = %self.mountpoint.display(), "dropping live mount handle");

            // join() can block while files are open; bound it and fall
            // back to a forced unmount so shutdown cannot wedge.
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                session.join();
                let _ = tx.send(());
            });

            if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
                warn!(
                    mountpoint = %self.mountpoint.display(),
                    "graceful unmount timed out, forcing"
                );
                force_unmount(&self.mountpoint);
            }
        }
        self.cache.clear();
    }
}

impl std::fmt::Debug for SecretMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretMount")
            .field("mountpoint", &self.mountpoint)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}
