//! Volume registry and lifecycle controller.
//!
//! The driver owns the name → volume map and implements the verbs the
//! plugin protocol exposes. Operations on the same name serialize on a
//! per-volume mutex; operations on different names proceed independently,
//! so one volume's slow backend never stalls another's lifecycle.
//!
//! Per volume the states are `Created` (backing directory exists),
//! `Mounted` (a live secret filesystem is bound), and `Removed` (tombstone
//! for a concurrently deleted slot). Unknown names simply have no entry;
//! `create` and `mount` bring them to `Created` implicitly.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use secretvol_core::{BackendRegistry, SecretStore, StoreConfig, StoreError, DEFAULT_ENTRY_TTL};
use secretvol_fuse::{MountError, SecretFs, SecretFsConfig, SecretMount};

/// Errors surfaced by lifecycle operations, rendered into the protocol
/// response's `Err` field at the server boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Directory creation/removal failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The operation is invalid in the volume's current state.
    #[error("invalid state: {0}")]
    State(String),

    /// Backend connect/fetch/listing failure (including timeouts).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// OS-level mount or unmount failure.
    #[error(transparent)]
    Mount(#[from] MountError),
}

/// Handle to one mounted volume, owned by the registry while `Mounted`.
pub trait MountHandle: Send {
    /// The path the volume is mounted at.
    fn mountpoint(&self) -> &Path;

    /// Unmounts. On error the mount must still be live, so the registry
    /// keeps the volume `Mounted` rather than diverging from the OS.
    fn unmount(&mut self) -> Result<(), MountError>;
}

impl MountHandle for SecretMount {
    fn mountpoint(&self) -> &Path {
        SecretMount::mountpoint(self)
    }

    fn unmount(&mut self) -> Result<(), MountError> {
        SecretMount::unmount(self)
    }
}

/// Mounting seam: turns a connected store session into a live mount.
///
/// The production implementation is [`FuseMounter`]; tests substitute a
/// mock to exercise lifecycle semantics without FUSE.
pub trait Mounter: Send + Sync + 'static {
    /// Mounts the volume `name` at `mountpoint`, exposing the secrets the
    /// session can reach.
    fn mount(
        &self,
        store: Arc<dyn SecretStore>,
        mountpoint: &Path,
        name: &str,
    ) -> Result<Box<dyn MountHandle>, MountError>;
}

/// Production mounter: builds a [`SecretFs`] and performs the FUSE mount.
///
/// Each volume exposes the keys under `<prefix>/<volume-name>` in the
/// backend, so a volume named `db-creds` materializes the secrets stored
/// under `secret/db-creds` by default.
pub struct FuseMounter {
    prefix: String,
    entry_ttl: Duration,
}

impl FuseMounter {
    /// Creates a mounter scoping volumes under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }

    /// Overrides the secret value re-fetch TTL.
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    fn namespace(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }
}

impl Mounter for FuseMounter {
    fn mount(
        &self,
        store: Arc<dyn SecretStore>,
        mountpoint: &Path,
        name: &str,
    ) -> Result<Box<dyn MountHandle>, MountError> {
        let config = SecretFsConfig::new(self.namespace(name)).entry_ttl(self.entry_ttl);
        let fs = SecretFs::new(store, &config)?;
        let handle = secretvol_fuse::mount(fs, mountpoint, name)?;
        Ok(Box::new(handle))
    }
}

enum VolumeState {
    Created,
    Mounted(Box<dyn MountHandle>),
    /// Tombstone observed only by operations that raced a `remove` on the
    /// same slot; fresh operations get a fresh slot.
    Removed,
}

struct Volume {
    state: VolumeState,
}

/// The volume driver: registry plus lifecycle controller.
pub struct SecretDriver<M: Mounter = FuseMounter> {
    root: PathBuf,
    store_config: StoreConfig,
    backends: BackendRegistry,
    volumes: DashMap<String, Arc<Mutex<Volume>>>,
    mounter: M,
}

impl<M: Mounter> SecretDriver<M> {
    /// Creates a driver managing volumes under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        store_config: StoreConfig,
        backends: BackendRegistry,
        mounter: M,
    ) -> Self {
        Self {
            root: root.into(),
            store_config,
            backends,
            volumes: DashMap::new(),
            mounter,
        }
    }

    /// The deterministic mountpoint for `name`; pure, never fails, and
    /// independent of the volume's lifecycle state.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn slot(&self, name: &str) -> Arc<Mutex<Volume>> {
        self.volumes
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Volume {
                    state: VolumeState::Created,
                }))
            })
            .clone()
    }

    fn existing_slot(&self, name: &str) -> Option<Arc<Mutex<Volume>>> {
        self.volumes.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Drops a slot that never gained a backing directory or mount, so a
    /// failed operation on a never-seen name does not register the volume.
    /// Must run under the slot's lock.
    fn discard_unbacked(&self, name: &str, state: &mut VolumeState) {
        if matches!(state, VolumeState::Created) && !self.path(name).is_dir() {
            *state = VolumeState::Removed;
            self.volumes.remove(name);
        }
    }

    /// Ensures the volume's backing directory exists. Idempotent; a failure
    /// leaves no trace of the name in the registry.
    pub fn create(&self, name: &str) -> Result<(), DriverError> {
        debug!(name, "create");
        let slot = self.slot(name);
        let mut guard = slot.lock();

        if matches!(guard.state, VolumeState::Removed) {
            return Err(DriverError::State(format!(
                "volume {name} was removed concurrently"
            )));
        }

        if let Err(e) = std::fs::create_dir_all(self.path(name)) {
            self.discard_unbacked(name, &mut guard.state);
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes the volume and its backing directory.
    ///
    /// Rejected while mounted: deleting under a live mount would orphan
    /// the filesystem and leave secret material exposed.
    pub fn remove(&self, name: &str) -> Result<(), DriverError> {
        debug!(name, "remove");
        let slot = self.slot(name);
        let mut guard = slot.lock();

        match guard.state {
            VolumeState::Mounted(_) => {
                return Err(DriverError::State(format!(
                    "volume {name} is mounted; unmount it before removing"
                )));
            }
            VolumeState::Removed => {
                return Err(DriverError::State(format!(
                    "volume {name} was removed concurrently"
                )));
            }
            VolumeState::Created => {}
        }

        let path = self.path(name);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        guard.state = VolumeState::Removed;
        self.volumes.remove(name);
        info!(name, "volume removed");
        Ok(())
    }

    /// Mounts the volume, implicitly creating it if unknown.
    ///
    /// Connects a fresh backend session, materializes the secret
    /// filesystem, and performs the OS mount. Fully rolled back on any
    /// failure. Mounting an already-mounted volume is an idempotent no-op
    /// returning the existing mountpoint; a second filesystem instance is
    /// never constructed.
    pub fn mount(&self, name: &str) -> Result<PathBuf, DriverError> {
        debug!(name, "mount");
        let slot = self.slot(name);
        let mut guard = slot.lock();

        match &guard.state {
            VolumeState::Mounted(handle) => {
                debug!(name, "already mounted");
                return Ok(handle.mountpoint().to_path_buf());
            }
            VolumeState::Removed => {
                return Err(DriverError::State(format!(
                    "volume {name} was removed concurrently"
                )));
            }
            VolumeState::Created => {}
        }

        let mountpoint = self.path(name);
        if let Err(e) = std::fs::create_dir_all(&mountpoint) {
            self.discard_unbacked(name, &mut guard.state);
            return Err(e.into());
        }

        // Backend connect happens per mount; a bad address or token fails
        // here and the volume stays Created (its directory now exists).
        let store = self.backends.connect(&self.store_config)?;
        let handle = self.mounter.mount(store, &mountpoint, name)?;

        guard.state = VolumeState::Mounted(handle);
        info!(name, mountpoint = %mountpoint.display(), "volume mounted");
        Ok(mountpoint)
    }

    /// Unmounts the volume and discards its secret filesystem.
    ///
    /// If the OS unmount fails the volume stays `Mounted` and the error is
    /// returned; the registry never claims a volume is unmounted while
    /// the OS still considers it mounted.
    pub fn unmount(&self, name: &str) -> Result<(), DriverError> {
        debug!(name, "unmount");
        // Only mounted volumes have a slot worth looking at; inserting one
        // here would register the name as a side effect of the rejection.
        let Some(slot) = self.existing_slot(name) else {
            return Err(DriverError::State(format!("volume {name} is not mounted")));
        };
        let mut guard = slot.lock();

        let VolumeState::Mounted(handle) = &mut guard.state else {
            return Err(DriverError::State(format!("volume {name} is not mounted")));
        };

        handle.unmount()?;
        // Dropping the handle releases the filesystem; its value cache was
        // cleared by the unmount.
        guard.state = VolumeState::Created;
        info!(name, "volume unmounted");
        Ok(())
    }

    /// The driver's capability scope: volumes are host-local.
    pub fn capabilities(&self) -> &'static str {
        "local"
    }

    /// Returns `(name, mountpoint)` if the volume is known, from the
    /// registry or from a backing directory surviving a restart.
    pub fn get(&self, name: &str) -> Option<(String, PathBuf)> {
        debug!(name, "get");
        // Clone the slot out before locking it; holding a map guard across
        // the volume lock would invert the order `remove` takes them in.
        let slot = self.volumes.get(name).map(|s| Arc::clone(s.value()));
        let known = slot.is_some_and(|slot| !matches!(slot.lock().state, VolumeState::Removed));

        if known || self.path(name).is_dir() {
            Some((name.to_string(), self.path(name)))
        } else {
            None
        }
    }

    /// All known volumes and their mountpoints, sorted by name.
    ///
    /// Backing directories found under the root are included even when the
    /// registry has no entry for them: they are volumes from a previous
    /// run, unmounted until explicitly remounted.
    pub fn list(&self) -> Result<Vec<(String, PathBuf)>, DriverError> {
        debug!("list");
        let mut names: BTreeMap<String, PathBuf> = BTreeMap::new();

        if self.root.is_dir() {
            for entry in std::fs::read_dir(&self.root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    names.insert(name.clone(), self.path(&name));
                }
            }
        }

        let slots: Vec<(String, Arc<Mutex<Volume>>)> = self
            .volumes
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (name, slot) in slots {
            if !matches!(slot.lock().state, VolumeState::Removed) {
                let path = self.path(&name);
                names.insert(name, path);
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Best-effort unmount of every mounted volume, used at shutdown so no
    /// secret material outlives the process's mounts.
    pub fn unmount_all(&self) {
        let names: Vec<String> = self.volumes.iter().map(|e| e.key().clone()).collect();
        for name in names {
            match self.unmount(&name) {
                Ok(()) => {}
                Err(DriverError::State(_)) => {} // not mounted
                Err(e) => warn!(name, error = %e, "failed to unmount during shutdown"),
            }
        }
    }
}

impl<M: Mounter> std::fmt::Debug for SecretDriver<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDriver")
            .field("root", &self.root)
            .field("backend", &self.store_config.backend)
            .field("volumes", &self.volumes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_mounter_scopes_namespace_by_volume_name() {
        let mounter = FuseMounter::new("secret");
        assert_eq!(mounter.namespace("db-creds"), "secret/db-creds");

        let mounter = FuseMounter::new("");
        assert_eq!(mounter.namespace("db-creds"), "db-creds");

        let mounter = FuseMounter::new("/kv/app/");
        assert_eq!(mounter.namespace("x"), "kv/app/x");
    }
}
