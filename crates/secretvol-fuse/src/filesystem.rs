//! Read-only FUSE filesystem over a secret store session.
//!
//! Construction lists the key space and builds the inode tree but fetches
//! no values; each entry's bytes are fetched on first access and cached
//! with a TTL. A fetch failure surfaces as an I/O error for that entry
//! only; the mount stays up.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use libc::c_int;
use secretvol_core::{SecretCache, SecretStore, StoreError, DEFAULT_ENTRY_TTL};
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::error::FsError;
use crate::tree::{collect_paths, Node, SecretTree};

/// How long the kernel may cache attributes and lookups.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Tuning knobs for a secret filesystem.
#[derive(Debug, Clone)]
pub struct SecretFsConfig {
    /// Backend namespace the volume exposes (listed at construction).
    pub namespace: String,
    /// Re-fetch TTL for cached secret values.
    pub entry_ttl: Duration,
}

impl SecretFsConfig {
    /// Config for a volume exposing the keys under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }

    /// Overrides the value re-fetch TTL.
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}

/// The secret filesystem served to the kernel.
pub struct SecretFs {
    store: Arc<dyn SecretStore>,
    tree: SecretTree,
    cache: Arc<SecretCache>,
    /// Open file handles: fh → inode.
    handles: HashMap<u64, u64>,
    next_fh: u64,
    uid: u32,
    gid: u32,
    mounted_at: SystemTime,
}

impl SecretFs {
    /// Builds the filesystem view for a connected store session.
    ///
    /// Lists the key space under the configured namespace eagerly; a
    /// listing failure means no filesystem (and so no mount). No secret
    /// values are fetched here.
    pub fn new(store: Arc<dyn SecretStore>, config: &SecretFsConfig) -> Result<Self, StoreError> {
        let paths = collect_paths(store.as_ref(), &config.namespace)?;
        let tree = SecretTree::build(&config.namespace, &paths);
        info!(
            namespace = %config.namespace,
            secrets = tree.secret_count(),
            "built secret filesystem view"
        );

        Ok(Self {
            store,
            tree,
            cache: Arc::new(SecretCache::new(config.entry_ttl)),
            handles: HashMap::new(),
            next_fh: 1,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            mounted_at: SystemTime::now(),
        })
    }

    /// Shared handle to the value cache, used by the mount handle to wipe
    /// secret material on unmount.
    pub fn cache(&self) -> Arc<SecretCache> {
        Arc::clone(&self.cache)
    }

    /// Number of secret entries visible in this filesystem.
    pub fn secret_count(&self) -> usize {
        self.tree.secret_count()
    }

    /// Returns the entry's current value, fetching it if absent or stale.
    fn entry_value(&self, node: &Node) -> Result<Zeroizing<Vec<u8>>, FsError> {
        let path = node
            .secret_path()
            .ok_or(FsError::NotASecret(node.ino))?;

        if let Some(value) = self.cache.get(path) {
            return Ok(value);
        }

        let value = self.store.fetch(path)?;
        self.cache.insert(path, Zeroizing::new(value.to_vec()));
        Ok(value)
    }

    /// Attribute for a node. Secret sizes require the value, so the first
    /// stat of an entry triggers its fetch.
    fn attr_for(&self, node: &Node) -> Result<FileAttr, FsError> {
        if node.is_dir() {
            return Ok(self.make_attr(node.ino, FileType::Directory, 0));
        }

        let path = node.secret_path().expect("secret node");
        let size = match self.cache.value_len(path) {
            Some(len) => len,
            None => self.entry_value(node)?.len() as u64,
        };
        Ok(self.make_attr(node.ino, FileType::RegularFile, size))
    }

    fn make_attr(&self, ino: u64, kind: FileType, size: u64) -> FileAttr {
        let (perm, nlink) = match kind {
            FileType::Directory => (0o500, 2),
            _ => (0o400, 1),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }
}

impl Filesystem for SecretFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(secrets = self.tree.secret_count(), "secret filesystem initialized");
        Ok(())
    }

    /// Called by the kernel on unmount; the last chance to un-expose
    /// secret material held for this mount.
    fn destroy(&mut self) {
        self.cache.clear();
        info!("secret filesystem destroyed, value cache cleared");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        let Some(node) = self.tree.lookup(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.attr_for(node) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(parent, name, error = %e, "lookup failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(ino, "getattr");
        let Some(node) = self.tree.get(ino) else {
            reply.error(FsError::InvalidInode(ino).to_errno());
            return;
        };

        match self.attr_for(node) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => {
                warn!(ino, error = %e, "getattr failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");

        // Read-only exposure layer: reject any write access outright.
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EACCES);
            return;
        }

        let Some(node) = self.tree.get(ino) else {
            reply.error(FsError::InvalidInode(ino).to_errno());
            return;
        };
        if node.is_dir() {
            reply.error(FsError::NotASecret(ino).to_errno());
            return;
        }

        // Lazy fetch point: the value is pulled (or refreshed) here so
        // reads are served from memory. A failure fails only this open.
        if let Err(e) = self.entry_value(node) {
            warn!(ino, error = %e, "fetch on open failed");
            reply.error(e.to_errno());
            return;
        }

        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, ino);
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");

        if !self.handles.contains_key(&fh) {
            reply.error(FsError::InvalidHandle(fh).to_errno());
            return;
        }
        let Some(node) = self.tree.get(ino) else {
            reply.error(FsError::InvalidInode(ino).to_errno());
            return;
        };

        match self.entry_value(node) {
            Ok(value) => {
                let offset = usize::try_from(offset).unwrap_or(0);
                if offset >= value.len() {
                    reply.data(&[]);
                    return;
                }
                let end = value.len().min(offset + size as usize);
                reply.data(&value[offset..end]);
            }
            Err(e) => {
                warn!(ino, error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(fh, "release");
        self.handles.remove(&fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(ino, offset, "readdir");

        let Some(node) = self.tree.get(ino) else {
            reply.error(FsError::InvalidInode(ino).to_errno());
            return;
        };
        if !node.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }

        let mut entries: Vec<(u64, FileType, &str)> = vec![
            (ino, FileType::Directory, "."),
            (node.parent, FileType::Directory, ".."),
        ];
        if let Some(children) = self.tree.children(ino) {
            for child in children {
                let kind = if child.is_dir() {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                entries.push((child.ino, kind, child.name.as_str()));
            }
        }

        for (i, (ino, kind, name)) in entries
            .iter()
            .enumerate()
            .skip(usize::try_from(offset).unwrap_or(0))
        {
            // reply.add returns true when the buffer is full.
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }
}

impl std::fmt::Debug for SecretFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFs")
            .field("secrets", &self.tree.secret_count())
            .field("cached", &self.cache.len())
            .field("open_handles", &self.handles.len())
            .finish()
    }
}
