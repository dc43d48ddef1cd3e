//! Hierarchical inode table for a volume's secret key space.
//!
//! The tree is built once per mount from the backend's key listing. Inodes
//! are dense and never recycled for the life of a mount; the kernel's
//! lookup counts need no tracking because the tree is immutable while
//! mounted.

use std::collections::{BTreeMap, HashMap};

use secretvol_core::{SecretStore, StoreError};
use tracing::debug;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// What an inode points at.
#[derive(Debug)]
pub enum NodeKind {
    /// Directory with named children.
    Directory {
        /// Child name → inode, ordered for stable readdir.
        children: BTreeMap<String, u64>,
    },
    /// A secret entry; `path` is the full logical path in the backend.
    Secret {
        /// Backend path fetched when this entry is read.
        path: String,
    },
}

/// One entry in the tree.
#[derive(Debug)]
pub struct Node {
    /// This node's inode.
    pub ino: u64,
    /// Parent inode (the root is its own parent).
    pub parent: u64,
    /// Name within the parent directory.
    pub name: String,
    /// Directory or secret.
    pub kind: NodeKind,
}

impl Node {
    /// True for directories (including the root).
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// The backend path if this is a secret entry.
    pub fn secret_path(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Secret { path } => Some(path),
            NodeKind::Directory { .. } => None,
        }
    }
}

/// Immutable inode table mapping the volume's key space.
#[derive(Debug)]
pub struct SecretTree {
    nodes: HashMap<u64, Node>,
    secret_count: usize,
}

impl SecretTree {
    /// Builds a tree from secret paths relative to `namespace`.
    ///
    /// Intermediate directories are created implicitly; `a/b/c` produces
    /// directories `a` and `a/b` and a secret entry `c` whose backend path
    /// is `namespace/a/b/c`.
    pub fn build(namespace: &str, relative_paths: &[String]) -> Self {
        let namespace = namespace.trim_matches('/');
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node {
                ino: ROOT_INODE,
                parent: ROOT_INODE,
                name: String::new(),
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        );

        let mut next_ino = ROOT_INODE + 1;
        let mut secret_count = 0;

        for rel in relative_paths {
            let rel = rel.trim_matches('/');
            if rel.is_empty() {
                continue;
            }

            let mut parent = ROOT_INODE;
            let segments: Vec<&str> = rel.split('/').collect();
            for (i, segment) in segments.iter().enumerate() {
                let last = i + 1 == segments.len();

                // A backend can hold a secret and a prefix under the same
                // name; the secret wins and the nested keys are skipped.
                let existing = match &nodes[&parent].kind {
                    NodeKind::Directory { children } => children.get(*segment).copied(),
                    NodeKind::Secret { .. } => break,
                };
                if let Some(ino) = existing {
                    parent = ino;
                    continue;
                }

                let ino = next_ino;
                next_ino += 1;

                let kind = if last {
                    secret_count += 1;
                    let path = if namespace.is_empty() {
                        rel.to_string()
                    } else {
                        format!("{namespace}/{rel}")
                    };
                    NodeKind::Secret { path }
                } else {
                    NodeKind::Directory {
                        children: BTreeMap::new(),
                    }
                };

                nodes.insert(
                    ino,
                    Node {
                        ino,
                        parent,
                        name: (*segment).to_string(),
                        kind,
                    },
                );
                if let NodeKind::Directory { children } =
                    &mut nodes.get_mut(&parent).expect("parent exists").kind
                {
                    children.insert((*segment).to_string(), ino);
                }
                parent = ino;
            }
        }

        debug!(
            secrets = secret_count,
            inodes = nodes.len(),
            "built secret tree"
        );
        Self {
            nodes,
            secret_count,
        }
    }

    /// Returns the node for `ino`.
    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    /// Resolves `name` within the directory `parent`.
    pub fn lookup(&self, parent: u64, name: &str) -> Option<&Node> {
        match &self.nodes.get(&parent)?.kind {
            NodeKind::Directory { children } => children.get(name).and_then(|ino| self.get(*ino)),
            NodeKind::Secret { .. } => None,
        }
    }

    /// Ordered children of the directory `ino`.
    pub fn children(&self, ino: u64) -> Option<impl Iterator<Item = &Node>> {
        match &self.nodes.get(&ino)?.kind {
            NodeKind::Directory { children } => {
                Some(children.values().filter_map(|ino| self.get(*ino)))
            }
            NodeKind::Secret { .. } => None,
        }
    }

    /// Total number of inodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the tree holds no entries besides the root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Number of secret entries.
    pub fn secret_count(&self) -> usize {
        self.secret_count
    }
}

/// Recursively lists every secret path reachable under `namespace`.
///
/// Returned paths are relative to the namespace. Listing failures abort the
/// walk; the caller treats that as a failed mount.
pub fn collect_paths(
    store: &dyn SecretStore,
    namespace: &str,
) -> Result<Vec<String>, StoreError> {
    let namespace = namespace.trim_matches('/');
    let mut paths = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(rel_prefix) = pending.pop() {
        let full_prefix = join_path(namespace, &rel_prefix);
        for key in store.list(&full_prefix)? {
            match key.strip_suffix('/') {
                Some(dir) => pending.push(join_path(&rel_prefix, dir)),
                None => paths.push(join_path(&rel_prefix, &key)),
            }
        }
    }

    paths.sort();
    Ok(paths)
}

fn join_path(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}
