//! End-to-end mount tests against a real FUSE mount.
//!
//! These require /dev/fuse and the fusermount helper, so they are gated
//! behind the `fuse-tests` feature:
//!
//! ```sh
//! cargo test -p secretvol-fuse --features fuse-tests
//! ```

#![cfg(feature = "fuse-tests")]

use std::sync::Arc;
use std::time::Duration;

use secretvol_core::testing::MemoryStore;
use secretvol_core::SecretStore;
use secretvol_fuse::{mount, SecretFs, SecretFsConfig};

fn demo_store() -> Arc<dyn SecretStore> {
    Arc::new(
        MemoryStore::new()
            .with("secret/app/db/password", b"hunter2".to_vec())
            .with("secret/app/db/username", b"admin".to_vec())
            .with("secret/app/api-key", b"k-123".to_vec()),
    )
}

#[test]
fn mount_read_unmount_roundtrip() {
    let mountpoint = tempfile::tempdir().expect("tempdir");
    let fs = SecretFs::new(demo_store(), &SecretFsConfig::new("secret/app")).expect("fs");

    let mut handle = mount(fs, mountpoint.path(), "app").expect("mount");
    assert!(handle.is_mounted());

    // Secrets materialize as readable files under the mountpoint.
    let value = std::fs::read(mountpoint.path().join("api-key")).expect("read api-key");
    assert_eq!(value, b"k-123");

    let value = std::fs::read(mountpoint.path().join("db/password")).expect("read password");
    assert_eq!(value, b"hunter2");

    // Directory listing reflects the key hierarchy.
    let mut names: Vec<String> = std::fs::read_dir(mountpoint.path())
        .expect("readdir")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["api-key".to_string(), "db".to_string()]);

    handle.unmount().expect("unmount");
    assert!(!handle.is_mounted());

    // The exposure is torn down: the mountpoint is an empty directory.
    let leftover: Vec<_> = std::fs::read_dir(mountpoint.path())
        .expect("readdir after unmount")
        .collect();
    assert!(leftover.is_empty());
}

#[test]
fn filesystem_is_read_only() {
    let mountpoint = tempfile::tempdir().expect("tempdir");
    let fs = SecretFs::new(demo_store(), &SecretFsConfig::new("secret/app")).expect("fs");
    let mut handle = mount(fs, mountpoint.path(), "ro").expect("mount");

    let err = std::fs::write(mountpoint.path().join("api-key"), b"overwrite").unwrap_err();
    let errno = err.raw_os_error().unwrap_or(0);
    assert!(
        errno == libc::EROFS || errno == libc::EACCES,
        "unexpected error: {err:?}"
    );

    handle.unmount().expect("unmount");
}

#[test]
fn fetch_failure_surfaces_as_read_error_only() {
    let store = Arc::new(
        MemoryStore::new()
            .with("secret/app/good", b"ok".to_vec())
            .with("secret/app/bad", b"never".to_vec()),
    );
    store.fail_path("secret/app/bad");

    let mountpoint = tempfile::tempdir().expect("tempdir");
    let store_dyn: Arc<dyn SecretStore> = store;
    let fs = SecretFs::new(store_dyn, &SecretFsConfig::new("secret/app")).expect("fs");
    let mut handle = mount(fs, mountpoint.path(), "partial").expect("mount");

    assert!(std::fs::read(mountpoint.path().join("bad")).is_err());
    assert_eq!(
        std::fs::read(mountpoint.path().join("good")).expect("good entry"),
        b"ok"
    );

    handle.unmount().expect("unmount");
}

#[test]
fn stale_values_refresh_on_next_open() {
    let store = Arc::new(MemoryStore::new().with("secret/app/rotating", b"v1".to_vec()));

    let mountpoint = tempfile::tempdir().expect("tempdir");
    let store_dyn: Arc<dyn SecretStore> = Arc::clone(&store) as Arc<dyn SecretStore>;
    let config = SecretFsConfig::new("secret/app").entry_ttl(Duration::from_millis(10));
    let fs = SecretFs::new(store_dyn, &config).expect("fs");
    let mut handle = mount(fs, mountpoint.path(), "ttl").expect("mount");

    let path = mountpoint.path().join("rotating");
    assert_eq!(std::fs::read(&path).expect("first read"), b"v1");

    store.put("secret/app/rotating", b"v2".to_vec());
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(std::fs::read(&path).expect("second read"), b"v2");

    handle.unmount().expect("unmount");
}
