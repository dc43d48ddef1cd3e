//! Protocol tests driving the plugin router in-process.
//!
//! Requests go through the real axum router via `tower::ServiceExt`, so
//! these cover routing, JSON shapes, and the driver boundary without a
//! socket. Failures must come back as 200 responses with a non-empty `Err`
//! field, the way the daemon expects.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use secretvol::driver::{MountHandle, Mounter, SecretDriver};
use secretvol::server::router;
use secretvol_core::testing::MemoryStore;
use secretvol_core::{BackendRegistry, SecretStore, StoreConfig};
use secretvol_fuse::MountError;

struct FakeHandle(std::path::PathBuf);

impl MountHandle for FakeHandle {
    fn mountpoint(&self) -> &Path {
        &self.0
    }

    fn unmount(&mut self) -> Result<(), MountError> {
        Ok(())
    }
}

struct FakeMounter;

impl Mounter for FakeMounter {
    fn mount(
        &self,
        _store: Arc<dyn SecretStore>,
        mountpoint: &Path,
        _name: &str,
    ) -> Result<Box<dyn MountHandle>, MountError> {
        Ok(Box::new(FakeHandle(mountpoint.to_path_buf())))
    }
}

fn test_app(root: &Path, backend: &str) -> axum::Router {
    let mut backends = BackendRegistry::new();
    backends.register("mem", |_config| {
        Ok(Arc::new(MemoryStore::new().with("secret/db/key", b"v".to_vec()))
            as Arc<dyn SecretStore>)
    });
    let driver = Arc::new(SecretDriver::new(
        root,
        StoreConfig::new(backend, "mem://local"),
        backends,
        FakeMounter,
    ));
    router(driver)
}

async fn post(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn activate_advertises_the_volume_driver() {
    let root = TempDir::new().unwrap();
    let (status, body) = post(
        test_app(root.path(), "mem"),
        "/Plugin.Activate",
        json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
}

#[tokio::test]
async fn create_path_and_get_agree_on_the_mountpoint() {
    let root = TempDir::new().unwrap();
    let app = test_app(root.path(), "mem");
    let expected = root.path().join("db").display().to_string();

    let (status, body) = post(app.clone(), "/VolumeDriver.Create", json!({"Name": "db"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Err"], "");

    let (_, body) = post(app.clone(), "/VolumeDriver.Path", json!({"Name": "db"})).await;
    assert_eq!(body["Mountpoint"], expected);
    assert_eq!(body["Err"], "");

    let (_, body) = post(app, "/VolumeDriver.Get", json!({"Name": "db"})).await;
    assert_eq!(body["Err"], "");
    assert_eq!(body["Volume"]["Name"], "db");
    assert_eq!(body["Volume"]["Mountpoint"], expected);
}

#[tokio::test]
async fn mount_returns_the_mountpoint_and_unmount_releases_it() {
    let root = TempDir::new().unwrap();
    let app = test_app(root.path(), "mem");

    let (status, body) = post(
        app.clone(),
        "/VolumeDriver.Mount",
        json!({"Name": "db", "ID": "caller-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Err"], "");
    assert_eq!(body["Mountpoint"], root.path().join("db").display().to_string());

    let (_, body) = post(
        app,
        "/VolumeDriver.Unmount",
        json!({"Name": "db", "ID": "caller-1"}),
    )
    .await;
    assert_eq!(body["Err"], "");
}

#[tokio::test]
async fn failures_come_back_as_ok_with_err_set() {
    let root = TempDir::new().unwrap();
    // Backend id with no registered constructor: mount must fail in-band.
    let app = test_app(root.path(), "consul");

    let (status, body) = post(app.clone(), "/VolumeDriver.Mount", json!({"Name": "db"})).await;
    assert_eq!(status, StatusCode::OK);
    let err = body["Err"].as_str().unwrap();
    assert!(err.contains("consul"), "got {err:?}");

    // Unmounting a volume that is not mounted is also an in-band error.
    let (status, body) = post(app, "/VolumeDriver.Unmount", json!({"Name": "db"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["Err"], "");
}

#[tokio::test]
async fn get_of_unknown_volume_reports_no_such_volume() {
    let root = TempDir::new().unwrap();
    let (status, body) = post(
        test_app(root.path(), "mem"),
        "/VolumeDriver.Get",
        json!({"Name": "ghost"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Err"], "no such volume");
    assert!(body.get("Volume").is_none());
}

#[tokio::test]
async fn list_returns_all_volumes_sorted() {
    let root = TempDir::new().unwrap();
    let app = test_app(root.path(), "mem");

    post(app.clone(), "/VolumeDriver.Create", json!({"Name": "beta"})).await;
    post(app.clone(), "/VolumeDriver.Create", json!({"Name": "alpha"})).await;

    let (_, body) = post(app, "/VolumeDriver.List", json!({})).await;
    assert_eq!(body["Err"], "");
    let names: Vec<&str> = body["Volumes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["Name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn capabilities_report_local_scope() {
    let root = TempDir::new().unwrap();
    let (_, body) = post(
        test_app(root.path(), "mem"),
        "/VolumeDriver.Capabilities",
        json!({}),
    )
    .await;

    assert_eq!(body["Capabilities"]["Scope"], "local");
}

#[tokio::test]
async fn remove_of_mounted_volume_is_rejected_in_band() {
    let root = TempDir::new().unwrap();
    let app = test_app(root.path(), "mem");

    post(app.clone(), "/VolumeDriver.Mount", json!({"Name": "db"})).await;

    let (status, body) = post(app.clone(), "/VolumeDriver.Remove", json!({"Name": "db"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["Err"], "");

    // The volume survives the rejected removal.
    let (_, body) = post(app, "/VolumeDriver.Get", json!({"Name": "db"})).await;
    assert_eq!(body["Err"], "");
}
