//! HTTP surface of the plugin, served over a Unix socket.
//!
//! Docker discovers the plugin through the socket under
//! `/run/docker/plugins/` and speaks plain HTTP POST with JSON bodies over
//! it. Every volume endpoint answers 200 with a [`VolumeResponse`] whose
//! `Err` field carries the failure, never an HTTP error status.
//!
//! Driver operations block (backend HTTP, directory IO, FUSE setup), so
//! each handler runs them on the blocking pool instead of the async
//! runtime's worker threads.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::UnixListener;
use tracing::{error, info};

use crate::driver::{DriverError, Mounter, SecretDriver};
use crate::protocol::{
    ActivateResponse, Capabilities, MountRequest, VolumeInfo, VolumeRequest, VolumeResponse,
};

/// Default socket path the Docker daemon scans for plugins.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/secretvol.sock";

/// Builds the plugin router around a shared driver.
pub fn router<M: Mounter>(driver: Arc<SecretDriver<M>>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create::<M>))
        .route("/VolumeDriver.Remove", post(remove::<M>))
        .route("/VolumeDriver.Path", post(path::<M>))
        .route("/VolumeDriver.Mount", post(mount::<M>))
        .route("/VolumeDriver.Unmount", post(unmount::<M>))
        .route("/VolumeDriver.Get", post(get::<M>))
        .route("/VolumeDriver.List", post(list::<M>))
        .route("/VolumeDriver.Capabilities", post(capabilities::<M>))
        .with_state(driver)
}

/// Binds the plugin socket and serves until `shutdown` resolves, then
/// removes the socket file.
///
/// A socket file left behind by a previous run is removed before binding;
/// only one plugin instance may own the path at a time.
pub async fn serve<M: Mounter>(
    driver: Arc<SecretDriver<M>>,
    socket: &Path,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if socket.exists() {
        info!(socket = %socket.display(), "removing stale plugin socket");
        std::fs::remove_file(socket)?;
    }
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket)?;
    info!(socket = %socket.display(), "plugin listening");

    let result = axum::serve(listener, router(driver))
        .with_graceful_shutdown(shutdown)
        .await;

    if let Err(e) = std::fs::remove_file(socket) {
        error!(socket = %socket.display(), error = %e, "failed to remove plugin socket");
    }
    result
}

/// Runs a blocking driver call on the blocking pool and folds the result
/// into the protocol envelope.
async fn run_blocking<T, F>(op: F, on_ok: impl FnOnce(T) -> VolumeResponse) -> Json<VolumeResponse>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DriverError> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(Ok(value)) => Json(on_ok(value)),
        Ok(Err(e)) => Json(VolumeResponse::error(e.to_string())),
        Err(e) => {
            error!(error = %e, "driver task panicked");
            Json(VolumeResponse::error("internal driver failure"))
        }
    }
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse::volume_driver())
}

async fn create<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    run_blocking(move || driver.create(&req.name), |()| VolumeResponse::ok()).await
}

async fn remove<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    run_blocking(move || driver.remove(&req.name), |()| VolumeResponse::ok()).await
}

async fn path<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    let mountpoint = driver.path(&req.name);
    Json(VolumeResponse::with_mountpoint(
        mountpoint.display().to_string(),
    ))
}

async fn mount<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<MountRequest>,
) -> Json<VolumeResponse> {
    run_blocking(
        move || driver.mount(&req.name),
        |mountpoint| VolumeResponse::with_mountpoint(mountpoint.display().to_string()),
    )
    .await
}

async fn unmount<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<MountRequest>,
) -> Json<VolumeResponse> {
    run_blocking(move || driver.unmount(&req.name), |()| VolumeResponse::ok()).await
}

async fn get<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
    Json(req): Json<VolumeRequest>,
) -> Json<VolumeResponse> {
    run_blocking(
        move || Ok(driver.get(&req.name)),
        |found: Option<(String, std::path::PathBuf)>| match found {
            Some((name, mountpoint)) => VolumeResponse {
                volume: Some(VolumeInfo {
                    name,
                    mountpoint: mountpoint.display().to_string(),
                }),
                ..VolumeResponse::default()
            },
            None => VolumeResponse::error("no such volume"),
        },
    )
    .await
}

async fn list<M: Mounter>(State(driver): State<Arc<SecretDriver<M>>>) -> Json<VolumeResponse> {
    run_blocking(
        move || driver.list(),
        |volumes| VolumeResponse {
            volumes: Some(
                volumes
                    .into_iter()
                    .map(|(name, mountpoint)| VolumeInfo {
                        name,
                        mountpoint: mountpoint.display().to_string(),
                    })
                    .collect(),
            ),
            ..VolumeResponse::default()
        },
    )
    .await
}

async fn capabilities<M: Mounter>(
    State(driver): State<Arc<SecretDriver<M>>>,
) -> Json<VolumeResponse> {
    Json(VolumeResponse {
        capabilities: Some(Capabilities {
            scope: driver.capabilities().to_string(),
        }),
        ..VolumeResponse::default()
    })
}
