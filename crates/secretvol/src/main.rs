//! secretvol - Docker volume plugin backed by a secret store.
//!
//! Usage: secretvol --backend vault --addr https://vault.example.com:8200 \
//!            --store-opt token=... [--store-opt prefix=secret]
//!
//! Serves the volume plugin protocol on a Unix socket under
//! `/run/docker/plugins/` until interrupted, then unmounts every volume it
//! mounted before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secretvol::driver::{FuseMounter, SecretDriver};
use secretvol::server;
use secretvol_core::{parse_store_opts, BackendRegistry, StoreConfig};

const DEFAULT_ROOT: &str = "/var/lib/docker/volumes/secretvol";

#[derive(Parser)]
#[command(name = "secretvol")]
#[command(about = "Docker volume plugin exposing secret-store contents as volumes")]
#[command(version)]
struct Cli {
    /// Secret backend to use (e.g. vault)
    #[arg(long, env = "SECRETVOL_BACKEND")]
    backend: String,

    /// Backend address, e.g. https://vault.example.com:8200
    #[arg(long, env = "SECRETVOL_ADDR")]
    addr: String,

    /// Backend option as key=value; may be repeated (token=..., prefix=..., timeout=...)
    #[arg(long = "store-opt", value_name = "KEY=VALUE")]
    store_opts: Vec<String>,

    /// Directory holding volume mountpoints
    #[arg(long, env = "SECRETVOL_ROOT", default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Plugin socket path
    #[arg(long, default_value = server::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "secretvol starting");

    let backends = BackendRegistry::with_defaults();
    if !backends.contains(&cli.backend) {
        anyhow::bail!(
            "unknown backend {:?}; available: {}",
            cli.backend,
            backends.backend_ids().join(", ")
        );
    }

    let opts = parse_store_opts(&cli.store_opts);
    let prefix = opts
        .get("prefix")
        .cloned()
        .unwrap_or_else(|| "secret".to_string());
    let store_config = StoreConfig {
        backend: cli.backend.clone(),
        addr: cli.addr.clone(),
        opts,
    };

    std::fs::create_dir_all(&cli.root)
        .with_context(|| format!("failed to create volume root {}", cli.root.display()))?;

    let driver = Arc::new(SecretDriver::new(
        &cli.root,
        store_config,
        backends,
        FuseMounter::new(prefix),
    ));

    info!(
        backend = %cli.backend,
        addr = %cli.addr,
        root = %cli.root.display(),
        "serving volume plugin"
    );

    server::serve(driver.clone(), &cli.socket, shutdown_signal())
        .await
        .context("plugin server failed")?;

    info!("shutting down, unmounting volumes");
    driver.unmount_all();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
