//! `csi-rclone`: CSI controller plugin that provisions and removes
//! remote-storage volumes by running rclone.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::backend::rclone::{DRIVER_NAME, RcloneBackend};
use libcsi::transport::server::CsiServer;
use libcsi::transport::tls;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, load_bridge_config};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(
        driver = DRIVER_NAME,
        version = env!("CARGO_PKG_VERSION"),
        node_id = %args.node_id,
        "starting driver"
    );

    let bridge = load_bridge_config(args.config.as_deref())?;
    let backend = RcloneBackend::from_config(&args.node_id, &bridge)
        .context("failed to build rclone backend")?;
    let tls = tls::server_config_from_pem(&args.tls_cert, &args.tls_key)
        .context("failed to load TLS material")?;
    let server = CsiServer::new(args.endpoint, tls, Arc::new(backend))?;

    tokio::select! {
        res = server.serve() => res?,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            server.shutdown();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
