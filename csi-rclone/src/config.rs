//! csi-rclone startup configuration.
//!
//! Startup parameters come from the command line, each with an environment
//! variable fallback:
//! - `CSI_NODE_ID`: node identity reported by `NodeGetInfo`.
//! - `CSI_ENDPOINT`: socket address the QUIC server listens on.
//!   Defaults to `127.0.0.1:10000`.
//! - `CSI_RCLONE_CONFIG`: optional YAML file holding a [`BridgeConfig`].
//! - `CSI_TLS_CERT` / `CSI_TLS_KEY`: PEM certificate chain and key.
//!
//! The YAML file is read once; the resulting configuration is passed down by
//! value and never changes while the process runs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::backend::rclone::config::BridgeConfig;

/// CSI controller plugin provisioning remote storage through rclone.
#[derive(Debug, Parser)]
#[command(name = "csi-rclone", version)]
pub struct Args {
    /// Node identity.
    #[arg(long = "nodeid", env = "CSI_NODE_ID")]
    pub node_id: String,

    /// Local listen address.
    #[arg(long, env = "CSI_ENDPOINT", default_value = "127.0.0.1:10000")]
    pub endpoint: SocketAddr,

    /// YAML bridge configuration. Built-in defaults are used when absent.
    #[arg(long, env = "CSI_RCLONE_CONFIG")]
    pub config: Option<PathBuf>,

    /// PEM certificate chain presented to clients.
    #[arg(long, env = "CSI_TLS_CERT")]
    pub tls_cert: PathBuf,

    /// PEM private key matching `--tls-cert`.
    #[arg(long, env = "CSI_TLS_KEY")]
    pub tls_key: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Read the bridge configuration, falling back to defaults without a file.
pub fn load_bridge_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_bridge_config(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn parse_bridge_config(raw: &str) -> Result<BridgeConfig> {
    // An empty file deserialises to `null`, which means "all defaults".
    if raw.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }
    let config: BridgeConfig = serde_yaml::from_str(raw)?;
    config.executor_settings()?;
    Ok(config)
}
