//! CSI Identity service trait.
//!
//! The Identity service lets the orchestrator discover which plugin it talks
//! to and whether it is ready.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Name and version of the plugin. Fixed for the process lifetime.
    fn plugin_info(&self) -> PluginInfo;

    /// Readiness probe. Plugins without start-up work are always ready.
    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    /// Advertise the capabilities supported by this plugin.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}

/// Whether `name` is a legal plugin name: at most 63 characters of domain
/// notation (alphanumerics, `-` and `.`), starting and ending alphanumeric.
pub fn is_valid_plugin_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= 63
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'.')
        }
        _ => false,
    }
}
