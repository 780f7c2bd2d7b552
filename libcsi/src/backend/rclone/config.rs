//! Startup configuration of the rclone backend.
//!
//! [`BridgeConfig`] is deserialised once (the `csi-rclone` binary reads it
//! from YAML) and turned into immutable settings injected into the backend.
//! Every field has a default, so an empty document is a valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::executor::ExecutorSettings;
use super::params::FlagSet;
use crate::error::CsiError;

/// Default name of the credential bundle used when a request has no secrets.
pub const DEFAULT_SECRET_NAME: &str = "rclone-secret";
/// Default root of the directory-backed credential store.
pub const DEFAULT_SECRETS_DIR: &str = "/etc/csi-rclone/secrets";

/// External tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Binary name or path.
    pub program: String,
    /// Arguments placed after the target on every call.
    pub global_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let settings = ExecutorSettings::default();
        Self {
            program: settings.program,
            global_args: settings.global_args,
        }
    }
}

/// Complete backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub tool: ToolConfig,
    /// Lowest-precedence flags, overridden by secrets and parameters.
    pub default_flags: BTreeMap<String, String>,
    /// Flags appended to every create. The S3 ACL defaults have no effect on
    /// `rclone mkdir`; they are kept for compatibility.
    pub create_post_flags: BTreeMap<String, String>,
    /// `purge` exit codes treated as "already deleted".
    pub absent_exit_codes: Vec<i32>,
    /// Credential bundle used when a request carries no secrets.
    pub default_secret_name: String,
    /// Root of the directory-backed credential store.
    pub secrets_dir: PathBuf,
    /// Upper bound on one rclone run. Unset means wait indefinitely.
    pub operation_timeout_secs: Option<u64>,
    /// Run create/delete on the same target one at a time.
    pub serialize_same_target: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let settings = ExecutorSettings::default();
        Self {
            tool: ToolConfig::default(),
            default_flags: BTreeMap::new(),
            create_post_flags: settings
                .create_post_flags
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
            absent_exit_codes: settings.absent_exit_codes,
            default_secret_name: DEFAULT_SECRET_NAME.to_owned(),
            secrets_dir: PathBuf::from(DEFAULT_SECRETS_DIR),
            operation_timeout_secs: None,
            serialize_same_target: false,
        }
    }
}

impl BridgeConfig {
    /// Validate the flag tables and produce executor settings.
    pub fn executor_settings(&self) -> Result<ExecutorSettings, CsiError> {
        if self.tool.program.trim().is_empty() {
            return Err(CsiError::Internal("tool.program must not be empty".into()));
        }
        Ok(ExecutorSettings {
            program: self.tool.program.clone(),
            global_args: self.tool.global_args.clone(),
            default_flags: flag_table("default_flags", &self.default_flags)?,
            create_post_flags: flag_table("create_post_flags", &self.create_post_flags)?,
            absent_exit_codes: self.absent_exit_codes.clone(),
        })
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

fn flag_table(name: &str, table: &BTreeMap<String, String>) -> Result<FlagSet, CsiError> {
    FlagSet::from_layer(name, table.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}
