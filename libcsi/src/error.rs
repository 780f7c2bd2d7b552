//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! Every variant maps onto one [`StatusCode`] of the orchestrator's fixed
//! status taxonomy through [`CsiError::code`]. Messages carry human-readable
//! diagnostics only, never credential values.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status classes understood by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCode {
    /// The caller sent something malformed. Retrying the same request is
    /// pointless.
    InvalidArgument,
    /// A server-side failure (configuration, external tool).
    Internal,
    /// The RPC is not supported by this plugin.
    Unimplemented,
    /// The plugin could not be reached.
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Internal => "Internal",
            Self::Unimplemented => "Unimplemented",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(s)
    }
}

/// The closed set of RPCs this plugin deliberately does not implement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnsupportedOperation {
    ControllerPublishVolume,
    ControllerUnpublishVolume,
    ControllerExpandVolume,
    ControllerGetVolume,
    NodeStageVolume,
    NodeUnstageVolume,
    NodePublishVolume,
    NodeUnpublishVolume,
}

impl fmt::Display for UnsupportedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage parameters or flag keys could not be turned into a remote
    /// target.
    #[error("invalid storage parameters: {0}")]
    InvalidStorageParameters(String),

    /// The request carried no secrets and the default credential bundle could
    /// not be fetched.
    #[error("credentials {name} unavailable: {reason}")]
    CredentialUnavailable {
        /// Name of the credential bundle that was looked up.
        name: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// The external tool exited unsuccessfully.
    #[error("failed to {operation} volume {target}: {diagnostic}")]
    ExternalOperationFailed {
        /// Lifecycle operation, e.g. `create`.
        operation: String,
        /// Volume name or id the operation was issued for.
        target: String,
        /// Captured tool output and command shape.
        diagnostic: String,
    },

    /// The RPC is not supported by this plugin.
    #[error("{0} is not implemented")]
    Unimplemented(UnsupportedOperation),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::InvalidStorageParameters`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn parameters<E: fmt::Display>(e: E) -> Self {
        Self::InvalidStorageParameters(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Status class reported to the orchestrator.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::InvalidStorageParameters(_) => {
                StatusCode::InvalidArgument
            }
            Self::CredentialUnavailable { .. }
            | Self::ExternalOperationFailed { .. }
            | Self::Internal(_) => StatusCode::Internal,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::TransportError(_) => StatusCode::Unavailable,
        }
    }
}
