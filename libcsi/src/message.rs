//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the orchestrator side and the plugin via QUIC
//! bi-directional streams.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(DeleteVolumeRequest),
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    /// Query controller capabilities (Controller).
    ControllerGetCapabilities,
    /// Attach a volume to a node (Controller, unsupported by rclone).
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node (Controller, unsupported by rclone).
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    /// Grow a volume (Controller, unsupported by rclone).
    ControllerExpandVolume(ControllerExpandVolumeRequest),
    /// Look up one volume (Controller, unsupported by rclone).
    ControllerGetVolume(VolumeId),

    /// Stage a volume at a global path (Node).
    StageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume (Node).
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Publish a staged volume into a Pod (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query node info (Node).
    GetNodeInfo,
    /// Query node capabilities (Node).
    NodeGetCapabilities,

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created, or looked up.
    VolumeCreated(Volume),
    /// Result of capability validation.
    CapabilitiesValidated(ValidationResult),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Publish context returned by `ControllerPublishVolume`.
    PublishContext(HashMap<String, String>),
    /// New capacity in bytes after expansion.
    Capacity(u64),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

// Secrets never reach `Display`; it is what the transport logs.
impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({})", volume_id)
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({})", req.volume_id)
            }
            Self::ControllerUnpublishVolume(req) => {
                write!(f, "ControllerUnpublishVolume({})", req.volume_id)
            }
            Self::ControllerExpandVolume(req) => {
                write!(f, "ControllerExpandVolume({})", req.volume_id)
            }
            Self::ControllerGetVolume(id) => write!(f, "ControllerGetVolume({})", id),
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({})", volume_id),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({})", volume_id)
            }
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::CapabilitiesValidated(r) => {
                write!(f, "CapabilitiesValidated({})", r.confirmed)
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::PublishContext(ctx) => write!(f, "PublishContext(count={})", ctx.len()),
            Self::Capacity(c) => write!(f, "Capacity({})", c),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({}: {})", e.code(), e),
        }
    }
}
