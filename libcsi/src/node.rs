//! CSI Node service trait.
//!
//! A node plugin mounts volumes for Pods on the worker it runs on. Stage and
//! publish make a volume visible at a global path and then inside the Pod;
//! unpublish and unstage undo them in reverse order.
//!
//! The mount RPCs have provided implementations that answer
//! [`CsiError::Unimplemented`], so a controller-only plugin only supplies
//! [`CsiNode::get_info`] and [`CsiNode::node_get_capabilities`].

use async_trait::async_trait;

use crate::error::{CsiError, UnsupportedOperation};
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service: per-node mount lifecycle plus discovery.
#[async_trait]
pub trait CsiNode: Send + Sync {
    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(UnsupportedOperation::NodeStageVolume))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(UnsupportedOperation::NodeUnstageVolume))
    }

    async fn publish_volume(&self, _req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(UnsupportedOperation::NodePublishVolume))
    }

    async fn unpublish_volume(
        &self,
        _volume_id: &VolumeId,
        _target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(UnsupportedOperation::NodeUnpublishVolume))
    }

    /// Identity of the node this service runs on.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// Node RPCs this plugin implements. Empty for controller-only plugins.
    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;
}
