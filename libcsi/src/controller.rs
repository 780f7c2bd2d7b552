//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion and capability validation. Attach/detach, expansion and volume
//! lookup belong to the trait as well so that a plugin states explicitly
//! whether it supports them.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest, CreateVolumeRequest, DeleteVolumeRequest, ValidationResult,
    Volume, VolumeCapability, VolumeId,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Repeating the call with identical arguments must yield the same
    /// `volume_id` and must not fail just because the volume already exists.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    ///
    /// Deleting a volume that is already gone is not an error.
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError>;

    /// Check whether the given capabilities are supported for the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidationResult, CsiError>;

    /// Advertise the controller RPCs this plugin implements.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// Attach a volume to a node, returning the publish context.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError>;

    /// Detach a volume from a node.
    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError>;

    /// Grow a volume, returning the new capacity in bytes.
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<u64, CsiError>;

    /// Look up a single volume.
    async fn controller_get_volume(&self, volume_id: &VolumeId) -> Result<Volume, CsiError>;
}
