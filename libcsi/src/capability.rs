//! Static capability registry.
//!
//! The registry is filled once at startup and only read afterwards, so it can
//! be shared between request handlers behind an [`Arc`](std::sync::Arc)
//! without locking.

use tracing::info;

use crate::types::{AccessMode, ControllerCapability, NodeCapability, PluginCapability};

/// Ordered, immutable set of capabilities advertised by a plugin.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    access_modes: Vec<AccessMode>,
    controller: Vec<ControllerCapability>,
    node: Vec<NodeCapability>,
    plugin: Vec<PluginCapability>,
}

impl CapabilityRegistry {
    /// Start an empty registry.
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    /// The capability set of the rclone plugin: multi-node read-write volumes
    /// that can be created and deleted, and no node RPCs.
    pub fn rclone() -> Self {
        Self::builder()
            .access_modes([AccessMode::MultiNodeMultiWriter])
            .controller([ControllerCapability::CreateDeleteVolume])
            .node([])
            .plugin([PluginCapability::ControllerService])
            .build()
    }

    pub fn access_modes(&self) -> &[AccessMode] {
        &self.access_modes
    }

    pub fn controller(&self) -> &[ControllerCapability] {
        &self.controller
    }

    pub fn node(&self) -> &[NodeCapability] {
        &self.node
    }

    pub fn plugin(&self) -> &[PluginCapability] {
        &self.plugin
    }

    /// Whether volumes may be requested with `mode`.
    pub fn supports_access_mode(&self, mode: AccessMode) -> bool {
        self.access_modes.contains(&mode)
    }
}

/// Collects capabilities before the registry is frozen.
#[derive(Debug, Default)]
pub struct CapabilityRegistryBuilder {
    inner: CapabilityRegistry,
}

impl CapabilityRegistryBuilder {
    pub fn access_modes(mut self, modes: impl IntoIterator<Item = AccessMode>) -> Self {
        for mode in modes {
            info!(?mode, "enabling volume access mode");
            push_unique(&mut self.inner.access_modes, mode);
        }
        self
    }

    pub fn controller(mut self, caps: impl IntoIterator<Item = ControllerCapability>) -> Self {
        for cap in caps {
            info!(?cap, "enabling controller service capability");
            push_unique(&mut self.inner.controller, cap);
        }
        self
    }

    pub fn node(mut self, caps: impl IntoIterator<Item = NodeCapability>) -> Self {
        for cap in caps {
            info!(?cap, "enabling node service capability");
            push_unique(&mut self.inner.node, cap);
        }
        self
    }

    pub fn plugin(mut self, caps: impl IntoIterator<Item = PluginCapability>) -> Self {
        for cap in caps {
            info!(?cap, "enabling plugin capability");
            push_unique(&mut self.inner.plugin, cap);
        }
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        self.inner
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}
