//! # libcsi: CSI over QUIC, with an rclone provisioning backend
//!
//! `libcsi` implements a lightweight [Container Storage Interface][csi] layer
//! that uses QUIC (via [`quinn`]) instead of gRPC for transport, and a
//! controller backend that provisions remote-storage volumes by driving
//! [rclone] as a subprocess. It follows the RK8s conventions (Tokio async
//! runtime, `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, credentials, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its orchestrator status classes. |
//! | [`capability`] | [`CapabilityRegistry`], the fixed capability set of a plugin. |
//! | [`credentials`] | Request-or-default credential resolution. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | Storage backends (rclone). |
//!
//! [csi]: https://github.com/container-storage-interface/spec
//! [rclone]: https://rclone.org

pub mod backend;
pub mod capability;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use capability::CapabilityRegistry;
pub use controller::CsiController;
pub use credentials::{CredentialResolver, CredentialStore};
pub use error::{CsiError, StatusCode, UnsupportedOperation};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
