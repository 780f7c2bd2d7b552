//! Storage backend implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`CsiIdentity`], [`CsiController`], and [`CsiNode`].
//!
//! [`CsiIdentity`]: crate::CsiIdentity
//! [`CsiController`]: crate::CsiController
//! [`CsiNode`]: crate::CsiNode

pub mod rclone;
