//! Filesystem operations for containers.
//!
//! This module handles:
//! - the per-container overlay workspace (image + read-write layer)
//! - host volume bind mounts
//! - the in-namespace root switch performed by init

mod mounts;
mod pivot;
mod rootfs;
mod volume;
mod workspace;

pub use mounts::{bind_mount, mount_overlay, unmount_if_mounted};
pub use pivot::{PIVOT_DIR, pivot_root};
pub use rootfs::setup_rootfs;
pub use volume::VolumeSpec;
pub use workspace::Workspace;
