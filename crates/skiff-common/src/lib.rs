//! # skiff-common
//!
//! Shared utilities and types for the Skiff container runtime.
//!
//! This crate provides common functionality used across all Skiff crates:
//! - Container name validation and id generation
//! - Standard filesystem paths
//! - Cgroup resource configuration
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;
pub mod resource;

pub use error::{SkiffError, SkiffResult};
pub use id::{ContainerId, ContainerName};
pub use paths::SkiffPaths;
pub use resource::ResourceConfig;
