//! Container runtime orchestration.
//!
//! [`Runtime`] ties the pieces together: it builds the workspace, launches
//! init in fresh namespaces, applies cgroup limits, attaches the network and
//! keeps a [`ContainerInfo`] record per container.

mod container;
mod exec;
pub mod image;
mod info;

pub use container::{RunOptions, RunOutcome, Runtime};
pub use exec::parse_environ;
pub use info::{ContainerInfo, ContainerStatus, InfoStore};
