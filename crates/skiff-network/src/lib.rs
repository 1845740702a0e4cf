//! # skiff-network
//!
//! Networking for Skiff containers: a persistent bitmap address allocator,
//! a bridge network driver built from `ip` and `iptables`, and the routine
//! that moves a veth peer into a running container's network namespace.

#![warn(missing_docs)]

pub mod bridge;
mod command;
pub mod driver;
pub mod endpoint;
pub mod ipam;
pub mod link;
pub mod manager;
pub mod netns;
pub mod network;
pub mod portmap;
pub mod subnet;
pub mod veth;

pub use bridge::BridgeDriver;
pub use driver::{DriverRegistry, NetworkDriver};
pub use endpoint::Endpoint;
pub use ipam::{AllocationTable, Ipam};
pub use manager::{ContainerLink, NetworkManager};
pub use netns::{NetnsGuard, current_netns_id};
pub use network::{Network, NetworkStore};
pub use portmap::{HostIptables, PortMapper, PortMapping, RuleRunner};
pub use subnet::Subnet;
pub use veth::VethPair;
