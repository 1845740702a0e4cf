//! A container's attachment point to a network.

use std::net::Ipv4Addr;

use crate::network::Network;
use crate::portmap::PortMapping;
use crate::subnet::Subnet;
use crate::veth::VethPair;

/// Characters of the endpoint id used in device names.
const DEVICE_ID_LEN: usize = 5;

/// Prefix of the container-side veth name.
const PEER_PREFIX: &str = "cif-";

/// One container's attachment to a [`Network`].
///
/// The endpoint borrows its network: networks outlive the containers
/// attached to them.
#[derive(Debug, Clone)]
pub struct Endpoint<'a> {
    /// `"{container_id}-{network}"`.
    pub id: String,
    /// Allocated address.
    pub ip: Ipv4Addr,
    /// MAC address, when one was assigned.
    pub mac: Option<String>,
    /// Host-to-container port forwards.
    pub port_mappings: Vec<PortMapping>,
    /// Veth pair, once the driver has created it.
    pub device: Option<VethPair>,
    /// The network this endpoint belongs to.
    pub network: &'a Network,
}

impl<'a> Endpoint<'a> {
    /// Describe the endpoint for `container_id` on `network`.
    pub fn new(
        container_id: &str,
        network: &'a Network,
        ip: Ipv4Addr,
        port_mappings: Vec<PortMapping>,
    ) -> Self {
        Self {
            id: format!("{container_id}-{}", network.name),
            ip,
            mac: None,
            port_mappings,
            device: None,
            network,
        }
    }

    fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(DEVICE_ID_LEN)
            .map_or(self.id.len(), |(i, _)| i);
        &self.id[..end]
    }

    /// Host-side veth name, attached to the bridge.
    #[must_use]
    pub fn host_ifname(&self) -> String {
        self.short_id().to_string()
    }

    /// Container-side veth name, moved into the container namespace.
    #[must_use]
    pub fn peer_ifname(&self) -> String {
        format!("{PEER_PREFIX}{}", self.short_id())
    }

    /// The allocated address with the network's prefix, e.g. `172.18.0.2/24`.
    #[must_use]
    pub const fn address(&self) -> Subnet {
        self.network.ip_range.with_addr(self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MAX_IFNAME_LEN;

    #[test]
    fn device_names_are_truncated() {
        let network = Network::new("testnet", "bridge", "172.18.0.1/24".parse().unwrap());
        let ep = Endpoint::new("a1b2c3d4e5", &network, Ipv4Addr::new(172, 18, 0, 2), vec![]);

        assert_eq!(ep.id, "a1b2c3d4e5-testnet");
        assert_eq!(ep.host_ifname(), "a1b2c");
        assert_eq!(ep.peer_ifname(), "cif-a1b2c");
        assert!(ep.peer_ifname().len() <= MAX_IFNAME_LEN);
        assert_eq!(ep.address().to_string(), "172.18.0.2/24");
    }

    #[test]
    fn short_ids_are_kept_whole() {
        let network = Network::new("n", "bridge", "10.0.0.1/8".parse().unwrap());
        let ep = Endpoint::new("ab", &network, Ipv4Addr::new(10, 0, 0, 2), vec![]);
        assert_eq!(ep.host_ifname(), "ab-n");
    }
}
