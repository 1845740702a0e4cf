//! Linux bridge network driver.
//!
//! Each network is one bridge device named after the network, carrying the
//! gateway address, plus a MASQUERADE rule so containers can reach the
//! outside world.

use async_trait::async_trait;
use skiff_common::{SkiffError, SkiffResult};

use crate::driver::NetworkDriver;
use crate::endpoint::Endpoint;
use crate::network::Network;
use crate::subnet::Subnet;
use crate::veth::VethPair;
use crate::{command, link};

/// Registry name of the bridge driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Bridge-backed networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeDriver;

impl BridgeDriver {
    /// Create the driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// iptables arguments for the masquerade rule. `action` is `-A` or `-D`.
    #[must_use]
    pub fn masquerade_args(action: &str, subnet: &Subnet, bridge: &str) -> Vec<String> {
        [
            "-t",
            "nat",
            action,
            "POSTROUTING",
            "-s",
            &subnet.normalized().to_string(),
            "!",
            "-o",
            bridge,
            "-j",
            "MASQUERADE",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn masquerade(action: &str, subnet: &Subnet, bridge: &str) -> SkiffResult<()> {
        let args = Self::masquerade_args(action, subnet, bridge);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command::iptables(&args)
    }

    fn init_bridge(name: &str, gateway: &Subnet) -> SkiffResult<()> {
        if link::exists(name) {
            tracing::debug!(name, "Bridge already exists");
        } else {
            tracing::debug!(name, "Creating bridge");
            command::ip(&["link", "add", "name", name, "type", "bridge"])?;
        }

        link::set_ip(name, gateway)?;
        link::set_up(name)?;
        Self::masquerade("-A", gateway, name)
    }
}

async fn blocking<F, T>(f: F) -> SkiffResult<T>
where
    F: FnOnce() -> SkiffResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SkiffError::Internal {
            message: format!("link task failed: {e}"),
        })?
}

#[async_trait]
impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &str {
        BRIDGE_DRIVER
    }

    async fn create(&self, gateway: Subnet, name: &str) -> SkiffResult<Network> {
        let bridge = name.to_string();
        blocking(move || Self::init_bridge(&bridge, &gateway)).await?;

        tracing::info!(name, %gateway, "Bridge network created");
        Ok(Network::new(name, BRIDGE_DRIVER, gateway))
    }

    async fn delete(&self, network: &Network) -> SkiffResult<()> {
        let name = network.name.clone();
        let range = network.ip_range;
        blocking(move || {
            if let Err(e) = Self::masquerade("-D", &range, &name) {
                tracing::warn!(name, error = %e, "Failed to remove masquerade rule");
            }
            if link::exists(&name) {
                link::delete(&name)
            } else {
                tracing::debug!(name, "Bridge already gone");
                Ok(())
            }
        })
        .await?;

        tracing::info!(name = %network.name, "Bridge network deleted");
        Ok(())
    }

    async fn connect(&self, network: &Network, endpoint: &mut Endpoint<'_>) -> SkiffResult<()> {
        let host = endpoint.host_ifname();
        let peer = endpoint.peer_ifname();
        let bridge = network.name.clone();

        let pair = blocking(move || VethPair::create(&host, &peer, &bridge)).await?;
        tracing::debug!(endpoint = %endpoint.id, host = %pair.host, peer = %pair.peer, "Endpoint connected");
        endpoint.device = Some(pair);
        Ok(())
    }

    async fn disconnect(&self, network: &Network, endpoint: &Endpoint<'_>) -> SkiffResult<()> {
        // The veth pair goes away with the container's namespace.
        tracing::debug!(network = %network.name, endpoint = %endpoint.id, "Endpoint disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_rule() {
        let gateway: Subnet = "172.18.0.1/24".parse().unwrap();
        assert_eq!(
            BridgeDriver::masquerade_args("-A", &gateway, "testnet").join(" "),
            "-t nat -A POSTROUTING -s 172.18.0.0/24 ! -o testnet -j MASQUERADE"
        );
    }

    #[tokio::test]
    async fn disconnect_is_a_noop() {
        let network = Network::new("testnet", BRIDGE_DRIVER, "172.18.0.1/24".parse().unwrap());
        let endpoint = Endpoint::new(
            "a1b2c3d4e5",
            &network,
            std::net::Ipv4Addr::new(172, 18, 0, 2),
            vec![],
        );
        BridgeDriver::new()
            .disconnect(&network, &endpoint)
            .await
            .unwrap();
    }
}
