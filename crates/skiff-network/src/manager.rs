//! Network lifecycle and container attachment.

use std::net::Ipv4Addr;
use std::sync::Arc;

use skiff_common::{SkiffError, SkiffPaths, SkiffResult};

use crate::driver::DriverRegistry;
use crate::endpoint::Endpoint;
use crate::ipam::Ipam;
use crate::link;
use crate::netns;
use crate::network::{Network, NetworkStore};
use crate::portmap::{HostIptables, PortMapper, PortMapping, RuleRunner};
use crate::subnet::Subnet;

/// What the manager needs to know about a container to attach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLink {
    /// Container id, used to derive device names.
    pub id: String,
    /// Host pid of the container's init process.
    pub pid: i32,
    /// Port forwards to install.
    pub port_map: Vec<PortMapping>,
}

/// Creates networks and attaches containers to them.
#[derive(Debug, Clone)]
pub struct NetworkManager {
    store: NetworkStore,
    ipam: Ipam,
    drivers: DriverRegistry,
    rules: Arc<dyn RuleRunner>,
}

impl NetworkManager {
    /// Manager with the built-in drivers, persisting under `paths`.
    #[must_use]
    pub fn new(paths: &SkiffPaths) -> Self {
        Self::with_drivers(paths, DriverRegistry::with_defaults())
    }

    /// Manager with a custom driver set.
    #[must_use]
    pub fn with_drivers(paths: &SkiffPaths, drivers: DriverRegistry) -> Self {
        Self {
            store: NetworkStore::new(paths.networks()),
            ipam: Ipam::new(paths.ipam_table()),
            drivers,
            rules: Arc::new(HostIptables),
        }
    }

    /// Use `rules` for port forwarding instead of the host's `iptables`.
    #[must_use]
    pub fn with_rule_runner(mut self, rules: Arc<dyn RuleRunner>) -> Self {
        self.rules = rules;
        self
    }

    fn port_mapper(&self, ip: Ipv4Addr) -> PortMapper<'_> {
        PortMapper::new(ip, self.rules.as_ref())
    }

    /// The network record store.
    #[must_use]
    pub const fn store(&self) -> &NetworkStore {
        &self.store
    }

    /// The address allocator.
    #[must_use]
    pub const fn ipam(&self) -> &Ipam {
        &self.ipam
    }

    /// Create network `name` on `subnet` with `driver`.
    ///
    /// The first host address becomes the gateway and is allocated before
    /// the driver runs, so containers start at the second host address.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad name or subnet, an existing network, an
    /// unknown driver, or a failing driver. The gateway is released again
    /// on failure.
    pub async fn create(&self, driver: &str, subnet: &str, name: &str) -> SkiffResult<Network> {
        link::validate_name(name)?;
        if self.store.exists(name) {
            return Err(SkiffError::NetworkExists {
                name: name.to_string(),
            });
        }
        let subnet: Subnet = subnet.parse()?;
        let driver = self.drivers.get(driver)?;

        let gateway_ip = self.ipam.allocate(&subnet)?;
        let gateway = subnet.with_addr(gateway_ip);

        let created = match driver.create(gateway, name).await {
            Ok(network) => self.store.save(&network).map(|()| network),
            Err(e) => Err(e),
        };

        match created {
            Ok(network) => {
                tracing::info!(name, %gateway, driver = driver.name(), "Network created");
                Ok(network)
            }
            Err(e) => {
                if let Err(release) = self.ipam.release(&subnet, gateway_ip) {
                    tracing::warn!(name, error = %release, "Failed to release gateway");
                }
                Err(e)
            }
        }
    }

    /// All persisted networks, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the record directory cannot be listed.
    pub fn list(&self) -> SkiffResult<Vec<Network>> {
        self.store.load_all()
    }

    /// Delete network `name`: release its gateway, tear down its devices
    /// and drop its record.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::NetworkNotFound`] if there is no such network,
    /// or the driver's error.
    pub async fn remove(&self, name: &str) -> SkiffResult<()> {
        let network = self.store.load(name)?;
        let driver = self.drivers.get(&network.driver)?;

        if let Err(e) = self.ipam.release(&network.subnet(), network.gateway()) {
            tracing::warn!(name, error = %e, "Failed to release gateway");
        }
        driver.delete(&network).await?;
        self.store.remove(name)?;

        tracing::info!(name, "Network removed");
        Ok(())
    }

    /// Attach a running container to `network_name`.
    ///
    /// Returns the container's address with the network prefix, e.g.
    /// `172.18.0.2/24`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown, the subnet is full, or
    /// any device or port forwarding step fails. The device is deleted and
    /// the address released again on failure.
    pub async fn connect(&self, network_name: &str, container: &ContainerLink) -> SkiffResult<Subnet> {
        let network = self.store.load(network_name)?;
        let driver = self.drivers.get(&network.driver)?;
        let ip = self.ipam.allocate(&network.subnet())?;

        let mut endpoint = Endpoint::new(&container.id, &network, ip, container.port_map.clone());

        let attached = async {
            driver.connect(&network, &mut endpoint).await?;
            let device = endpoint.device.as_ref().ok_or_else(|| SkiffError::Internal {
                message: format!("driver {} created no device", driver.name()),
            })?;
            netns::attach(device, container.pid, endpoint.address(), network.gateway()).await?;
            self.port_mapper(ip).install(&endpoint.port_mappings)
        }
        .await;

        if let Err(e) = attached {
            if let Some(device) = &endpoint.device {
                if let Err(cleanup) = device.delete() {
                    tracing::debug!(host = %device.host, error = %cleanup, "Veth cleanup failed");
                }
            }
            if let Err(release) = self.ipam.release(&network.subnet(), ip) {
                tracing::warn!(%ip, error = %release, "Failed to release address");
            }
            return Err(e);
        }

        let address = endpoint.address();
        tracing::info!(network = network_name, container = %container.id, %address, "Container connected");
        Ok(address)
    }

    /// Detach a container: remove its port forwards, let the driver clean
    /// up and release `ip`.
    ///
    /// Every step runs even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the network record cannot be read, or the first
    /// error of the driver disconnect and the address release.
    pub async fn disconnect(
        &self,
        network_name: &str,
        container_id: &str,
        ip: Ipv4Addr,
        port_map: &[PortMapping],
    ) -> SkiffResult<()> {
        let network = self.store.load(network_name)?;

        self.port_mapper(ip).remove(port_map);

        let endpoint = Endpoint::new(container_id, &network, ip, port_map.to_vec());
        let detached = match self.drivers.get(&network.driver) {
            Ok(driver) => driver.disconnect(&network, &endpoint).await,
            Err(e) => {
                tracing::warn!(network = network_name, error = %e, "Skipping driver disconnect");
                Ok(())
            }
        };

        let released = self.ipam.release(&network.subnet(), ip);
        if let Err(e) = &released {
            tracing::warn!(network = network_name, %ip, error = %e, "Failed to release address");
        }

        detached.and(released)?;
        tracing::info!(network = network_name, %ip, "Container disconnected");
        Ok(())
    }
}
