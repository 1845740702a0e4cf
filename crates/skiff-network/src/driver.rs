//! Network driver abstraction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use skiff_common::{SkiffError, SkiffResult};

use crate::bridge::BridgeDriver;
use crate::endpoint::Endpoint;
use crate::network::Network;
use crate::subnet::Subnet;

/// A backend that realises networks on the host.
#[async_trait]
pub trait NetworkDriver: Send + Sync + std::fmt::Debug {
    /// Registry key, e.g. `bridge`.
    fn name(&self) -> &str;

    /// Create the host devices for `name`, addressed as `gateway`.
    async fn create(&self, gateway: Subnet, name: &str) -> SkiffResult<Network>;

    /// Tear down the host devices of `network`.
    async fn delete(&self, network: &Network) -> SkiffResult<()>;

    /// Create and attach the host side of `endpoint`.
    ///
    /// On success `endpoint.device` holds the created pair.
    async fn connect(&self, network: &Network, endpoint: &mut Endpoint<'_>) -> SkiffResult<()>;

    /// Detach the host side of `endpoint`.
    async fn disconnect(&self, network: &Network, endpoint: &Endpoint<'_>) -> SkiffResult<()>;
}

/// Drivers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn NetworkDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in drivers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BridgeDriver::new()));
        registry
    }

    /// Add or replace a driver under its own name.
    pub fn register(&mut self, driver: Arc<dyn NetworkDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Look a driver up.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::DriverNotFound`] for unknown names.
    pub fn get(&self, name: &str) -> SkiffResult<Arc<dyn NetworkDriver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| SkiffError::DriverNotFound {
                driver: name.to_string(),
            })
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
