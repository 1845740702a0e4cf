//! Host-to-container TCP port forwarding via iptables DNAT.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffResult};

use crate::command;

/// One `HOST_PORT:CONTAINER_PORT` forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
}

impl PortMapping {
    /// Create a mapping.
    #[must_use]
    pub const fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }

    /// Parse every spec in `specs`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::InvalidPortMapping`] for the first bad spec.
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> SkiffResult<Vec<Self>> {
        specs.iter().map(|s| s.as_ref().parse()).collect()
    }

    /// iptables arguments for the DNAT rule. `action` is `-A` or `-D`.
    #[must_use]
    pub fn rule_args(&self, action: &str, container_ip: Ipv4Addr) -> Vec<String> {
        [
            "-t",
            "nat",
            action,
            "PREROUTING",
            "-p",
            "tcp",
            "-m",
            "tcp",
            "--dport",
        ]
        .iter()
        .map(ToString::to_string)
        .chain([
            self.host_port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            format!("{container_ip}:{}", self.container_port),
        ])
        .collect()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

impl FromStr for PortMapping {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SkiffError::InvalidPortMapping {
            spec: s.to_string(),
        };

        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        let host_port = host.parse().map_err(|_| invalid())?;
        let container_port = container.parse().map_err(|_| invalid())?;
        Ok(Self::new(host_port, container_port))
    }
}

impl TryFrom<String> for PortMapping {
    type Error = SkiffError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(value: PortMapping) -> Self {
        value.to_string()
    }
}

/// Runs firewall rule commands.
pub trait RuleRunner: fmt::Debug + Send + Sync {
    /// Run one `iptables` invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be applied.
    fn iptables(&self, args: &[String]) -> SkiffResult<()>;
}

/// Applies rules with the host's `iptables` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostIptables;

impl RuleRunner for HostIptables {
    fn iptables(&self, args: &[String]) -> SkiffResult<()> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command::iptables(&args)
    }
}

/// Installs and removes the DNAT rules for one container address.
#[derive(Debug, Clone, Copy)]
pub struct PortMapper<'a> {
    container_ip: Ipv4Addr,
    rules: &'a dyn RuleRunner,
}

impl<'a> PortMapper<'a> {
    /// Create a mapper forwarding to `container_ip` through `rules`.
    #[must_use]
    pub const fn new(container_ip: Ipv4Addr, rules: &'a dyn RuleRunner) -> Self {
        Self {
            container_ip,
            rules,
        }
    }

    /// Install one rule per mapping.
    ///
    /// # Errors
    ///
    /// Returns the first failing rule's error. Rules added before it are
    /// removed again.
    pub fn install(&self, mappings: &[PortMapping]) -> SkiffResult<()> {
        for (added, mapping) in mappings.iter().enumerate() {
            tracing::debug!(%mapping, container_ip = %self.container_ip, "Adding port mapping");
            if let Err(e) = self.apply("-A", mapping) {
                tracing::error!(%mapping, error = %e, "Failed to add port mapping");
                self.remove(&mappings[..added]);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove the rule for each mapping, logging failures.
    pub fn remove(&self, mappings: &[PortMapping]) {
        for mapping in mappings {
            tracing::debug!(%mapping, container_ip = %self.container_ip, "Removing port mapping");
            if let Err(e) = self.apply("-D", mapping) {
                tracing::warn!(%mapping, error = %e, "Failed to remove port mapping");
            }
        }
    }

    fn apply(&self, action: &str, mapping: &PortMapping) -> SkiffResult<()> {
        self.rules
            .iptables(&mapping.rule_args(action, self.container_ip))
    }
}
