//! Virtual ethernet pair management.

use skiff_common::SkiffResult;

use crate::{command, link};

/// Virtual ethernet pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Host-side interface name.
    pub host: String,
    /// Container-side interface name.
    pub peer: String,
}

impl VethPair {
    /// Create a veth pair, enslave the host end to `bridge` and bring it up.
    ///
    /// # Errors
    ///
    /// Returns an error if any `ip` step fails. A half-created pair is
    /// deleted before returning.
    pub fn create(host: &str, peer: &str, bridge: &str) -> SkiffResult<Self> {
        tracing::debug!(host, peer, bridge, "Creating veth pair");

        command::ip(&["link", "add", host, "type", "veth", "peer", "name", peer])?;
        let pair = Self {
            host: host.to_string(),
            peer: peer.to_string(),
        };

        let attach = link::set_master(host, bridge).and_then(|()| link::set_up(host));
        if let Err(e) = attach {
            if let Err(cleanup) = pair.delete() {
                tracing::warn!(host, error = %cleanup, "Failed to clean up veth pair");
            }
            return Err(e);
        }

        Ok(pair)
    }

    /// Move the container side into the network namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip link set netns` fails.
    pub fn move_to_netns(&self, pid: i32) -> SkiffResult<()> {
        tracing::debug!(interface = %self.peer, pid, "Moving to netns");
        command::ip(&["link", "set", &self.peer, "netns", &pid.to_string()])
    }

    /// Delete the pair. Removing either end removes both.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip link delete` fails.
    pub fn delete(&self) -> SkiffResult<()> {
        tracing::debug!(host = %self.host, "Deleting veth pair");
        link::delete(&self.host)
    }
}
