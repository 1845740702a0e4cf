//! Network definitions and their on-disk records.

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffResult};

use crate::subnet::Subnet;

/// A bridge-backed virtual network.
///
/// Serialized as `{"name", "driver", "ip_net_str"}`, where `ip_net_str` is
/// the gateway address with the range's prefix, e.g. `172.18.0.1/24`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name, also the bridge device name.
    pub name: String,
    /// Driver that owns the network.
    pub driver: String,
    /// Gateway address plus prefix.
    #[serde(rename = "ip_net_str")]
    pub ip_range: Subnet,
}

impl Network {
    /// Describe a network whose gateway is `gateway`.
    pub fn new(name: impl Into<String>, driver: impl Into<String>, gateway: Subnet) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            ip_range: gateway,
        }
    }

    /// The bridge's own address.
    #[must_use]
    pub const fn gateway(&self) -> Ipv4Addr {
        self.ip_range.addr()
    }

    /// The range with host bits cleared, as the IPAM keys it.
    #[must_use]
    pub fn subnet(&self) -> Subnet {
        self.ip_range.normalized()
    }
}

/// One JSON file per network under a fixed directory.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    dir: PathBuf,
}

impl NetworkStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record file for a network.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether a record exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Write a network record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn save(&self, network: &Network) -> SkiffResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&network.name);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, network)?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| SkiffError::os("persist", &path, e.error))?;

        tracing::debug!(name = %network.name, path = %path.display(), "Saved network");
        Ok(())
    }

    /// Load one network record.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::NetworkNotFound`] if there is no record.
    pub fn load(&self, name: &str) -> SkiffResult<Network> {
        let path = self.path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SkiffError::NetworkNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(SkiffError::os("read", &path, e)),
        }
    }

    /// Load every record in the directory, sorted by name.
    ///
    /// Unreadable records are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn load_all(&self) -> SkiffResult<Vec<Network>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SkiffError::os("read_dir", &self.dir, e)),
        };

        let mut networks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || is_temp_file(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.load(name) {
                Ok(network) => networks.push(network),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping network record"),
            }
        }

        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Remove a network record. A missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, name: &str) -> SkiffResult<()> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SkiffError::os("remove", &path, e)),
        }
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(".tmp"))
}
