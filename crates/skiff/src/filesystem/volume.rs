//! `HOST:CONTAINER` volume specs.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffResult};

/// A host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeSpec {
    /// Directory on the host. Created if missing.
    pub host: PathBuf,
    /// Path inside the container root.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parse an optional spec, treating an empty string as absent.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::InvalidVolume`] for a malformed spec.
    pub fn parse_optional(spec: Option<&str>) -> SkiffResult<Option<Self>> {
        match spec {
            None | Some("") => Ok(None),
            Some(spec) => spec.parse().map(Some),
        }
    }

    /// Where the volume lands under the container root `mnt`.
    #[must_use]
    pub fn target_in(&self, mnt: &Path) -> PathBuf {
        let relative: PathBuf = self
            .container
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        mnt.join(relative)
    }
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

impl FromStr for VolumeSpec {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SkiffError::InvalidVolume {
            spec: s.to_string(),
        };

        let parts: Vec<&str> = s.split(':').collect();
        let [host, container] = parts.as_slice() else {
            return Err(invalid());
        };
        if host.is_empty() || container.is_empty() {
            return Err(invalid());
        }

        let container = PathBuf::from(container);
        if container
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(invalid());
        }

        Ok(Self {
            host: PathBuf::from(host),
            container,
        })
    }
}

impl TryFrom<String> for VolumeSpec {
    type Error = SkiffError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VolumeSpec> for String {
    fn from(value: VolumeSpec) -> Self {
        value.to_string()
    }
}
