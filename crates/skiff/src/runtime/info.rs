//! Per-container metadata records.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffPaths, SkiffResult};
use skiff_network::{PortMapping, Subnet};

use crate::filesystem::VolumeSpec;

/// Timestamp format of `createTime`.
const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle state as shown by `ps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Init has been started and not stopped.
    Running,
    /// Stopped with `skiff stop`.
    Stopped,
    /// The command exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
        })
    }
}

/// What is known about one container, stored as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Host pid of init, cleared once stopped.
    pub pid: Option<i32>,
    /// Generated id.
    pub id: String,
    /// Name, also the record directory.
    pub name: String,
    /// The command line as given.
    pub command: String,
    /// Local creation time.
    #[serde(rename = "createTime")]
    pub create_time: String,
    /// Lifecycle state.
    pub status: ContainerStatus,
    /// Host volume, if any.
    #[serde(default)]
    pub volume: Option<VolumeSpec>,
    /// Published ports.
    #[serde(default)]
    pub port_map: Vec<PortMapping>,
    /// Address with prefix on the attached network.
    #[serde(default)]
    pub ip_addr: Option<Subnet>,
    /// Attached network.
    #[serde(default)]
    pub network: Option<String>,
}

impl ContainerInfo {
    /// A fresh record stamped with the current local time.
    #[must_use]
    pub fn new(id: &str, name: &str, pid: i32, command: &[String]) -> Self {
        Self {
            pid: Some(pid),
            id: id.to_string(),
            name: name.to_string(),
            command: command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: None,
            port_map: Vec::new(),
            ip_addr: None,
            network: None,
        }
    }
}

/// Reads and writes container records under `<runtime>/containers`.
#[derive(Debug, Clone)]
pub struct InfoStore {
    paths: SkiffPaths,
}

impl InfoStore {
    /// Create a store over `paths`.
    #[must_use]
    pub const fn new(paths: SkiffPaths) -> Self {
        Self { paths }
    }

    /// Directory of container `name`.
    #[must_use]
    pub fn info_dir(&self, name: &str) -> PathBuf {
        self.paths.container_info_dir(name)
    }

    /// Log file of container `name`.
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.paths.container_log(name)
    }

    /// Whether a record for `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.paths.container_config(name).is_file()
    }

    /// Store a new record, marking it running.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn record(&self, info: &mut ContainerInfo) -> SkiffResult<()> {
        info.status = ContainerStatus::Running;
        let dir = self.info_dir(&info.name);
        std::fs::create_dir_all(&dir).map_err(|e| SkiffError::os("mkdir", &dir, e))?;
        self.write(info)?;
        tracing::debug!(name = %info.name, pid = ?info.pid, "Container recorded");
        Ok(())
    }

    /// Overwrite the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] if there is no record.
    pub fn update(&self, name: &str, info: &ContainerInfo) -> SkiffResult<()> {
        if !self.exists(name) {
            return Err(SkiffError::ContainerNotFound {
                name: name.to_string(),
            });
        }
        self.write(info)
    }

    fn write(&self, info: &ContainerInfo) -> SkiffResult<()> {
        let path = self.paths.container_config(&info.name);
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&path, json).map_err(|e| SkiffError::os("write", &path, e))
    }

    /// Load the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] if there is no record, or
    /// a serialization error for a corrupt one.
    pub fn get_by_name(&self, name: &str) -> SkiffResult<ContainerInfo> {
        let path = self.paths.container_config(name);
        let json = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SkiffError::ContainerNotFound {
                    name: name.to_string(),
                }
            } else {
                SkiffError::os("read", &path, e)
            }
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Pid of a running container.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] if there is no record and
    /// [`SkiffError::Config`] if the container has no live pid.
    pub fn get_pid_by_name(&self, name: &str) -> SkiffResult<i32> {
        self.get_by_name(name)?.pid.ok_or_else(|| SkiffError::Config {
            message: format!("container {name} is not running"),
        })
    }

    /// Every readable record, sorted by creation time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the records directory exists but cannot be
    /// listed.
    pub fn list_all(&self) -> SkiffResult<Vec<ContainerInfo>> {
        let dir = self.paths.containers();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SkiffError::os("read dir", &dir, e)),
        };

        let mut containers = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get_by_name(&name) {
                Ok(info) => containers.push(info),
                Err(e) => tracing::warn!(name, error = %e, "Skipping unreadable container record"),
            }
        }
        containers.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.name.cmp(&b.name)));
        Ok(containers)
    }

    /// Delete the record directory of `name`, log file included.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, name: &str) -> SkiffResult<()> {
        let dir = self.info_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(name, "Container record removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SkiffError::os("remove", &dir, e)),
        }
    }
}
