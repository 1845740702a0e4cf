//! Locating cgroup v1 hierarchies and editing their control files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use skiff_common::{SkiffError, SkiffResult};

/// Directory under each hierarchy that holds Skiff's containers.
pub const CGROUP_ROOT_COMPONENT: &str = "skiff";

/// Mount table consulted for hierarchy discovery.
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Where the per-controller hierarchies are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// Discover each controller's mount point from a mountinfo file.
    MountInfo(PathBuf),
    /// Every controller is a directory under this root.
    Fixed(PathBuf),
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::MountInfo(PathBuf::from(MOUNTINFO))
    }
}

impl Hierarchy {
    /// Mount point of `subsystem`'s hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Config`] if the controller is not mounted.
    pub fn mount_point(&self, subsystem: &str) -> SkiffResult<PathBuf> {
        match self {
            Self::Fixed(root) => Ok(root.join(subsystem)),
            Self::MountInfo(path) => {
                let table =
                    std::fs::read_to_string(path).map_err(|e| SkiffError::os("read", path, e))?;
                find_mount_point(&table, subsystem).ok_or_else(|| SkiffError::Config {
                    message: format!("cgroup v1 controller '{subsystem}' is not mounted"),
                })
            }
        }
    }

    /// The container's node for `subsystem`, creating it when `create` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing, or the node is missing
    /// and `create` is not set, or it cannot be created.
    pub fn cgroup_path(&self, subsystem: &str, container: &str, create: bool) -> SkiffResult<PathBuf> {
        let path = self
            .mount_point(subsystem)?
            .join(CGROUP_ROOT_COMPONENT)
            .join(container);

        match std::fs::metadata(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::NotFound && create => {
                std::fs::create_dir_all(&path).map_err(|e| {
                    if e.kind() == ErrorKind::PermissionDenied {
                        SkiffError::PermissionDenied {
                            operation: format!("create cgroup {}", path.display()),
                        }
                    } else {
                        SkiffError::os("mkdir", &path, e)
                    }
                })?;
                tracing::debug!(subsystem, container, path = %path.display(), "Created cgroup");
                Ok(path)
            }
            Err(e) => Err(SkiffError::os("stat", &path, e)),
        }
    }

    /// Write `pid` into the node's `tasks` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or the write fails.
    pub fn add_task(&self, subsystem: &str, container: &str, pid: i32) -> SkiffResult<()> {
        let path = self.cgroup_path(subsystem, container, false)?;
        write_control(&path.join("tasks"), &pid.to_string())?;
        tracing::debug!(subsystem, container, pid, "Added task to cgroup");
        Ok(())
    }

    /// Remove the node. A node that is already gone is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the node exists but cannot be removed.
    pub fn remove(&self, subsystem: &str, container: &str) -> SkiffResult<()> {
        let path = self
            .mount_point(subsystem)?
            .join(CGROUP_ROOT_COMPONENT)
            .join(container);

        let result = match std::fs::remove_dir(&path) {
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => std::fs::remove_dir_all(&path),
            other => other,
        };

        match result {
            Ok(()) => {
                tracing::debug!(subsystem, container, "Removed cgroup");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SkiffError::os("rmdir", &path, e)),
        }
    }
}

/// Write one control file.
pub(super) fn write_control(path: &Path, value: &str) -> SkiffResult<()> {
    tracing::trace!(path = %path.display(), value, "Writing cgroup file");
    std::fs::write(path, value).map_err(|e| SkiffError::os("write", path, e))
}

/// Find the mount point of the v1 hierarchy carrying `subsystem` in a
/// `/proc/<pid>/mountinfo` table.
///
/// Lines look like
/// `34 25 0:30 / /sys/fs/cgroup/memory rw,nosuid - cgroup cgroup rw,memory`:
/// the fifth field is the mount point and the last field lists the
/// controllers.
#[must_use]
pub fn find_mount_point(mountinfo: &str, subsystem: &str) -> Option<PathBuf> {
    mountinfo.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(' ').collect();
        let mount_point = fields.get(4)?;
        let options = fields.last()?;
        options
            .split(',')
            .any(|opt| opt == subsystem)
            .then(|| PathBuf::from(mount_point))
    })
}
