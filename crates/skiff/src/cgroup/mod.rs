//! Cgroup v1 resource control.
//!
//! Each resource kind is a [`Subsystem`] living in its own v1 hierarchy. A
//! container's node is `<mount point>/skiff/<container name>`. The
//! [`CgroupManager`] fans every operation out to its subsystems in a fixed
//! order: cpuset, memory, cpu.

mod hierarchy;
mod manager;
mod subsystems;

pub use hierarchy::{CGROUP_ROOT_COMPONENT, Hierarchy, find_mount_point};
pub use manager::CgroupManager;
pub use subsystems::{CpuSubsystem, CpusetSubsystem, MemorySubsystem};

use skiff_common::{ResourceConfig, SkiffResult};

/// One cgroup v1 controller.
pub trait Subsystem: Send + Sync + std::fmt::Debug {
    /// Controller name as it appears in the mount options.
    fn name(&self) -> &'static str;

    /// Create the container's node if needed and write its limits.
    ///
    /// Unset values in `resources` leave the controller unconstrained.
    fn set(
        &self,
        hierarchy: &Hierarchy,
        container: &str,
        resources: &ResourceConfig,
    ) -> SkiffResult<()>;

    /// Move `pid` into the container's node. The node must already exist.
    fn apply(&self, hierarchy: &Hierarchy, container: &str, pid: i32) -> SkiffResult<()> {
        hierarchy.add_task(self.name(), container, pid)
    }

    /// Delete the container's node. A missing node is not an error.
    fn remove(&self, hierarchy: &Hierarchy, container: &str) -> SkiffResult<()> {
        hierarchy.remove(self.name(), container)
    }
}
