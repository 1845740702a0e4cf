//! Cgroup manager implementation.

use skiff_common::{ResourceConfig, SkiffResult};

use super::Subsystem;
use super::hierarchy::Hierarchy;
use super::subsystems::{CpuSubsystem, CpusetSubsystem, MemorySubsystem};

/// Manages one container's cgroup nodes across all controllers.
///
/// Operations run over the subsystems in order and stop at the first error.
/// Earlier subsystems are not rolled back; callers run [`destroy`] on any
/// failure path.
///
/// [`destroy`]: CgroupManager::destroy
#[derive(Debug)]
pub struct CgroupManager {
    /// Container name, the node's directory name.
    container: String,
    /// Where the hierarchies live.
    hierarchy: Hierarchy,
    /// Controllers, in application order.
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl CgroupManager {
    /// Manager for `container` on the host's mounted hierarchies.
    pub fn new(container: &str) -> Self {
        Self::with_hierarchy(container, Hierarchy::default())
    }

    /// Manager for `container` on a specific hierarchy.
    pub fn with_hierarchy(container: &str, hierarchy: Hierarchy) -> Self {
        Self {
            container: container.to_string(),
            hierarchy,
            subsystems: vec![
                Box::new(CpusetSubsystem),
                Box::new(MemorySubsystem),
                Box::new(CpuSubsystem),
            ],
        }
    }

    /// Controller names in application order.
    pub fn subsystem_names(&self) -> Vec<&'static str> {
        self.subsystems.iter().map(|s| s.name()).collect()
    }

    /// Create the nodes and write the limits.
    pub fn set(&self, resources: &ResourceConfig) -> SkiffResult<()> {
        tracing::debug!(container = %self.container, ?resources, "Setting cgroup limits");
        for subsystem in &self.subsystems {
            subsystem.set(&self.hierarchy, &self.container, resources)?;
        }
        Ok(())
    }

    /// Move `pid` into every node.
    pub fn apply(&self, pid: i32) -> SkiffResult<()> {
        for subsystem in &self.subsystems {
            subsystem.apply(&self.hierarchy, &self.container, pid)?;
        }
        tracing::debug!(container = %self.container, pid, "Applied cgroups");
        Ok(())
    }

    /// Remove every node, logging failures and carrying on.
    pub fn destroy(&self) {
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.remove(&self.hierarchy, &self.container) {
                tracing::warn!(
                    container = %self.container,
                    subsystem = subsystem.name(),
                    error = %e,
                    "Failed to remove cgroup"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn resources() -> ResourceConfig {
        ResourceConfig::from_flags(
            Some("100m".to_string()),
            Some("512".to_string()),
            Some("0".to_string()),
        )
    }

    #[test]
    fn fan_out_order() {
        let manager = CgroupManager::new("c1");
        assert_eq!(manager.subsystem_names(), ["cpuset", "memory", "cpu"]);
    }

    #[test]
    fn set_apply_destroy() {
        let temp = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("c1", Hierarchy::Fixed(temp.path().into()));

        manager.set(&resources()).unwrap();
        manager.apply(777).unwrap();
        for subsystem in ["cpuset", "memory", "cpu"] {
            let tasks = temp.path().join(subsystem).join("skiff/c1/tasks");
            assert_eq!(std::fs::read_to_string(tasks).unwrap(), "777");
        }

        manager.destroy();
        for subsystem in ["cpuset", "memory", "cpu"] {
            assert!(!temp.path().join(subsystem).join("skiff/c1").exists());
        }
        // Idempotent.
        manager.destroy();
    }

    #[test]
    fn failure_keeps_earlier_subsystems() {
        let temp = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("c1", Hierarchy::Fixed(temp.path().into()));

        // A directory where the memory limit file should be makes the write fail.
        std::fs::create_dir_all(temp.path().join("memory/skiff/c1/memory.limit_in_bytes")).unwrap();

        let err = manager.set(&resources()).unwrap_err();
        assert!(err.to_string().contains("memory.limit_in_bytes"));

        let cpuset = temp.path().join("cpuset/skiff/c1");
        assert_eq!(std::fs::read_to_string(cpuset.join("cpuset.mems")).unwrap(), "0");
        assert_eq!(std::fs::read_to_string(cpuset.join("cpuset.cpus")).unwrap(), "0");
        assert!(!temp.path().join("cpu/skiff/c1").exists());

        manager.destroy();
        assert!(!cpuset.exists());
        assert!(!temp.path().join("memory/skiff/c1").exists());
    }

    #[test]
    fn apply_before_set_fails() {
        let temp = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("c1", Hierarchy::Fixed(temp.path().into()));
        assert!(manager.apply(1).is_err());
    }
}
