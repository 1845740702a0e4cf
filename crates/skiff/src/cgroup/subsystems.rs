//! The cpuset, memory and cpu controllers.

use skiff_common::{ResourceConfig, SkiffResult};

use super::Subsystem;
use super::hierarchy::{Hierarchy, write_control};

/// `cpuset`: pins the container to memory node 0 and a cpu list.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn set(
        &self,
        hierarchy: &Hierarchy,
        container: &str,
        resources: &ResourceConfig,
    ) -> SkiffResult<()> {
        let path = hierarchy.cgroup_path(self.name(), container, true)?;

        // A fresh cpuset node has empty mems/cpus and rejects tasks.
        write_control(&path.join("cpuset.mems"), "0")?;
        write_control(&path.join("cpuset.cpus"), "0")?;

        if let Some(cpus) = &resources.cpuset {
            write_control(&path.join("cpuset.cpus"), cpus)?;
            tracing::debug!(container, cpus, "Set cpuset.cpus");
        }
        Ok(())
    }
}

/// `memory`: hard limit in `memory.limit_in_bytes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(
        &self,
        hierarchy: &Hierarchy,
        container: &str,
        resources: &ResourceConfig,
    ) -> SkiffResult<()> {
        let path = hierarchy.cgroup_path(self.name(), container, true)?;
        if let Some(limit) = &resources.memory_limit {
            write_control(&path.join("memory.limit_in_bytes"), limit)?;
            tracing::debug!(container, limit, "Set memory.limit_in_bytes");
        }
        Ok(())
    }
}

/// `cpu`: relative weight in `cpu.shares`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(
        &self,
        hierarchy: &Hierarchy,
        container: &str,
        resources: &ResourceConfig,
    ) -> SkiffResult<()> {
        let path = hierarchy.cgroup_path(self.name(), container, true)?;
        if let Some(shares) = &resources.cpu_share {
            write_control(&path.join("cpu.shares"), shares)?;
            tracing::debug!(container, shares, "Set cpu.shares");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read(path: std::path::PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn cpuset_always_pins_node_zero() {
        let temp = tempdir().unwrap();
        let hierarchy = Hierarchy::Fixed(temp.path().to_path_buf());
        let node = temp.path().join("cpuset/skiff/c1");

        CpusetSubsystem
            .set(&hierarchy, "c1", &ResourceConfig::default())
            .unwrap();
        assert_eq!(read(node.join("cpuset.mems")), "0");
        assert_eq!(read(node.join("cpuset.cpus")), "0");

        let resources = ResourceConfig {
            cpuset: Some("0-1".to_string()),
            ..ResourceConfig::default()
        };
        CpusetSubsystem.set(&hierarchy, "c1", &resources).unwrap();
        assert_eq!(read(node.join("cpuset.cpus")), "0-1");
    }

    #[test]
    fn unset_limits_write_nothing() {
        let temp = tempdir().unwrap();
        let hierarchy = Hierarchy::Fixed(temp.path().to_path_buf());
        let empty = ResourceConfig::default();

        MemorySubsystem.set(&hierarchy, "c1", &empty).unwrap();
        CpuSubsystem.set(&hierarchy, "c1", &empty).unwrap();

        assert!(temp.path().join("memory/skiff/c1").is_dir());
        assert!(!temp.path().join("memory/skiff/c1/memory.limit_in_bytes").exists());
        assert!(!temp.path().join("cpu/skiff/c1/cpu.shares").exists());
    }

    #[test]
    fn limits_are_written_verbatim() {
        let temp = tempdir().unwrap();
        let hierarchy = Hierarchy::Fixed(temp.path().to_path_buf());
        let resources = ResourceConfig::from_flags(
            Some("100m".to_string()),
            Some("512".to_string()),
            None,
        );

        MemorySubsystem.set(&hierarchy, "c1", &resources).unwrap();
        CpuSubsystem.set(&hierarchy, "c1", &resources).unwrap();

        assert_eq!(
            read(temp.path().join("memory/skiff/c1/memory.limit_in_bytes")),
            "100m"
        );
        assert_eq!(read(temp.path().join("cpu/skiff/c1/cpu.shares")), "512");
    }
}
