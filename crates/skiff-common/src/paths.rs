//! Standard filesystem paths for Skiff.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for image and layer data.
pub static SKIFF_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("SKIFF_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/skiff"))
});

/// Default runtime directory for container records and network state.
pub static SKIFF_RUNTIME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("SKIFF_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/skiff"))
});

/// Name of the per-container metadata file.
pub const CONTAINER_CONFIG_NAME: &str = "config.json";

/// Name of the per-container log file.
pub const CONTAINER_LOG_NAME: &str = "container.log";

/// Standard paths used by the Skiff runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkiffPaths {
    /// Root data directory (default: /var/lib/skiff).
    pub root: PathBuf,
    /// Runtime directory (default: /var/run/skiff).
    pub runtime: PathBuf,
}

impl SkiffPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    ///
    /// The runtime directory is placed under `<root>/run`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runtime = root.join("run");
        Self { root, runtime }
    }

    /// Override the runtime directory.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = runtime.into();
        self
    }

    fn overlay(&self) -> PathBuf {
        self.root.join("overlay2")
    }

    /// Directory holding unpacked images.
    #[must_use]
    pub fn images(&self) -> PathBuf {
        self.overlay().join("image")
    }

    /// Read-only lower layer for an image.
    #[must_use]
    pub fn image(&self, image: &str) -> PathBuf {
        self.images().join(image)
    }

    /// Read-write upper layer for a container.
    #[must_use]
    pub fn container_rw(&self, name: &str) -> PathBuf {
        self.overlay().join("rw").join(name)
    }

    /// Overlay work directory for a container.
    #[must_use]
    pub fn container_work(&self, name: &str) -> PathBuf {
        self.overlay().join("work").join(name)
    }

    /// Merged mount point (the container root) for a container.
    #[must_use]
    pub fn container_mnt(&self, name: &str) -> PathBuf {
        self.overlay().join("mnt").join(name)
    }

    /// Directory holding all container records.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.runtime.join("containers")
    }

    /// Record directory for a specific container.
    #[must_use]
    pub fn container_info_dir(&self, name: &str) -> PathBuf {
        self.containers().join(name)
    }

    /// Container metadata file.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container_info_dir(name).join(CONTAINER_CONFIG_NAME)
    }

    /// Container log file.
    #[must_use]
    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container_info_dir(name).join(CONTAINER_LOG_NAME)
    }

    /// Network state directory.
    #[must_use]
    pub fn network(&self) -> PathBuf {
        self.runtime.join("network")
    }

    /// Directory holding one record file per network.
    #[must_use]
    pub fn networks(&self) -> PathBuf {
        self.network().join("instances")
    }

    /// Persisted IPAM allocation table.
    #[must_use]
    pub fn ipam_table(&self) -> PathBuf {
        self.network().join("ipam").join("subnet.json")
    }

    /// Create the directories every command expects to exist.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.images())?;
        std::fs::create_dir_all(self.overlay().join("rw"))?;
        std::fs::create_dir_all(self.overlay().join("work"))?;
        std::fs::create_dir_all(self.overlay().join("mnt"))?;
        std::fs::create_dir_all(self.containers())?;
        std::fs::create_dir_all(self.networks())?;
        Ok(())
    }
}

impl Default for SkiffPaths {
    fn default() -> Self {
        Self {
            root: SKIFF_ROOT.clone(),
            runtime: SKIFF_RUNTIME_DIR.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_paths() {
        let paths = SkiffPaths {
            root: PathBuf::from("/var/lib/skiff"),
            runtime: PathBuf::from("/var/run/skiff"),
        };
        assert_eq!(
            paths.image("busybox"),
            PathBuf::from("/var/lib/skiff/overlay2/image/busybox")
        );
        assert_eq!(
            paths.container_rw("web"),
            PathBuf::from("/var/lib/skiff/overlay2/rw/web")
        );
        assert_eq!(
            paths.container_work("web"),
            PathBuf::from("/var/lib/skiff/overlay2/work/web")
        );
        assert_eq!(
            paths.container_mnt("web"),
            PathBuf::from("/var/lib/skiff/overlay2/mnt/web")
        );
    }

    #[test]
    fn runtime_paths() {
        let paths = SkiffPaths {
            root: PathBuf::from("/var/lib/skiff"),
            runtime: PathBuf::from("/var/run/skiff"),
        };
        assert_eq!(
            paths.container_config("web"),
            PathBuf::from("/var/run/skiff/containers/web/config.json")
        );
        assert_eq!(
            paths.container_log("web"),
            PathBuf::from("/var/run/skiff/containers/web/container.log")
        );
        assert_eq!(
            paths.ipam_table(),
            PathBuf::from("/var/run/skiff/network/ipam/subnet.json")
        );
        assert_eq!(
            paths.networks(),
            PathBuf::from("/var/run/skiff/network/instances")
        );
    }

    #[test]
    fn custom_root() {
        let paths = SkiffPaths::with_root("/tmp/skiff-test");
        assert_eq!(paths.runtime, PathBuf::from("/tmp/skiff-test/run"));
        assert_eq!(
            paths.containers(),
            PathBuf::from("/tmp/skiff-test/run/containers")
        );

        let paths = paths.with_runtime("/tmp/skiff-run");
        assert_eq!(paths.containers(), PathBuf::from("/tmp/skiff-run/containers"));
    }

    #[test]
    fn create_dirs_builds_layout() {
        let dir = std::env::temp_dir().join(format!("skiff-paths-{}", std::process::id()));
        let paths = SkiffPaths::with_root(&dir);
        paths.create_dirs().unwrap();
        assert!(paths.images().is_dir());
        assert!(paths.networks().is_dir());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
