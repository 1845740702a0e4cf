//! Per-container overlay workspace.

use std::path::{Path, PathBuf};

use skiff_common::{SkiffError, SkiffPaths, SkiffResult};

use super::mounts::{self, remove_dir_tree};
use super::volume::VolumeSpec;

/// The directories and mounts backing one container's root filesystem.
///
/// ```text
/// overlay2/image/<image>   lower, read-only
/// overlay2/rw/<name>       upper
/// overlay2/work/<name>     overlay work dir
/// overlay2/mnt/<name>      merged view, the container's root
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    name: String,
    image: PathBuf,
    rw: PathBuf,
    work: PathBuf,
    mnt: PathBuf,
    volume: Option<VolumeSpec>,
}

impl Workspace {
    /// Describe the workspace of container `name` built from `image`.
    #[must_use]
    pub fn new(paths: &SkiffPaths, name: &str, image: &str, volume: Option<VolumeSpec>) -> Self {
        Self {
            name: name.to_string(),
            image: paths.image(image),
            rw: paths.container_rw(name),
            work: paths.container_work(name),
            mnt: paths.container_mnt(name),
            volume,
        }
    }

    /// Describe an existing workspace for teardown, where the image no
    /// longer matters.
    #[must_use]
    pub fn existing(paths: &SkiffPaths, name: &str, volume: Option<VolumeSpec>) -> Self {
        Self::new(paths, name, "", volume)
    }

    /// The merged mount point, i.e. the container's future root.
    #[must_use]
    pub fn mnt(&self) -> &Path {
        &self.mnt
    }

    /// The writable upper layer.
    #[must_use]
    pub fn rw(&self) -> &Path {
        &self.rw
    }

    /// The overlay work directory.
    #[must_use]
    pub fn work(&self) -> &Path {
        &self.work
    }

    /// The volume, if any.
    #[must_use]
    pub const fn volume(&self) -> Option<&VolumeSpec> {
        self.volume.as_ref()
    }

    /// Create the layers, mount the overlay and attach the volume.
    ///
    /// A failure after the first directory was created tears down whatever
    /// was set up before returning the error.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ImageNotFound`] if the image is missing, or the
    /// first directory or mount error.
    pub fn build(&self) -> SkiffResult<()> {
        if !self.image.is_dir() {
            return Err(SkiffError::ImageNotFound {
                image: self.image.display().to_string(),
            });
        }

        tracing::debug!(
            name = %self.name,
            image = %self.image.display(),
            mnt = %self.mnt.display(),
            "Building workspace"
        );

        if let Err(e) = self.build_layers() {
            if let Err(cleanup) = self.teardown() {
                tracing::warn!(name = %self.name, error = %cleanup, "Workspace cleanup failed");
            }
            return Err(e);
        }

        tracing::info!(name = %self.name, mnt = %self.mnt.display(), "Workspace ready");
        Ok(())
    }

    fn build_layers(&self) -> SkiffResult<()> {
        for dir in [&self.rw, &self.work, &self.mnt] {
            create_fresh_dir(dir)?;
        }

        mounts::mount_overlay(&self.image, &self.rw, &self.work, &self.mnt)?;

        if let Some(volume) = &self.volume {
            self.mount_volume(volume)?;
        }
        Ok(())
    }

    fn mount_volume(&self, volume: &VolumeSpec) -> SkiffResult<()> {
        match std::fs::create_dir_all(&volume.host) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(SkiffError::os("mkdir", &volume.host, e)),
        }

        let target = volume.target_in(&self.mnt);
        std::fs::create_dir_all(&target).map_err(|e| SkiffError::os("mkdir", &target, e))?;

        mounts::bind_mount(&volume.host, &target)?;
        tracing::debug!(name = %self.name, %volume, "Volume mounted");
        Ok(())
    }

    /// Unmount the volume, then the root, then delete the layer directories.
    ///
    /// Mounts that are not there are skipped, so tearing down a workspace
    /// that was never fully built succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first unmount or directory-removal error.
    pub fn teardown(&self) -> SkiffResult<()> {
        tracing::debug!(name = %self.name, "Tearing down workspace");

        if let Some(volume) = &self.volume {
            mounts::unmount_if_mounted(&volume.target_in(&self.mnt))?;
        }
        mounts::unmount_if_mounted(&self.mnt)?;

        for dir in [&self.rw, &self.work, &self.mnt] {
            remove_dir_tree(dir)?;
        }

        tracing::debug!(name = %self.name, "Workspace removed");
        Ok(())
    }
}

fn create_fresh_dir(path: &Path) -> SkiffResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SkiffError::os("mkdir", parent, e))?;
    }
    std::fs::create_dir(path).map_err(|e| SkiffError::os("mkdir", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout() {
        let paths = SkiffPaths::with_root("/var/lib/skiff");
        let ws = Workspace::new(&paths, "c1", "busybox", None);
        assert_eq!(ws.rw(), Path::new("/var/lib/skiff/overlay2/rw/c1"));
        assert_eq!(ws.work(), Path::new("/var/lib/skiff/overlay2/work/c1"));
        assert_eq!(ws.mnt(), Path::new("/var/lib/skiff/overlay2/mnt/c1"));
    }

    #[test]
    fn missing_image_creates_nothing() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        let ws = Workspace::new(&paths, "c1", "nope", None);

        assert!(matches!(ws.build(), Err(SkiffError::ImageNotFound { .. })));
        assert!(!ws.rw().exists());
        assert!(!ws.mnt().exists());
    }

    #[test]
    fn teardown_of_unbuilt_workspace() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());

        let volume = VolumeSpec::parse_optional(Some("/tmp/skiff-host:/data")).unwrap();
        let ws = Workspace::existing(&paths, "never-built", volume);
        ws.teardown().unwrap();

        Workspace::existing(&paths, "never-built", None)
            .teardown()
            .unwrap();
    }

    #[test]
    fn teardown_removes_leftover_dirs() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        let ws = Workspace::existing(&paths, "c1", None);

        for dir in [ws.rw(), ws.work(), ws.mnt()] {
            std::fs::create_dir_all(dir.join("leftover")).unwrap();
        }
        // Plain directories: nothing is mounted. As non-root the unmount
        // attempt gets EPERM instead, which is surfaced.
        match ws.teardown() {
            Ok(()) => {
                assert!(!ws.rw().exists());
                assert!(!ws.work().exists());
                assert!(!ws.mnt().exists());
            }
            Err(e) => assert!(e.to_string().starts_with("umount ")),
        }
    }

    #[test]
    #[ignore = "requires root and overlayfs"]
    fn build_and_teardown() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        std::fs::create_dir_all(paths.image("base").join("etc")).unwrap();
        std::fs::write(paths.image("base").join("etc/hostname"), "base\n").unwrap();

        let host = temp.path().join("host-data");
        let volume = VolumeSpec::parse_optional(Some(&format!("{}:/data", host.display()))).unwrap();
        let ws = Workspace::new(&paths, "c1", "base", volume);
        ws.build().unwrap();

        assert!(ws.mnt().join("etc/hostname").is_file());
        std::fs::write(ws.mnt().join("data/file"), "x").unwrap();
        assert!(host.join("file").is_file());

        ws.teardown().unwrap();
        assert!(!ws.mnt().exists());
        assert!(host.join("file").is_file());
    }
}
