//! Mount operations.

use std::path::Path;

use skiff_common::SkiffResult;

pub use imp::{bind_mount, mount_overlay, unmount_if_mounted};

/// Overlay mount data for one lower layer.
pub(super) fn overlay_options(lower: &Path, upper: &Path, work: &Path) -> String {
    format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.display(),
        upper.display(),
        work.display()
    )
}

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::CString;
    use std::path::Path;

    use rustix::io::Errno;
    use rustix::mount::{MountFlags, UnmountFlags, mount, mount_bind};
    use skiff_common::{SkiffError, SkiffResult};

    use super::overlay_options;

    /// Mount an overlay of `lower` (read-only) and `upper` at `target`.
    pub fn mount_overlay(lower: &Path, upper: &Path, work: &Path, target: &Path) -> SkiffResult<()> {
        let options = overlay_options(lower, upper, work);
        tracing::debug!(target = %target.display(), %options, "Mounting overlay");

        let data = CString::new(options).map_err(|_| SkiffError::Config {
            message: "Overlay options contain a NUL byte".to_string(),
        })?;

        mount("overlay", target, "overlay", MountFlags::empty(), data.as_c_str())
            .map_err(|e| SkiffError::os("mount overlay", target, e))
    }

    /// Bind `source` onto `target`.
    pub fn bind_mount(source: &Path, target: &Path) -> SkiffResult<()> {
        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            "Creating bind mount"
        );
        mount_bind(source, target).map_err(|e| SkiffError::os("bind mount", target, e))
    }

    /// Unmount `target`, treating "not mounted" and "no such path" as done.
    ///
    /// Returns whether something was unmounted.
    pub fn unmount_if_mounted(target: &Path) -> SkiffResult<bool> {
        if !target.exists() {
            tracing::debug!(target = %target.display(), "Mount point missing, skipping");
            return Ok(false);
        }
        match rustix::mount::unmount(target, UnmountFlags::empty()) {
            Ok(()) => {
                tracing::debug!(target = %target.display(), "Unmounted");
                Ok(true)
            }
            Err(e) if e == Errno::INVAL || e == Errno::NOENT => {
                tracing::debug!(target = %target.display(), "Not mounted, skipping");
                Ok(false)
            }
            Err(e) => Err(SkiffError::os("umount", target, e)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::path::Path;

    use skiff_common::{SkiffError, SkiffResult};

    fn unsupported<T>() -> SkiffResult<T> {
        Err(SkiffError::Unsupported {
            feature: "mount".to_string(),
        })
    }

    /// Mount an overlay of `lower` (read-only) and `upper` at `target`.
    pub fn mount_overlay(_: &Path, _: &Path, _: &Path, _: &Path) -> SkiffResult<()> {
        unsupported()
    }

    /// Bind `source` onto `target`.
    pub fn bind_mount(_: &Path, _: &Path) -> SkiffResult<()> {
        unsupported()
    }

    /// Unmount `target`, treating "not mounted" and "no such path" as done.
    pub fn unmount_if_mounted(_: &Path) -> SkiffResult<bool> {
        Ok(false)
    }
}

/// Remove a directory tree, ignoring one that is already gone.
pub(super) fn remove_dir_tree(path: &Path) -> SkiffResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(skiff_common::SkiffError::os("remove", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_option_string() {
        assert_eq!(
            overlay_options(
                Path::new("/var/lib/skiff/overlay2/image/busybox"),
                Path::new("/var/lib/skiff/overlay2/rw/c1"),
                Path::new("/var/lib/skiff/overlay2/work/c1"),
            ),
            "lowerdir=/var/lib/skiff/overlay2/image/busybox,\
             upperdir=/var/lib/skiff/overlay2/rw/c1,\
             workdir=/var/lib/skiff/overlay2/work/c1"
        );
    }

    #[test]
    fn unmounting_a_plain_directory_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        // EINVAL as root, EPERM otherwise; only the former is skippable.
        match unmount_if_mounted(temp.path()) {
            Ok(unmounted) => assert!(!unmounted),
            Err(e) => assert!(e.to_string().starts_with("umount ")),
        }
    }

    #[test]
    fn removing_missing_tree_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        remove_dir_tree(&temp.path().join("gone")).unwrap();

        let tree = temp.path().join("a/b");
        std::fs::create_dir_all(&tree).unwrap();
        remove_dir_tree(&temp.path().join("a")).unwrap();
        assert!(!tree.exists());
    }
}
