//! Root filesystem setup inside the container's mount namespace.

use std::path::Path;

use skiff_common::{SkiffError, SkiffResult};

use super::pivot::pivot_root;

/// Switch to the current directory as root and mount `/proc` and `/dev`.
///
/// Order matters: propagation is made private before the pivot so nothing
/// leaks to the host, and the pseudo filesystems are mounted after it so
/// they land inside the new root.
#[cfg(target_os = "linux")]
pub fn setup_rootfs() -> SkiffResult<()> {
    use rustix::mount::{MountFlags, MountPropagationFlags, mount, mount_change};

    mount_change("/", MountPropagationFlags::PRIVATE | MountPropagationFlags::REC)
        .map_err(|e| SkiffError::os("make-rprivate", Path::new("/"), e))?;

    let root = std::env::current_dir()?;
    tracing::info!(root = %root.display(), "Setting up root filesystem");
    pivot_root(&root)?;

    ensure_dir(Path::new("/proc"))?;
    mount(
        "proc",
        "/proc",
        "proc",
        MountFlags::NOEXEC | MountFlags::NOSUID | MountFlags::NODEV,
        None::<&std::ffi::CStr>,
    )
    .map_err(|e| SkiffError::os("mount proc", Path::new("/proc"), e))?;

    ensure_dir(Path::new("/dev"))?;
    mount(
        "tmpfs",
        "/dev",
        "tmpfs",
        MountFlags::NOSUID | MountFlags::STRICTATIME,
        c"mode=755",
    )
    .map_err(|e| SkiffError::os("mount tmpfs", Path::new("/dev"), e))?;

    Ok(())
}

/// Switch to the current directory as root and mount `/proc` and `/dev`.
#[cfg(not(target_os = "linux"))]
pub fn setup_rootfs() -> SkiffResult<()> {
    Err(SkiffError::Unsupported {
        feature: "container rootfs".to_string(),
    })
}

fn ensure_dir(path: &Path) -> SkiffResult<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(SkiffError::os("mkdir", path, e)),
    }
}
