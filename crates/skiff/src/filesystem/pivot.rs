//! pivot_root implementation.

use std::path::Path;

use skiff_common::{SkiffError, SkiffResult};

/// Directory under the new root that briefly holds the old root.
pub const PIVOT_DIR: &str = ".pivot_root";

/// Make `root` the process's root filesystem and drop the old one.
///
/// `root` is bind-mounted onto itself first, since `pivot_root(2)` needs the
/// new root to be a mount point. The old root ends up at `/.pivot_root`,
/// is lazily unmounted and the directory removed.
#[cfg(target_os = "linux")]
pub fn pivot_root(root: &Path) -> SkiffResult<()> {
    use rustix::mount::{UnmountFlags, mount_bind_recursive, unmount};

    tracing::debug!(root = %root.display(), "Executing pivot_root");

    mount_bind_recursive(root, root).map_err(|e| SkiffError::os("bind mount", root, e))?;

    let put_old = root.join(PIVOT_DIR);
    match std::fs::create_dir(&put_old) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(SkiffError::os("mkdir", &put_old, e)),
    }

    rustix::process::pivot_root(root, &put_old)
        .map_err(|e| SkiffError::os("pivot_root", root, e))?;

    std::env::set_current_dir("/").map_err(|e| SkiffError::os("chdir", Path::new("/"), e))?;

    let old_root = Path::new("/").join(PIVOT_DIR);
    unmount(&old_root, UnmountFlags::DETACH)
        .map_err(|e| SkiffError::os("umount", &old_root, e))?;
    std::fs::remove_dir(&old_root).map_err(|e| SkiffError::os("rmdir", &old_root, e))?;

    tracing::debug!("pivot_root successful");
    Ok(())
}

/// Make `root` the process's root filesystem and drop the old one.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_root: &Path) -> SkiffResult<()> {
    Err(SkiffError::Unsupported {
        feature: "pivot_root".to_string(),
    })
}
