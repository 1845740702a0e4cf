//! Entering a container's network namespace from the host.
//!
//! Network namespace membership belongs to a thread, not to the process.
//! Everything that switches namespaces here does so on a dedicated OS thread
//! that is never handed back to the async runtime, so no other task can ever
//! observe the switched namespace.

use std::fs::File;
use std::net::Ipv4Addr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use skiff_common::{SkiffError, SkiffResult};

use crate::link;
use crate::subnet::Subnet;
use crate::veth::VethPair;

/// The calling thread's network namespace link.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Path of a process's network namespace link.
#[must_use]
pub fn netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Inode of the calling thread's network namespace.
///
/// Two threads are in the same namespace exactly when this matches.
///
/// # Errors
///
/// Returns an error if `/proc/thread-self/ns/net` cannot be read.
pub fn current_netns_id() -> SkiffResult<u64> {
    let meta = std::fs::metadata(THREAD_NETNS)
        .map_err(|e| SkiffError::os("stat", Path::new(THREAD_NETNS), e))?;
    Ok(meta.ino())
}

/// Switches the calling thread into another network namespace and back.
///
/// The original namespace is restored when the guard drops. A failed
/// restore is logged; the owning thread must then not be reused.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    /// Move the calling thread into the namespace referred to by `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current namespace cannot be recorded or
    /// `setns` fails. The thread is left where it was.
    #[cfg(target_os = "linux")]
    pub fn enter(target: &File) -> SkiffResult<Self> {
        use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};
        use std::os::fd::AsFd;

        let original = File::open(THREAD_NETNS)
            .map_err(|e| SkiffError::os("open", Path::new(THREAD_NETNS), e))?;

        move_into_link_name_space(target.as_fd(), Some(LinkNameSpaceType::Network)).map_err(
            |e| SkiffError::os("setns", Path::new(THREAD_NETNS), std::io::Error::from(e)),
        )?;

        tracing::trace!("Entered network namespace");
        Ok(Self { original })
    }

    /// Move the calling thread into the namespace referred to by `target`.
    ///
    /// # Errors
    ///
    /// Always fails on this platform.
    #[cfg(not(target_os = "linux"))]
    pub fn enter(_target: &File) -> SkiffResult<Self> {
        Err(SkiffError::Unsupported {
            feature: "network namespaces".to_string(),
        })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        {
            use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};
            use std::os::fd::AsFd;

            match move_into_link_name_space(self.original.as_fd(), Some(LinkNameSpaceType::Network))
            {
                Ok(()) => tracing::trace!("Restored network namespace"),
                Err(e) => tracing::error!(error = %e, "Failed to restore network namespace"),
            }
        }
    }
}

/// Run `f` on a fresh OS thread inside the network namespace of `target`.
///
/// The calling thread never changes namespace.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned, the namespace cannot
/// be entered, or `f` fails.
pub async fn run_in_netns<F, T>(target: File, f: F) -> SkiffResult<T>
where
    F: FnOnce() -> SkiffResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("skiff-netns".to_string())
        .spawn(move || {
            let result = NetnsGuard::enter(&target).and_then(|_guard| f());
            let _ = tx.send(result);
        })
        .map_err(|e| SkiffError::Internal {
            message: format!("Failed to spawn netns thread: {e}"),
        })?;

    rx.await.map_err(|_| SkiffError::Internal {
        message: "netns thread exited without a result".to_string(),
    })?
}

/// Move the peer of `pair` into the namespace of `pid` and configure it.
///
/// Inside the namespace the peer gets `address`, is brought up together
/// with the loopback device, and becomes the default route via `gateway`.
///
/// # Errors
///
/// Returns an error if the namespace cannot be opened or any step fails.
pub async fn attach(
    pair: &VethPair,
    pid: i32,
    address: Subnet,
    gateway: Ipv4Addr,
) -> SkiffResult<()> {
    let ns_path = netns_path(pid);
    let target = File::open(&ns_path).map_err(|e| SkiffError::os("open", &ns_path, e))?;

    pair.move_to_netns(pid)?;

    let peer = pair.peer.clone();
    run_in_netns(target, move || {
        tracing::debug!(interface = %peer, %address, %gateway, "Configuring endpoint");
        link::set_ip(&peer, &address)?;
        link::set_up(&peer)?;
        link::set_up("lo")?;
        link::add_default_route(&peer, gateway)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_paths() {
        assert_eq!(netns_path(42), PathBuf::from("/proc/42/ns/net"));
    }

    #[test]
    fn current_namespace_is_stable() {
        let a = current_netns_id().unwrap();
        let b = current_netns_id().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn closure_errors_are_returned() {
        // Entering our own namespace needs CAP_SYS_ADMIN; either failure
        // mode must come back as an error, never a panic.
        let before = current_netns_id().unwrap();
        let own = File::open(THREAD_NETNS).unwrap();
        let result: SkiffResult<()> = run_in_netns(own, || {
            Err(SkiffError::Internal {
                message: "inner".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(current_netns_id().unwrap(), before);
    }

    #[test]
    fn rejected_target_leaves_thread_in_place() {
        let before = current_netns_id().unwrap();
        let not_a_namespace = File::open("/dev/null").unwrap();
        assert!(NetnsGuard::enter(&not_a_namespace).is_err());
        assert_eq!(current_netns_id().unwrap(), before);
    }

    #[tokio::test]
    async fn worker_thread_never_switches() {
        let before = current_netns_id().unwrap();
        let not_a_namespace = File::open("/dev/null").unwrap();
        let result = run_in_netns(not_a_namespace, current_netns_id).await;
        assert!(result.is_err());
        assert_eq!(current_netns_id().unwrap(), before);
    }

    #[tokio::test]
    async fn attach_to_missing_process_fails() {
        let pair = VethPair {
            host: "skiffx0".to_string(),
            peer: "cif-skiffx0".to_string(),
        };
        let err = attach(
            &pair,
            i32::MAX,
            "10.0.0.2/24".parse().unwrap(),
            Ipv4Addr::new(10, 0, 0, 1),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[ignore = "requires root"]
    async fn caller_namespace_is_untouched() {
        let before = current_netns_id().unwrap();
        let own = File::open(THREAD_NETNS).unwrap();
        let inner = run_in_netns(own, current_netns_id).await.unwrap();
        assert_eq!(inner, before);
        assert_eq!(current_netns_id().unwrap(), before);
    }
}
