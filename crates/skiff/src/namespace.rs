//! Linux namespaces used by containers.
//!
//! Every container gets fresh mount, PID, UTS, network and IPC namespaces.
//! User and cgroup namespaces are not used.

use std::path::PathBuf;

/// A namespace kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Mount table.
    Mount,
    /// Process ids.
    Pid,
    /// Hostname and domain name.
    Uts,
    /// Network devices, addresses and routes.
    Net,
    /// System V IPC and POSIX message queues.
    Ipc,
}

/// Namespaces a container is created with.
pub const CONTAINER_NAMESPACES: [Namespace; 5] = [
    Namespace::Mount,
    Namespace::Pid,
    Namespace::Uts,
    Namespace::Net,
    Namespace::Ipc,
];

/// Order in which `exec` joins a running container's namespaces.
///
/// The mount namespace comes last: once joined, `/proc/<pid>/ns` of the
/// host is no longer reachable.
pub const EXEC_JOIN_ORDER: [Namespace; 5] = [
    Namespace::Ipc,
    Namespace::Uts,
    Namespace::Net,
    Namespace::Pid,
    Namespace::Mount,
];

impl Namespace {
    /// Name of the link under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Pid => "pid",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Ipc => "ipc",
        }
    }

    /// `CLONE_NEW*` flag for this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> libc::c_int {
        match self {
            Self::Mount => libc::CLONE_NEWNS,
            Self::Pid => libc::CLONE_NEWPID,
            Self::Uts => libc::CLONE_NEWUTS,
            Self::Net => libc::CLONE_NEWNET,
            Self::Ipc => libc::CLONE_NEWIPC,
        }
    }

    /// `/proc/<pid>/ns/<name>`.
    #[must_use]
    pub fn proc_path(self, pid: i32) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.proc_name()))
    }
}

/// Combined `clone(2)` flags for a new container.
#[must_use]
pub fn container_clone_flags() -> libc::c_int {
    CONTAINER_NAMESPACES
        .iter()
        .fold(0, |flags, ns| flags | ns.clone_flag())
}
