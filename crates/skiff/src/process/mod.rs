#![allow(unsafe_code)]
//! Container process creation.
//!
//! The parent clones itself into fresh namespaces and re-executes
//! `/proc/self/exe init` inside them. The child blocks on a pipe until the
//! parent has finished cgroup and network setup, then receives the user's
//! command line over it.

mod init;

pub use init::{INIT_PIPE_FD, find_executable, parse_command, run_container_init};

use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use skiff_common::{SkiffError, SkiffPaths, SkiffResult};

use crate::filesystem::{VolumeSpec, Workspace};
use crate::namespace::container_clone_flags;

/// Stack size for the cloned child before it execs.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Descriptors handed to the child are first moved at or above this number
/// so the `dup2` calls in the child cannot clobber each other.
const FD_FLOOR: RawFd = 10;

/// How the container's standard streams are wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stdio {
    /// Inherit the caller's terminal.
    Tty,
    /// stdout and stderr go to this file, stdin is `/dev/null`.
    Log(PathBuf),
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Container name.
    pub name: String,
    /// Image directory name.
    pub image: String,
    /// Optional host volume.
    pub volume: Option<VolumeSpec>,
    /// Stream wiring.
    pub stdio: Stdio,
}

/// A container process that has been prepared but not yet started.
///
/// The workspace is already built; the child's working directory will be
/// its mount point.
#[derive(Debug)]
pub struct ContainerProcess {
    workspace: Workspace,
    pipe_read: OwnedFd,
    stdio: Option<ChildStdio>,
}

#[derive(Debug)]
struct ChildStdio {
    stdin: OwnedFd,
    output: OwnedFd,
}

impl ContainerProcess {
    /// Prepare the child and return it with the write end of its command
    /// pipe.
    ///
    /// Nothing is started yet. On error nothing is left behind except
    /// directories created for the log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe or log file cannot be created, or the
    /// workspace cannot be built.
    pub fn prepare(paths: &SkiffPaths, config: ProcessConfig) -> SkiffResult<(Self, File)> {
        let (pipe_read, pipe_write) = create_pipe()?;

        let stdio = match &config.stdio {
            Stdio::Tty => None,
            Stdio::Log(path) => Some(open_log(path)?),
        };

        let workspace = Workspace::new(paths, &config.name, &config.image, config.volume);
        workspace.build()?;

        tracing::debug!(name = %config.name, mnt = %workspace.mnt().display(), "Container process prepared");
        Ok((
            Self {
                workspace,
                pipe_read,
                stdio,
            },
            File::from(pipe_write),
        ))
    }

    /// The container's workspace.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Start the child in new namespaces and return its pid.
    ///
    /// Consumes the process: the parent's copies of the child's descriptors
    /// are closed once it runs.
    ///
    /// # Errors
    ///
    /// Returns an error if `clone(2)` fails.
    #[cfg(target_os = "linux")]
    pub fn spawn(self) -> SkiffResult<i32> {
        let args = ChildArgs::new(&self)?;

        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        // SAFETY: the stack grows down from the end of a live allocation,
        // aligned to 16 bytes. Without CLONE_VM the child runs on its own
        // copy of it, so freeing it after clone returns is fine.
        let pid = unsafe {
            let top = stack.as_mut_ptr().add(CHILD_STACK_SIZE);
            let top = top.sub(top as usize % 16);
            libc::clone(
                child_main,
                top.cast(),
                container_clone_flags() | libc::SIGCHLD,
                std::ptr::from_ref(&args).cast_mut().cast(),
            )
        };

        if pid < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::PermissionDenied {
                return Err(SkiffError::PermissionDenied {
                    operation: "clone into new namespaces".to_string(),
                });
            }
            return Err(SkiffError::os("clone", self.workspace.mnt(), err));
        }

        tracing::debug!(pid, mnt = %self.workspace.mnt().display(), "Container process started");
        Ok(pid)
    }

    /// Start the child in new namespaces and return its pid.
    #[cfg(not(target_os = "linux"))]
    pub fn spawn(self) -> SkiffResult<i32> {
        Err(SkiffError::Unsupported {
            feature: "namespaces".to_string(),
        })
    }
}

/// Everything the child needs, prepared before `clone` so the child only
/// makes async-signal-safe calls.
struct ChildArgs {
    exe: CString,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp: Vec<CString>,
    envp_ptrs: Vec<*const libc::c_char>,
    cwd: CString,
    pipe_fd: RawFd,
    stdin_fd: RawFd,
    output_fd: RawFd,
}

impl ChildArgs {
    fn new(process: &ContainerProcess) -> SkiffResult<Self> {
        let exe = c_string(b"/proc/self/exe")?;
        let argv = vec![exe.clone(), c_string(b"init")?];
        let envp = std::env::vars_os()
            .map(|(k, v)| {
                let mut pair = OsString::from(k);
                pair.push("=");
                pair.push(v);
                c_string(pair.as_bytes())
            })
            .collect::<SkiffResult<Vec<_>>>()?;
        let cwd = c_string(process.workspace.mnt().as_os_str().as_bytes())?;

        let (stdin_fd, output_fd) = process
            .stdio
            .as_ref()
            .map_or((-1, -1), |s| (s.stdin.as_raw_fd(), s.output.as_raw_fd()));

        let mut args = Self {
            exe,
            argv,
            argv_ptrs: Vec::new(),
            envp,
            envp_ptrs: Vec::new(),
            cwd,
            pipe_fd: process.pipe_read.as_raw_fd(),
            stdin_fd,
            output_fd,
        };
        args.argv_ptrs = null_terminated(&args.argv);
        args.envp_ptrs = null_terminated(&args.envp);
        Ok(args)
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn c_string(bytes: &[u8]) -> SkiffResult<CString> {
    CString::new(bytes).map_err(|_| SkiffError::Config {
        message: format!("'{}' contains a NUL byte", String::from_utf8_lossy(bytes)),
    })
}

/// Entry point of the cloned child.
#[cfg(target_os = "linux")]
extern "C" fn child_main(arg: *mut libc::c_void) -> libc::c_int {
    // SAFETY: `arg` points at the parent's `ChildArgs`, which the child's
    // copy of the address space still holds. Only async-signal-safe
    // functions are called below.
    unsafe {
        let args = &*arg.cast::<ChildArgs>();

        if libc::dup2(args.pipe_fd, INIT_PIPE_FD) < 0 {
            libc::_exit(126);
        }
        if args.output_fd >= 0
            && (libc::dup2(args.stdin_fd, libc::STDIN_FILENO) < 0
                || libc::dup2(args.output_fd, libc::STDOUT_FILENO) < 0
                || libc::dup2(args.output_fd, libc::STDERR_FILENO) < 0)
        {
            libc::_exit(126);
        }
        if libc::chdir(args.cwd.as_ptr()) < 0 {
            libc::_exit(126);
        }

        libc::execve(
            args.exe.as_ptr(),
            args.argv_ptrs.as_ptr(),
            args.envp_ptrs.as_ptr(),
        );
        libc::_exit(127)
    }
}

/// A close-on-exec pipe, both ends moved above [`FD_FLOOR`].
fn create_pipe() -> SkiffResult<(OwnedFd, OwnedFd)> {
    let (read, write) = rustix::pipe::pipe_with(rustix::pipe::PipeFlags::CLOEXEC)
        .map_err(|e| SkiffError::Internal {
            message: format!("Failed to create pipe: {e}"),
        })?;
    Ok((lift_fd(&read)?, write))
}

fn open_log(path: &Path) -> SkiffResult<ChildStdio> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SkiffError::os("mkdir", dir, e))?;
    }
    let log = File::create(path).map_err(|e| SkiffError::os("create", path, e))?;
    let null = File::open("/dev/null").map_err(|e| SkiffError::os("open", Path::new("/dev/null"), e))?;
    Ok(ChildStdio {
        stdin: lift_fd(&null)?,
        output: lift_fd(&log)?,
    })
}

fn lift_fd(fd: impl AsFd) -> SkiffResult<OwnedFd> {
    rustix::io::fcntl_dupfd_cloexec(fd, FD_FLOOR).map_err(|e| SkiffError::Internal {
        message: format!("Failed to duplicate descriptor: {e}"),
    })
}

/// Deliver the command line to a waiting init and close the pipe.
///
/// # Errors
///
/// Returns an error if the write fails, typically because the child died.
pub fn send_init_command(mut pipe: File, command: &[String]) -> SkiffResult<()> {
    let line = command.join(" ");
    tracing::debug!(command = %line, "Sending command to init");
    pipe.write_all(line.as_bytes())
        .map_err(|e| SkiffError::os("write", Path::new("init pipe"), e))
}

/// Block until `pid` exits and return its exit code.
///
/// A signal death is reported as `128 + signal`.
///
/// # Errors
///
/// Returns an error if `waitpid` fails.
pub async fn wait(pid: i32) -> SkiffResult<i32> {
    tokio::task::spawn_blocking(move || {
        let target = rustix::process::Pid::from_raw(pid).ok_or_else(|| SkiffError::Internal {
            message: format!("invalid pid {pid}"),
        })?;
        loop {
            match rustix::process::waitpid(Some(target), rustix::process::WaitOptions::empty()) {
                Ok(Some((_, status))) => {
                    if let Some(code) = status.exit_status() {
                        return Ok(code);
                    }
                    if let Some(signal) = status.terminating_signal() {
                        return Ok(128 + signal);
                    }
                }
                Ok(None) => {}
                Err(rustix::io::Errno::INTR) => {}
                Err(e) => {
                    return Err(SkiffError::Internal {
                        message: format!("waitpid({pid}) failed: {e}"),
                    });
                }
            }
        }
    })
    .await
    .map_err(|e| SkiffError::Internal {
        message: format!("wait task failed: {e}"),
    })?
}

/// Send `signal` to `pid`. A process that is already gone is not an error.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered for another reason.
pub fn signal(pid: i32, signal: rustix::process::Signal) -> SkiffResult<()> {
    let Some(target) = rustix::process::Pid::from_raw(pid) else {
        return Ok(());
    };
    match rustix::process::kill_process(target, signal) {
        Ok(()) => {
            tracing::debug!(pid, ?signal, "Signal sent");
            Ok(())
        }
        Err(rustix::io::Errno::SRCH) => {
            tracing::debug!(pid, "Process already exited");
            Ok(())
        }
        Err(rustix::io::Errno::PERM) => Err(SkiffError::PermissionDenied {
            operation: format!("signal pid {pid}"),
        }),
        Err(e) => Err(SkiffError::Internal {
            message: format!("kill({pid}) failed: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn pipe_ends_sit_above_floor() {
        let (read, write) = create_pipe().unwrap();
        assert!(read.as_raw_fd() >= FD_FLOOR);

        let mut write = File::from(write);
        write.write_all(b"sh -c true").unwrap();
        drop(write);

        let mut line = String::new();
        File::from(read).read_to_string(&mut line).unwrap();
        assert_eq!(line, "sh -c true");
    }

    #[test]
    fn send_joins_with_spaces() {
        let (read, write) = create_pipe().unwrap();
        send_init_command(
            File::from(write),
            &["ls".to_string(), "-l".to_string(), "/".to_string()],
        )
        .unwrap();

        let mut line = String::new();
        File::from(read).read_to_string(&mut line).unwrap();
        assert_eq!(parse_command(&line).unwrap(), ["ls", "-l", "/"]);
    }

    #[test]
    fn log_file_is_created() {
        let temp = tempdir().unwrap();
        let log = temp.path().join("containers/c1/container.log");
        let stdio = open_log(&log).unwrap();
        assert!(log.is_file());
        assert!(stdio.output.as_raw_fd() >= FD_FLOOR);
    }

    #[test]
    fn prepare_fails_without_image() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        let config = ProcessConfig {
            name: "c1".to_string(),
            image: "missing".to_string(),
            volume: None,
            stdio: Stdio::Log(paths.container_log("c1")),
        };
        assert!(matches!(
            ContainerProcess::prepare(&paths, config),
            Err(SkiffError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn signalling_a_dead_process_is_ok() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        child.wait().unwrap();
        signal(pid, rustix::process::Signal::TERM).unwrap();
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        assert_eq!(wait(pid).await.unwrap(), 3);
    }
}
