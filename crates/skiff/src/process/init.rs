//! The container's first process.
//!
//! Runs as pid 1 inside the new namespaces with the workspace mount point as
//! working directory. It waits for the command line on [`INIT_PIPE_FD`],
//! switches the root filesystem and replaces itself with the user command.

use std::ffi::OsStr;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use skiff_common::{SkiffError, SkiffResult};

use crate::filesystem;

/// Descriptor on which init receives its command line.
pub const INIT_PIPE_FD: i32 = 3;

/// Search path used when the environment has none.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Split a received command line into arguments.
///
/// Splitting is on single spaces; empty tokens from repeated spaces are
/// dropped.
///
/// # Errors
///
/// Returns [`SkiffError::Config`] if no argument remains.
pub fn parse_command(line: &str) -> SkiffResult<Vec<String>> {
    let argv: Vec<String> = line
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if argv.is_empty() {
        return Err(SkiffError::Config {
            message: "init received an empty command".to_string(),
        });
    }
    Ok(argv)
}

/// Resolve `name` against `search_path` the way a shell would.
///
/// Names containing a `/` are returned unchanged.
///
/// # Errors
///
/// Returns a not-found [`SkiffError::Os`] if no executable regular file
/// matches.
pub fn find_executable(name: &str, search_path: &OsStr) -> SkiffResult<PathBuf> {
    if name.contains('/') {
        return Ok(PathBuf::from(name));
    }
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| {
            SkiffError::os(
                "lookup",
                Path::new(name),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[allow(unsafe_code)]
fn read_command() -> SkiffResult<String> {
    use std::os::fd::FromRawFd;

    // SAFETY: the launcher dup'ed the read end of the command pipe onto
    // this descriptor before exec, and nothing else in this process owns it.
    let mut pipe = unsafe { std::fs::File::from_raw_fd(INIT_PIPE_FD) };
    let mut line = String::new();
    pipe.read_to_string(&mut line)
        .map_err(|e| SkiffError::os("read", Path::new("init pipe"), e))?;
    Ok(line)
}

/// Body of `skiff init`.
///
/// Only returns on failure; on success the process image is replaced.
///
/// # Errors
///
/// Returns the first error from reading the command, the root switch, the
/// executable lookup or `execve`.
pub fn run_container_init() -> SkiffResult<()> {
    let line = read_command()?;
    let argv = parse_command(&line)?;
    tracing::debug!(command = %line, "Init received command");

    filesystem::setup_rootfs()?;

    let search_path = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());
    let program = find_executable(&argv[0], &search_path)?;
    tracing::debug!(program = %program.display(), "Executing container command");

    let err = Command::new(&program).arg0(&argv[0]).args(&argv[1..]).exec();
    Err(SkiffError::os("exec", &program, err))
}
