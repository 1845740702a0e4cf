#![allow(unsafe_code)]
//! Running extra commands inside a live container.

use std::ffi::OsString;
use std::fs::File;
use std::os::fd::AsFd;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;

use skiff_common::{SkiffError, SkiffResult};

use super::container::Runtime;
use super::info::ContainerStatus;
use crate::namespace::EXEC_JOIN_ORDER;

/// Shell used to interpret the joined command line.
const EXEC_SHELL: &str = "/bin/sh";

/// Parse a `/proc/<pid>/environ` buffer into `KEY=VALUE` pairs.
///
/// Entries without `=` are dropped.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<(OsString, OsString)> {
    raw.split(|b| *b == 0)
        .filter_map(|entry| {
            let eq = entry.iter().position(|b| *b == b'=')?;
            if eq == 0 {
                return None;
            }
            Some((
                OsString::from_vec(entry[..eq].to_vec()),
                OsString::from_vec(entry[eq + 1..].to_vec()),
            ))
        })
        .collect()
}

impl Runtime {
    /// Run `command` through `/bin/sh -c` inside container `name`'s
    /// namespaces and return its exit code.
    ///
    /// The command sees the caller's environment extended by the
    /// container's own.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::ContainerNotFound`] for an unknown container,
    /// [`SkiffError::Config`] for a stopped one or an empty command, or the
    /// error from opening the namespaces or spawning the shell.
    pub async fn exec(&self, name: &str, command: &[String]) -> SkiffResult<i32> {
        if command.is_empty() {
            return Err(SkiffError::Config {
                message: "no command given".to_string(),
            });
        }
        let info = self.info().get_by_name(name)?;
        let pid = match (info.status, info.pid) {
            (ContainerStatus::Running, Some(pid)) => pid,
            _ => {
                return Err(SkiffError::Config {
                    message: format!("container {name} is not running"),
                });
            }
        };

        let namespaces = EXEC_JOIN_ORDER
            .iter()
            .map(|ns| {
                let path = ns.proc_path(pid);
                File::open(&path).map_err(|e| SkiffError::os("open", &path, e))
            })
            .collect::<SkiffResult<Vec<_>>>()?;

        let environ_path = std::path::PathBuf::from(format!("/proc/{pid}/environ"));
        let environ = std::fs::read(&environ_path)
            .map_err(|e| SkiffError::os("read", &environ_path, e))?;

        let line = command.join(" ");
        tracing::info!(name, pid, command = %line, "Executing in container");

        let mut cmd = Command::new(EXEC_SHELL);
        cmd.arg("-c").arg(&line).envs(parse_environ(&environ));
        // SAFETY: the hook runs in the forked child before exec and only
        // calls setns(2) on descriptors opened above.
        unsafe {
            cmd.pre_exec(move || {
                for ns in &namespaces {
                    rustix::thread::move_into_link_name_space(ns.as_fd(), None)?;
                }
                Ok(())
            });
        }

        let status = tokio::task::spawn_blocking(move || cmd.status())
            .await
            .map_err(|e| SkiffError::Internal {
                message: format!("exec task failed: {e}"),
            })?
            .map_err(|e| SkiffError::os("exec", std::path::Path::new(EXEC_SHELL), e))?;

        let code = status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(1);
        tracing::debug!(name, code, "Exec finished");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_pairs() {
        let raw = b"PATH=/bin:/usr/bin\0HOME=/root\0EMPTY=\0junk\0=nokey\0A=b=c\0";
        let env = parse_environ(raw);
        let pairs: Vec<(String, String)> = env
            .into_iter()
            .map(|(k, v)| (k.into_string().unwrap(), v.into_string().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("HOME".to_string(), "/root".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("A".to_string(), "b=c".to_string()),
            ]
        );
    }

    #[test]
    fn empty_environ() {
        assert!(parse_environ(b"").is_empty());
    }
}
