//! Running host networking tools.

use std::process::Command;

use skiff_common::{SkiffError, SkiffResult};

/// Run `program` with `args`, returning stdout on success.
///
/// A non-zero exit becomes [`SkiffError::Command`] carrying stderr.
pub(crate) fn run(program: &str, args: &[&str]) -> SkiffResult<String> {
    tracing::trace!(program, args = %args.join(" "), "Running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| SkiffError::Internal {
            message: format!("Failed to execute {program}: {e}"),
        })?;

    if !output.status.success() {
        return Err(SkiffError::Command {
            program: program.to_string(),
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `iptables` with `args`.
pub(crate) fn iptables(args: &[&str]) -> SkiffResult<()> {
    run("iptables", args).map(drop)
}

/// Run `ip` with `args`.
pub(crate) fn ip(args: &[&str]) -> SkiffResult<()> {
    run("ip", args).map(drop)
}
