//! Blocking link operations shared by the bridge driver and the namespace
//! attachment routine.
//!
//! These run `ip` in the calling thread's network namespace, so they can be
//! used both on the host and from a thread that has switched into a
//! container's namespace.

use std::net::Ipv4Addr;
use std::process::Command;
use std::time::Duration;

use skiff_common::{SkiffError, SkiffResult};

use crate::command;
use crate::subnet::Subnet;

/// Lookups of a freshly created link before giving up.
pub const LINK_LOOKUP_ATTEMPTS: u32 = 10;

/// Pause between link lookups.
pub const LINK_LOOKUP_DELAY: Duration = Duration::from_millis(200);

/// Kernel limit on interface names, excluding the trailing NUL.
pub const MAX_IFNAME_LEN: usize = 15;

/// Check if a link exists.
#[must_use]
pub fn exists(name: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", name])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Wait for a link to appear, polling a fixed number of times.
///
/// # Errors
///
/// Returns an error if the link is still missing after the last attempt.
pub fn wait_for(name: &str) -> SkiffResult<()> {
    for attempt in 1..=LINK_LOOKUP_ATTEMPTS {
        if exists(name) {
            return Ok(());
        }
        tracing::debug!(name, attempt, "Link not visible yet");
        if attempt < LINK_LOOKUP_ATTEMPTS {
            std::thread::sleep(LINK_LOOKUP_DELAY);
        }
    }

    Err(SkiffError::Config {
        message: format!(
            "Link '{name}' did not appear, run `ip link` to troubleshoot"
        ),
    })
}

/// Bring a link up.
///
/// # Errors
///
/// Returns an error if `ip link set up` fails.
pub fn set_up(name: &str) -> SkiffResult<()> {
    tracing::debug!(name, "Bringing link up");
    command::ip(&["link", "set", name, "up"])
}

/// Assign an address (with prefix) to a link, waiting for the link first.
///
/// # Errors
///
/// Returns an error if the link never appears or `ip addr add` fails.
pub fn set_ip(name: &str, address: &Subnet) -> SkiffResult<()> {
    wait_for(name)?;
    tracing::debug!(name, %address, "Setting IP address");
    command::ip(&["addr", "add", &address.to_string(), "dev", name])
}

/// Attach a link to a bridge.
///
/// # Errors
///
/// Returns an error if `ip link set master` fails.
pub fn set_master(name: &str, bridge: &str) -> SkiffResult<()> {
    tracing::debug!(bridge, interface = name, "Adding interface to bridge");
    command::ip(&["link", "set", name, "master", bridge])
}

/// Install a default route through `gateway` on `dev`.
///
/// # Errors
///
/// Returns an error if `ip route add` fails.
pub fn add_default_route(dev: &str, gateway: Ipv4Addr) -> SkiffResult<()> {
    tracing::debug!(dev, %gateway, "Adding default route");
    command::ip(&[
        "route",
        "add",
        "default",
        "via",
        &gateway.to_string(),
        "dev",
        dev,
    ])
}

/// Delete a link.
///
/// # Errors
///
/// Returns an error if `ip link delete` fails.
pub fn delete(name: &str) -> SkiffResult<()> {
    tracing::debug!(name, "Deleting link");
    command::ip(&["link", "delete", name])
}

/// Check that a name is usable as an interface name.
///
/// # Errors
///
/// Returns [`SkiffError::Config`] for empty, overlong or odd names.
pub fn validate_name(name: &str) -> SkiffResult<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_IFNAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(SkiffError::Config {
            message: format!(
                "'{name}' is not a valid interface name (1-{MAX_IFNAME_LEN} characters of [A-Za-z0-9._-])"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonexistent_link() {
        assert!(!exists("skiffnolink0"));
    }

    #[test]
    fn missing_link_gives_up_within_two_seconds() {
        let started = std::time::Instant::now();
        let err = wait_for("skiffnolink0").unwrap_err();
        assert!(err.to_string().contains("skiffnolink0"));
        assert!(started.elapsed() >= LINK_LOOKUP_DELAY * (LINK_LOOKUP_ATTEMPTS - 1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(LINK_LOOKUP_DELAY < Duration::from_secs(1));
    }

    #[test]
    fn interface_names() {
        assert!(validate_name("testnet").is_ok());
        assert!(validate_name("br-0.1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a-very-long-bridge-name").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
