//! Cgroup resource configuration.
//!
//! Values are kept in the string form the kernel control files accept, so
//! they can be written verbatim:
//! - memory: `"1048576"`, `"512k"`, `"100m"`, `"1g"` (`memory.limit_in_bytes`)
//! - cpu share: `"512"` (`cpu.shares`)
//! - cpuset: `"0-2,4"` (`cpuset.cpus`)

use serde::{Deserialize, Serialize};

use crate::error::{SkiffError, SkiffResult};

/// Desired cgroup constraints for one container.
///
/// `None` means "no constraint" for that resource, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, bytes with an optional k/m/g suffix.
    pub memory_limit: Option<String>,
    /// Relative CPU weight.
    pub cpu_share: Option<String>,
    /// CPUs the container may run on.
    pub cpuset: Option<String>,
}

impl ResourceConfig {
    /// Build a config from raw flag values, treating empty strings as unset.
    #[must_use]
    pub fn from_flags(
        memory_limit: Option<String>,
        cpu_share: Option<String>,
        cpuset: Option<String>,
    ) -> Self {
        let normalize = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            memory_limit: normalize(memory_limit),
            cpu_share: normalize(cpu_share),
            cpuset: normalize(cpuset),
        }
    }

    /// Whether no constraint is set at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory_limit.is_none() && self.cpu_share.is_none() && self.cpuset.is_none()
    }

    /// Check every set value before anything is written to the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::InvalidResource`] naming the first bad value.
    pub fn validate(&self) -> SkiffResult<()> {
        if let Some(memory) = &self.memory_limit {
            parse_memory(memory)?;
        }

        if let Some(share) = &self.cpu_share {
            match share.parse::<u64>() {
                Ok(v) if v > 0 => {}
                _ => return Err(invalid("cpu share", share)),
            }
        }

        if let Some(cpuset) = &self.cpuset {
            validate_cpu_list(cpuset)?;
        }

        Ok(())
    }
}

/// Parse a memory limit into bytes.
///
/// # Errors
///
/// Returns an error if the value is not a number with an optional k/m/g suffix.
pub fn parse_memory(value: &str) -> SkiffResult<u64> {
    let lower = value.to_ascii_lowercase();
    let (digits, multiplier) = match lower.as_bytes().last() {
        Some(b'k') => (&lower[..lower.len() - 1], 1024),
        Some(b'm') => (&lower[..lower.len() - 1], 1024 * 1024),
        Some(b'g') => (&lower[..lower.len() - 1], 1024 * 1024 * 1024),
        _ => (lower.as_str(), 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .and_then(|v| v.checked_mul(multiplier))
        .ok_or_else(|| invalid("memory", value))
}

fn validate_cpu_list(list: &str) -> SkiffResult<()> {
    for part in list.split(',') {
        let ok = match part.split_once('-') {
            Some((lo, hi)) => match (lo.parse::<u32>(), hi.parse::<u32>()) {
                (Ok(lo), Ok(hi)) => lo <= hi,
                _ => false,
            },
            None => part.parse::<u32>().is_ok(),
        };
        if !ok {
            return Err(invalid("cpuset", list));
        }
    }
    Ok(())
}

fn invalid(resource: &str, value: &str) -> SkiffError {
    SkiffError::InvalidResource {
        resource: resource.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_flags_are_unset() {
        let config = ResourceConfig::from_flags(Some(String::new()), None, Some("  ".into()));
        assert!(config.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn memory_suffixes() {
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("4k").unwrap(), 4096);
        assert_eq!(parse_memory("100m").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_memory("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory("").is_err());
        assert!(parse_memory("m").is_err());
        assert!(parse_memory("12x").is_err());
        assert!(parse_memory("0").is_err());
    }

    #[test]
    fn cpu_share_must_be_positive() {
        let bad = ResourceConfig::from_flags(None, Some("0".into()), None);
        assert!(bad.validate().is_err());
        let bad = ResourceConfig::from_flags(None, Some("-4".into()), None);
        assert!(bad.validate().is_err());
        let good = ResourceConfig::from_flags(None, Some("512".into()), None);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn cpuset_lists() {
        for ok in ["0", "0-3", "0,2", "0-1,4,6-7"] {
            let config = ResourceConfig::from_flags(None, None, Some(ok.into()));
            assert!(config.validate().is_ok(), "{ok} should be accepted");
        }
        for bad in ["", "a", "3-1", "0,,1", "1-"] {
            let config = ResourceConfig {
                cpuset: Some(bad.into()),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn memory_megabytes_scale(n in 1u64..1_000_000) {
            prop_assert_eq!(parse_memory(&format!("{n}m")).unwrap(), n * 1024 * 1024);
        }
    }
}
