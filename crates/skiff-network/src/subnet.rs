//! IPv4 CIDR handling.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffResult};

/// An IPv4 address together with a prefix length, e.g. `172.18.0.1/24`.
///
/// The address is kept as given, so the same type describes a whole range
/// (`172.18.0.0/24`), a gateway (`172.18.0.1/24`) or an interface address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Longest prefix accepted for allocation.
    pub const MAX_PREFIX: u8 = 30;

    /// Shortest prefix accepted for allocation. The bitmap holds one
    /// character per address.
    pub const MIN_PREFIX: u8 = 8;

    /// Build from parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix` exceeds 32.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> SkiffResult<Self> {
        if prefix > 32 {
            return Err(SkiffError::InvalidSubnet {
                subnet: format!("{addr}/{prefix}"),
                reason: "prefix must be at most 32".to_string(),
            });
        }
        Ok(Self { addr, prefix })
    }

    /// The address part as given.
    #[must_use]
    pub const fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// The prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The netmask as an integer.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    /// The network address (host bits cleared).
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.mask())
    }

    /// The broadcast address (host bits set).
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !self.mask())
    }

    /// Number of addresses in the range, `2^(32 - prefix)`.
    #[must_use]
    pub const fn size(&self) -> u64 {
        1u64 << (32 - self.prefix as u32)
    }

    /// The same range with host bits cleared, e.g. `172.18.0.0/24`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            addr: self.network(),
            prefix: self.prefix,
        }
    }

    /// The same prefix around another address.
    #[must_use]
    pub const fn with_addr(&self, addr: Ipv4Addr) -> Self {
        Self {
            addr,
            prefix: self.prefix,
        }
    }

    /// Whether `ip` falls inside this range.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }

    /// Reject prefixes too long to hold a gateway and at least one host,
    /// and ranges too large to track.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::InvalidSubnet`] for prefixes above /30 or
    /// below /8.
    pub fn ensure_allocatable(&self) -> SkiffResult<()> {
        let reason = if self.prefix > Self::MAX_PREFIX {
            format!("prefix longer than /{}", Self::MAX_PREFIX)
        } else if self.prefix < Self::MIN_PREFIX {
            format!("prefix shorter than /{}", Self::MIN_PREFIX)
        } else {
            return Ok(());
        };
        Err(SkiffError::InvalidSubnet {
            subnet: self.to_string(),
            reason,
        })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SkiffError::InvalidSubnet {
            subnet: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s.split_once('/').ok_or_else(|| invalid("missing /prefix"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad IPv4 address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;

        Self::new(addr, prefix).map_err(|_| invalid("prefix must be at most 32"))
    }
}

impl TryFrom<String> for Subnet {
    type Error = SkiffError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(value: Subnet) -> Self {
        value.to_string()
    }
}
