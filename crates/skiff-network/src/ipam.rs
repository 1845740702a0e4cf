//! Bitmap IP address management.
//!
//! The allocation table maps a subnet (`"172.18.0.0/24"`) to a string of
//! `'0'`/`'1'` characters, one per address in the range. Bit `i` stands for
//! address `network + i + 1`, so index 0 is the first host address and the
//! last two indices (broadcast and one past it) are never handed out.
//!
//! The table lives in a single JSON file shared by every `skiff` invocation.
//! Each operation takes an exclusive `flock` on a sibling lock file, loads
//! the table, mutates it and writes it back before releasing the lock.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use rustix::fs::{FlockOperation, flock};
use serde::{Deserialize, Serialize};
use skiff_common::{SkiffError, SkiffResult};

use crate::subnet::Subnet;

/// In-memory form of the persisted allocation table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationTable {
    subnets: BTreeMap<String, String>,
}

impl AllocationTable {
    /// The bit-string for a subnet, if it has been used.
    #[must_use]
    pub fn bitmap(&self, subnet: &Subnet) -> Option<&str> {
        self.subnets
            .get(&subnet.normalized().to_string())
            .map(String::as_str)
    }

    /// Number of allocated addresses in a subnet.
    #[must_use]
    pub fn allocated(&self, subnet: &Subnet) -> usize {
        self.bitmap(subnet)
            .map_or(0, |bits| bits.bytes().filter(|b| *b == b'1').count())
    }

    /// Take the lowest free address in `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::InvalidSubnet`] for prefixes above /30 or
    /// below /8, and
    /// [`SkiffError::SubnetExhausted`] when no usable address is left.
    pub fn allocate(&mut self, subnet: &Subnet) -> SkiffResult<Ipv4Addr> {
        subnet.ensure_allocatable()?;
        let key = subnet.normalized().to_string();
        let size = bitmap_len(subnet)?;

        let bits = self
            .subnets
            .entry(key.clone())
            .or_insert_with(|| "0".repeat(size));

        // A table written by a different build may carry a wrong length.
        if bits.len() != size {
            return Err(SkiffError::Internal {
                message: format!(
                    "allocation bitmap for {key} has length {}, expected {size}",
                    bits.len()
                ),
            });
        }

        // The last two indices map to broadcast and beyond.
        let usable = size - 2;
        let index = bits.as_bytes()[..usable]
            .iter()
            .position(|b| *b == b'0')
            .ok_or(SkiffError::SubnetExhausted { subnet: key })?;

        bits.replace_range(index..=index, "1");

        let base = u32::from(subnet.network());
        let index = u32::try_from(index).map_err(|_| SkiffError::Internal {
            message: format!("allocation index {index} out of range"),
        })?;
        Ok(Ipv4Addr::from(base + index + 1))
    }

    /// Return `ip` to the pool of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::AddressNotAllocated`] if the address is outside
    /// the subnet, the subnet is unknown, or the address is already free.
    pub fn release(&mut self, subnet: &Subnet, ip: Ipv4Addr) -> SkiffResult<()> {
        let key = subnet.normalized().to_string();
        let not_allocated = || SkiffError::AddressNotAllocated {
            subnet: key.clone(),
            ip: ip.to_string(),
        };

        if !subnet.contains(ip) || ip == subnet.network() {
            return Err(not_allocated());
        }

        let index = (u32::from(ip) - u32::from(subnet.network()) - 1) as usize;
        let bits = self.subnets.get_mut(&key).ok_or_else(not_allocated)?;

        if bits.as_bytes().get(index) != Some(&b'1') {
            return Err(not_allocated());
        }

        bits.replace_range(index..=index, "0");
        Ok(())
    }
}

fn bitmap_len(subnet: &Subnet) -> SkiffResult<usize> {
    usize::try_from(subnet.size()).map_err(|_| SkiffError::InvalidSubnet {
        subnet: subnet.to_string(),
        reason: "range too large for this platform".to_string(),
    })
}

/// File-backed allocator.
#[derive(Debug, Clone)]
pub struct Ipam {
    table_path: PathBuf,
}

impl Ipam {
    /// Create an allocator persisting to `table_path`.
    pub fn new(table_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
        }
    }

    /// Path of the persisted table.
    #[must_use]
    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    /// Allocate the next free address in `subnet` and persist the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read, locked or written, or
    /// if the subnet is full.
    pub fn allocate(&self, subnet: &Subnet) -> SkiffResult<Ipv4Addr> {
        let _lock = self.lock()?;
        let mut table = self.load()?;
        let ip = table.allocate(subnet)?;
        self.dump(&table)?;

        tracing::debug!(subnet = %subnet.normalized(), %ip, "Allocated address");
        Ok(ip)
    }

    /// Release `ip` back to `subnet` and persist the table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read, locked or written, or
    /// if the address was not allocated.
    pub fn release(&self, subnet: &Subnet, ip: Ipv4Addr) -> SkiffResult<()> {
        let _lock = self.lock()?;
        let mut table = self.load()?;
        table.release(subnet, ip)?;
        self.dump(&table)?;

        tracing::debug!(subnet = %subnet.normalized(), %ip, "Released address");
        Ok(())
    }

    /// Read the table from disk. A missing file is an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> SkiffResult<AllocationTable> {
        match std::fs::read(&self.table_path) {
            Ok(bytes) if bytes.is_empty() => Ok(AllocationTable::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AllocationTable::default()),
            Err(e) => Err(SkiffError::os("read", &self.table_path, e)),
        }
    }

    fn dump(&self, table: &AllocationTable) -> SkiffResult<()> {
        let dir = self.parent_dir()?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, table)?;
        tmp.flush()?;
        tmp.persist(&self.table_path)
            .map_err(|e| SkiffError::os("persist", &self.table_path, e.error))?;
        Ok(())
    }

    fn lock(&self) -> SkiffResult<TableLock> {
        let dir = self.parent_dir()?;
        std::fs::create_dir_all(dir)?;

        let mut lock_path = self.table_path.clone().into_os_string();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SkiffError::os("open", &lock_path, e))?;
        flock(&file, FlockOperation::LockExclusive)
            .map_err(|e| SkiffError::os("flock", &lock_path, e))?;

        Ok(TableLock { file })
    }

    fn parent_dir(&self) -> SkiffResult<&Path> {
        self.table_path.parent().ok_or_else(|| SkiffError::Config {
            message: format!("IPAM table path {} has no parent", self.table_path.display()),
        })
    }
}

/// Exclusive lock on the table, released on drop.
struct TableLock {
    file: File,
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(e) = flock(&self.file, FlockOperation::Unlock) {
            tracing::warn!(error = %e, "Failed to unlock IPAM table");
        }
    }
}
