//! Caller address space
//!
//! `CallerMemory` is the only way the dispatch layer touches caller-owned
//! bytes. Every access validates the whole region first (null, overflow,
//! mapping, permission) and copies nothing unless the whole region is
//! accessible, so a fault never leaves a partial transfer behind.
//!
//! `UserSpace` is an in-process caller address space with explicit regions
//! that can be unmapped or write-protected at any moment, including while a
//! call is in flight.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Page granularity of region placement
pub const PAGE_SIZE: u64 = 4096;

/// Lowest address handed out by `UserSpace`
const FIRST_REGION_BASE: u64 = 0x1000_0000;

/// An address in caller space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserPtr(pub u64);

impl UserPtr {
    pub const fn null() -> Self {
        UserPtr(0)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    /// Pointer `offset` bytes further, or `None` on overflow.
    pub fn checked_add(self, offset: u64) -> Option<Self> {
        self.0.checked_add(offset).map(UserPtr)
    }
}

impl fmt::Debug for UserPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPtr({:#x})", self.0)
    }
}

/// Why a caller region could not be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UserAccessError {
    #[error("null pointer")]
    NullPointer,
    #[error("address range overflows")]
    Overflow,
    #[error("address range is not mapped")]
    NotMapped,
    #[error("mapping lacks the required permission")]
    PermissionDenied,
}

/// Access rights of a mapped region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn can_write(self) -> bool {
        matches!(self, Access::ReadWrite)
    }
}

/// Caller-owned memory as seen from the trusted side.
pub trait CallerMemory: Send + Sync {
    /// Fill `dst` from `[src, src + dst.len())`.
    fn read(&self, src: UserPtr, dst: &mut [u8]) -> Result<(), UserAccessError>;

    /// Write `src` to `[dst, dst + src.len())`.
    fn write(&self, dst: UserPtr, src: &[u8]) -> Result<(), UserAccessError>;
}

struct Region {
    bytes: Vec<u8>,
    access: Access,
}

/// In-process caller address space made of page-aligned regions.
///
/// Regions are separated by an unmapped guard page, so an access running off
/// the end of one region faults instead of reaching the next.
pub struct UserSpace {
    regions: RwLock<BTreeMap<u64, Region>>,
    next_base: AtomicU64,
}

impl UserSpace {
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(BTreeMap::new()),
            next_base: AtomicU64::new(FIRST_REGION_BASE),
        }
    }

    /// Map a copy of `bytes` and return its base address.
    pub fn map(&self, bytes: &[u8], access: Access) -> UserPtr {
        let span = (bytes.len() as u64).div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;
        let base = self.next_base.fetch_add(span + PAGE_SIZE, Ordering::Relaxed);
        self.regions.write().insert(
            base,
            Region {
                bytes: bytes.to_vec(),
                access,
            },
        );
        UserPtr(base)
    }

    /// Map `len` zero bytes.
    pub fn map_zeroed(&self, len: usize, access: Access) -> UserPtr {
        self.map(&vec![0u8; len], access)
    }

    /// Unmap the region starting at `base`. Returns false if none was mapped.
    pub fn unmap(&self, base: UserPtr) -> bool {
        self.regions.write().remove(&base.0).is_some()
    }

    /// Change the access rights of the region starting at `base`.
    pub fn protect(&self, base: UserPtr, access: Access) -> bool {
        match self.regions.write().get_mut(&base.0) {
            Some(region) => {
                region.access = access;
                true
            }
            None => false,
        }
    }

    /// Copy `len` bytes out of caller space.
    pub fn snapshot(&self, src: UserPtr, len: usize) -> Result<Vec<u8>, UserAccessError> {
        let mut out = vec![0u8; len];
        self.read(src, &mut out)?;
        Ok(out)
    }

    /// Number of mapped regions
    pub fn mapped_regions(&self) -> usize {
        self.regions.read().len()
    }
}

impl Default for UserSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate `[ptr, ptr + len)` inside a single region.
///
/// Returns the region base and the offset of `ptr` within it.
fn locate(
    regions: &BTreeMap<u64, Region>,
    ptr: UserPtr,
    len: usize,
) -> Result<(u64, usize), UserAccessError> {
    if ptr.is_null() {
        return Err(UserAccessError::NullPointer);
    }
    let end = ptr
        .addr()
        .checked_add(len as u64)
        .ok_or(UserAccessError::Overflow)?;
    let (&base, region) = regions
        .range(..=ptr.addr())
        .next_back()
        .ok_or(UserAccessError::NotMapped)?;
    if end > base + region.bytes.len() as u64 {
        return Err(UserAccessError::NotMapped);
    }
    Ok((base, (ptr.addr() - base) as usize))
}

impl CallerMemory for UserSpace {
    fn read(&self, src: UserPtr, dst: &mut [u8]) -> Result<(), UserAccessError> {
        if dst.is_empty() {
            return Ok(());
        }
        let regions = self.regions.read();
        let (base, offset) = locate(&regions, src, dst.len())?;
        let region = &regions[&base];
        dst.copy_from_slice(&region.bytes[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&self, dst: UserPtr, src: &[u8]) -> Result<(), UserAccessError> {
        if src.is_empty() {
            return Ok(());
        }
        let mut regions = self.regions.write();
        let (base, offset) = locate(&regions, dst, src.len())?;
        let region = regions
            .get_mut(&base)
            .ok_or(UserAccessError::NotMapped)?;
        if !region.access.can_write() {
            return Err(UserAccessError::PermissionDenied);
        }
        region.bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl fmt::Debug for UserSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpace")
            .field("regions", &self.mapped_regions())
            .finish()
    }
}
