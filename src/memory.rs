use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PAGE_SIZE: u32 = 0x1000;

bitflags! {
    /// Region permissions. Bit values match ELF `p_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Access: u8 {
        const READ = 4;
        const WRITE = 2;
        const EXECUTE = 1;
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.contains(Access::READ) { 'r' } else { '-' };
        let w = if self.contains(Access::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Access::EXECUTE) { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("no region covers {len} byte(s) at {addr:#010x}")]
    Unmapped { addr: u32, len: u32 },
    #[error("access {required} denied at {addr:#010x} (region is {granted})")]
    AccessDenied {
        addr: u32,
        required: Access,
        granted: Access,
    },
    #[error("region [{base:#010x}, +{len:#x}) overlaps an existing region")]
    Overlap { base: u32, len: u32 },
    #[error("region base {base:#010x} is not page aligned")]
    Misaligned { base: u32 },
    #[error("zero-length region")]
    ZeroLength,
    #[error("no gap of {len:#x} bytes left in the address space")]
    Exhausted { len: u32 },
}

/// The memory interface seen by the execution engine.
///
/// Loads require READ, stores WRITE, and instruction fetch EXECUTE.
pub trait Bus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, MemoryError>;
    fn read_u16(&mut self, addr: u32) -> Result<u16, MemoryError>;
    fn read_u32(&mut self, addr: u32) -> Result<u32, MemoryError>;
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), MemoryError>;
    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), MemoryError>;
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), MemoryError>;
    fn fetch_u32(&mut self, addr: u32) -> Result<u32, MemoryError>;

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_u8(addr.wrapping_add(i as u32))?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        for (i, b) in bytes.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), *b)?;
        }
        Ok(())
    }
}

/// A page-granular span of bytes with fixed permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    base: u32,
    access: Access,
    bytes: Vec<u8>,
}

impl Region {
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One past the last byte; 64-bit so a region ending at 4 GiB is representable.
    pub fn end(&self) -> u64 {
        self.base as u64 + self.bytes.len() as u64
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn contains(&self, addr: u32, len: u32) -> bool {
        addr >= self.base && addr as u64 + len as u64 <= self.end()
    }
}

fn page_round(len: u32) -> Option<u32> {
    len.checked_add(PAGE_SIZE - 1).map(|v| v & !(PAGE_SIZE - 1))
}

/// Non-overlapping regions kept sorted by base address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressSpace {
    regions: BTreeMap<u32, Region>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Map a zero-filled region at an explicit page-aligned `base`.
    /// `len` is rounded up to whole pages.
    pub fn allocate(&mut self, base: u32, len: u32, access: Access) -> Result<u32, MemoryError> {
        if len == 0 {
            return Err(MemoryError::ZeroLength);
        }
        if base % PAGE_SIZE != 0 {
            return Err(MemoryError::Misaligned { base });
        }
        let len = page_round(len).ok_or(MemoryError::Overlap { base, len })?;
        let end = base as u64 + len as u64;
        if end > 1u64 << 32 || self.overlaps(base, end) {
            return Err(MemoryError::Overlap { base, len });
        }
        debug!("map region {base:#010x}+{len:#x} {access}");
        self.regions.insert(
            base,
            Region {
                base,
                access,
                bytes: vec![0; len as usize],
            },
        );
        Ok(base)
    }

    /// Map a region in the first gap that starts at least one page past the
    /// end of the preceding region. Page zero is never handed out.
    pub fn allocate_anywhere(&mut self, len: u32, access: Access) -> Result<u32, MemoryError> {
        if len == 0 {
            return Err(MemoryError::ZeroLength);
        }
        let size = page_round(len).ok_or(MemoryError::Exhausted { len })? as u64;
        let mut candidate = PAGE_SIZE as u64;
        for r in self.regions.values() {
            if candidate + size <= r.base as u64 {
                break;
            }
            candidate = candidate.max(r.end() + PAGE_SIZE as u64);
        }
        if candidate + size > 1u64 << 32 {
            return Err(MemoryError::Exhausted { len });
        }
        self.allocate(candidate as u32, size as u32, access)
    }

    fn overlaps(&self, base: u32, end: u64) -> bool {
        self.regions
            .values()
            .any(|r| (base as u64) < r.end() && (r.base as u64) < end)
    }

    /// The region with the greatest base not above `addr`, if it covers `addr`.
    pub fn region(&self, addr: u32) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr, 1))
    }

    fn locate(&mut self, addr: u32, len: u32) -> Result<&mut Region, MemoryError> {
        self.regions
            .range_mut(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr, len))
            .ok_or(MemoryError::Unmapped { addr, len })
    }

    fn checked(&mut self, addr: u32, len: u32, required: Access) -> Result<&mut [u8], MemoryError> {
        let region = self.locate(addr, len)?;
        if !region.access.contains(required) {
            return Err(MemoryError::AccessDenied {
                addr,
                required,
                granted: region.access,
            });
        }
        let off = (addr - region.base) as usize;
        Ok(&mut region.bytes[off..off + len as usize])
    }

    /// Copy out `buf.len()` bytes, requiring `access` on the covering region.
    pub fn read(&mut self, addr: u32, buf: &mut [u8], access: Access) -> Result<(), MemoryError> {
        let src = self.checked(addr, buf.len() as u32, access)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Copy in `bytes`, requiring `access` on the covering region.
    pub fn write(&mut self, addr: u32, bytes: &[u8], access: Access) -> Result<(), MemoryError> {
        let dst = self.checked(addr, bytes.len() as u32, access)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Loader write: ignores permissions but still requires a mapping.
    pub fn poke(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.write(addr, bytes, Access::empty())
    }

    /// Loader read of one word, ignoring permissions.
    pub fn peek_u32(&mut self, addr: u32) -> Result<u32, MemoryError> {
        let mut b = [0u8; 4];
        self.read(addr, &mut b, Access::empty())?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn poke_u32(&mut self, addr: u32, val: u32) -> Result<(), MemoryError> {
        self.poke(addr, &val.to_le_bytes())
    }

    fn load<const N: usize>(&mut self, addr: u32, access: Access) -> Result<[u8; N], MemoryError> {
        let mut b = [0u8; N];
        self.read(addr, &mut b, access)?;
        Ok(b)
    }
}

impl Bus for AddressSpace {
    fn read_u8(&mut self, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.load::<1>(addr, Access::READ)?[0])
    }
    fn read_u16(&mut self, addr: u32) -> Result<u16, MemoryError> {
        Ok(u16::from_le_bytes(self.load(addr, Access::READ)?))
    }
    fn read_u32(&mut self, addr: u32) -> Result<u32, MemoryError> {
        Ok(u32::from_le_bytes(self.load(addr, Access::READ)?))
    }
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), MemoryError> {
        self.write(addr, &[val], Access::WRITE)
    }
    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), MemoryError> {
        self.write(addr, &val.to_le_bytes(), Access::WRITE)
    }
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), MemoryError> {
        self.write(addr, &val.to_le_bytes(), Access::WRITE)
    }
    fn fetch_u32(&mut self, addr: u32) -> Result<u32, MemoryError> {
        Ok(u32::from_le_bytes(self.load(addr, Access::EXECUTE)?))
    }

    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.read(addr, buf, Access::READ)
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.write(addr, bytes, Access::WRITE)
    }
}
