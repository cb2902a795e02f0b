//! Hardware boundary for the OSD core.
//!
//! The core never touches memory-mapped I/O directly. Everything goes through two small traits:
//! - [`RegisterBus`]: synchronous 32-bit register access in the VCBUS window, and
//! - [`DmaMemory`]: DMA-coherent memory the RDMA engine can read the register table from.
//!
//! Register reads are defined as `&mut self` because real register windows have read side
//! effects (clear-on-read status registers).
#![forbid(unsafe_code)]

use osd_regs::RegisterAddress;
use thiserror::Error;

pub trait RegisterBus {
    fn read_reg(&mut self, addr: RegisterAddress) -> u32;
    fn write_reg(&mut self, addr: RegisterAddress, value: u32);

    /// Replaces the `len`-bit field at bit `start` with the low bits of `value`.
    fn set_bits(&mut self, addr: RegisterAddress, value: u32, start: u32, len: u32) {
        let old = self.read_reg(addr);
        self.write_reg(addr, insert_bits(old, value, start, len));
    }

    fn set_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let old = self.read_reg(addr);
        self.write_reg(addr, old | mask);
    }

    fn clr_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let old = self.read_reg(addr);
        self.write_reg(addr, old & !mask);
    }
}

/// Returns `old` with the `len`-bit field at `start` replaced by `value`.
///
/// `len == 0` leaves `old` unchanged; fields running past bit 31 are truncated.
pub fn insert_bits(old: u32, value: u32, start: u32, len: u32) -> u32 {
    if len == 0 || start >= 32 {
        return old;
    }
    let field = if len >= 32 { u32::MAX } else { (1u32 << len) - 1 };
    let mask = field << start;
    (old & !mask) | ((value << start) & mask)
}

/// A DMA-coherent allocation, addressed by its 32-bit bus address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaRegion {
    pub paddr: u32,
    pub size_bytes: usize,
}

impl DmaRegion {
    pub fn contains(&self, paddr: u32, len: usize) -> bool {
        let Some(offset) = paddr.checked_sub(self.paddr) else {
            return false;
        };
        (offset as usize)
            .checked_add(len)
            .is_some_and(|end| end <= self.size_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("coherent allocation of {size_bytes} bytes failed")]
    AllocationFailed { size_bytes: usize },

    #[error("DMA access out of range: paddr 0x{paddr:08x} len {len}")]
    OutOfRange { paddr: u32, len: usize },
}

pub trait DmaMemory {
    fn alloc_coherent(&mut self, size_bytes: usize) -> Result<DmaRegion, DmaError>;
    fn free_coherent(&mut self, region: DmaRegion);

    fn write_physical(&mut self, paddr: u32, buf: &[u8]) -> Result<(), DmaError>;
    fn read_physical(&mut self, paddr: u32, buf: &mut [u8]) -> Result<(), DmaError>;
}

/// Everything the OSD core needs from the platform.
pub trait OsdBus: RegisterBus + DmaMemory {}

impl<T: RegisterBus + DmaMemory + ?Sized> OsdBus for T {}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    fn read_reg(&mut self, addr: RegisterAddress) -> u32 {
        (**self).read_reg(addr)
    }

    fn write_reg(&mut self, addr: RegisterAddress, value: u32) {
        (**self).write_reg(addr, value)
    }
}

impl<T: DmaMemory + ?Sized> DmaMemory for Box<T> {
    fn alloc_coherent(&mut self, size_bytes: usize) -> Result<DmaRegion, DmaError> {
        (**self).alloc_coherent(size_bytes)
    }

    fn free_coherent(&mut self, region: DmaRegion) {
        (**self).free_coherent(region)
    }

    fn write_physical(&mut self, paddr: u32, buf: &[u8]) -> Result<(), DmaError> {
        (**self).write_physical(paddr, buf)
    }

    fn read_physical(&mut self, paddr: u32, buf: &mut [u8]) -> Result<(), DmaError> {
        (**self).read_physical(paddr, buf)
    }
}
