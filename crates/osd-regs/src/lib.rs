//! Register map for the Meson OSD display pipeline.
//!
//! This crate is intentionally data-only: register addresses, the address ranges that group
//! them into hardware blocks, the 8-byte RDMA table item, and the handful of bit definitions the
//! deferred-update core and the simulated VPU must agree on.
//!
//! Addresses are 16-bit offsets into the VCBUS register window. The map is closed: every address
//! the core touches is defined here, so no lookup ever has to report "unknown register".
#![forbid(unsafe_code)]

pub mod addr;
pub mod range;
pub mod rdma;
pub mod reset;

use core::fmt;

pub use range::RegisterRange;
pub use reset::HwResetReason;

/// 16-bit register offset within the VCBUS window.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RegisterAddress(u16);

impl RegisterAddress {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns the register `delta` slots after `self`, or `None` if that leaves the window.
    pub const fn checked_add(self, delta: u16) -> Option<Self> {
        match self.0.checked_add(delta) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Slot index of `self` relative to `base`, if `self` is at or after `base`.
    pub fn offset_from(self, base: RegisterAddress) -> Option<usize> {
        self.0.checked_sub(base.0).map(usize::from)
    }
}

impl fmt::Debug for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegisterAddress(0x{:04x})", self.0)
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for RegisterAddress {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// One `(address, value)` pair as stored in the RDMA table.
///
/// The DMA engine consumes items as two little-endian `u32` words: the register address
/// (zero-extended) followed by the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisterWrite {
    pub addr: RegisterAddress,
    pub value: u32,
}

impl RegisterWrite {
    pub const SIZE_BYTES: usize = 8;

    pub const fn new(addr: RegisterAddress, value: u32) -> Self {
        Self { addr, value }
    }

    pub fn encode_le(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[..4].copy_from_slice(&u32::from(self.addr.raw()).to_le_bytes());
        out[4..].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    /// Decodes an item previously produced by [`RegisterWrite::encode_le`].
    ///
    /// The upper half of the address word is ignored; hardware only decodes 16 address bits.
    pub fn decode_le(bytes: &[u8; Self::SIZE_BYTES]) -> Self {
        let addr = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let value = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self {
            addr: RegisterAddress::new((addr & 0xffff) as u16),
            value,
        }
    }
}
