//! Disjoint register blocks.

use crate::RegisterAddress;

/// Inclusive range of register addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisterRange {
    pub first: RegisterAddress,
    pub last: RegisterAddress,
}

impl RegisterRange {
    pub const fn new(first: RegisterAddress, last: RegisterAddress) -> Self {
        Self { first, last }
    }

    /// Range of `len` registers starting at `base`. `len` must be non-zero.
    pub const fn from_base_len(base: RegisterAddress, len: u16) -> Self {
        Self {
            first: base,
            last: RegisterAddress::new(base.raw() + len - 1),
        }
    }

    pub fn contains(&self, addr: RegisterAddress) -> bool {
        addr >= self.first && addr <= self.last
    }

    pub fn len(&self) -> usize {
        usize::from(self.last.raw() - self.first.raw()) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = RegisterAddress> {
        (self.first.raw()..=self.last.raw()).map(RegisterAddress::new)
    }

    pub fn overlaps(&self, other: &RegisterRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

pub const OSD1: RegisterRange = RegisterRange::from_base_len(crate::addr::VIU_OSD1_CTRL_STAT, 0x20);
pub const OSD2: RegisterRange = RegisterRange::from_base_len(crate::addr::VIU_OSD2_CTRL_STAT, 0x20);
pub const OSD3: RegisterRange = RegisterRange::from_base_len(crate::addr::VIU_OSD3_CTRL_STAT, 0x20);
pub const VIU2_OSD1: RegisterRange = RegisterRange::new(
    crate::addr::VIU2_OSD1_CTRL_STAT,
    crate::addr::VIU2_OSD1_BLK3_CFG_W4,
);
pub const AFBCD: RegisterRange = RegisterRange::from_base_len(crate::addr::OSD1_AFBCD_ENABLE, 0x10);
pub const MALI_AFBCD: RegisterRange =
    RegisterRange::from_base_len(crate::addr::VPU_MAFBC_BLOCK_ID, 0x50);
pub const OSD_BLEND: RegisterRange =
    RegisterRange::from_base_len(crate::addr::VIU_OSD_BLEND_CTRL, 0x10);
pub const VPP_OSD_SCALER: RegisterRange =
    RegisterRange::from_base_len(crate::addr::VPP_OSD_SC_CTRL0, 0x08);
pub const VPP_BLEND_SRC: RegisterRange = RegisterRange::new(
    crate::addr::VPP_OSD1_BLEND_SRC_CTRL,
    crate::addr::VPP_OSD2_BLEND_SRC_CTRL,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ranges_are_disjoint() {
        let all = [
            OSD1,
            OSD2,
            OSD3,
            VIU2_OSD1,
            AFBCD,
            MALI_AFBCD,
            OSD_BLEND,
            VPP_OSD_SCALER,
            VPP_BLEND_SRC,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn flag_register_lives_in_osd2() {
        assert!(OSD2.contains(crate::addr::OSD_RDMA_FLAG_REG));
        assert!(!OSD1.contains(crate::addr::OSD_RDMA_FLAG_REG));
    }

    #[test]
    fn len_and_iter_agree() {
        assert_eq!(OSD1.len(), 0x20);
        assert_eq!(OSD1.iter().count(), OSD1.len());
        assert_eq!(OSD1.iter().last(), Some(OSD1.last));
    }
}
