//! Hardware self-reset causes.
//!
//! The bit values double as the `VIU_SW_RESET` pulse bits for the corresponding blocks.

use bitflags::bitflags;

use crate::range::{self, RegisterRange};

bitflags! {
    /// Register groups clobbered by a VIU software-reset pulse.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct HwResetReason: u32 {
        const OSD1_REGS = 1 << 0;
        const OSD2_REGS = 1 << 1;
        const OSD3_REGS = 1 << 2;
        const MALI_AFBCD_REGS = 1 << 23;
        const AFBCD_REGS = 1 << 31;
    }
}

impl HwResetReason {
    /// Register blocks reset by the bits in `self`.
    pub fn clobbered_ranges(self) -> impl Iterator<Item = RegisterRange> {
        [
            (HwResetReason::OSD1_REGS, range::OSD1),
            (HwResetReason::OSD2_REGS, range::OSD2),
            (HwResetReason::OSD3_REGS, range::OSD3),
            (HwResetReason::MALI_AFBCD_REGS, range::MALI_AFBCD),
            (HwResetReason::AFBCD_REGS, range::AFBCD),
        ]
        .into_iter()
        .filter(move |(bit, _)| self.contains(*bit))
        .map(|(_, range)| range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clobbered_ranges_follow_bits() {
        let ranges: Vec<_> = (HwResetReason::OSD1_REGS | HwResetReason::AFBCD_REGS)
            .clobbered_ranges()
            .collect();
        assert_eq!(ranges, vec![range::OSD1, range::AFBCD]);
        assert_eq!(HwResetReason::empty().clobbered_ranges().count(), 0);
    }
}
