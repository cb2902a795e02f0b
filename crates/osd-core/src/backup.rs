//! Last-written shadow of the register groups that hardware resets can clobber.
//!
//! Each group has a fixed, address-sorted list of tracked registers. A group only starts
//! shadowing once [`BackupStore::backup_init`] has snapshotted it from hardware; from then on
//! every software write to a tracked register lands in the shadow, whether or not hardware has
//! applied it yet.

use osd_bus::RegisterBus;
use osd_regs::{addr, HwResetReason, RegisterAddress};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackupGroup {
    Osd1,
    Afbcd,
    MaliAfbcd,
}

impl BackupGroup {
    pub const ALL: [BackupGroup; 3] = [BackupGroup::Osd1, BackupGroup::Afbcd, BackupGroup::MaliAfbcd];

    /// The reset cause that clobbers this group, also used as its backup-enable bit.
    pub const fn reset_bit(self) -> HwResetReason {
        match self {
            BackupGroup::Osd1 => HwResetReason::OSD1_REGS,
            BackupGroup::Afbcd => HwResetReason::AFBCD_REGS,
            BackupGroup::MaliAfbcd => HwResetReason::MALI_AFBCD_REGS,
        }
    }

    pub fn tracked(self) -> &'static [RegisterAddress] {
        match self {
            BackupGroup::Osd1 => OSD1_BACKUP_REGS,
            BackupGroup::Afbcd => AFBCD_BACKUP_REGS,
            BackupGroup::MaliAfbcd => MALI_AFBCD_BACKUP_REGS,
        }
    }

    const fn index(self) -> usize {
        match self {
            BackupGroup::Osd1 => 0,
            BackupGroup::Afbcd => 1,
            BackupGroup::MaliAfbcd => 2,
        }
    }
}

/// Every bit a backup-enable mask can carry.
pub fn backup_mask_all() -> HwResetReason {
    BackupGroup::ALL
        .iter()
        .fold(HwResetReason::empty(), |acc, group| acc | group.reset_bit())
}

const OSD1_BACKUP_REGS: &[RegisterAddress] = &[
    addr::VIU_OSD1_CTRL_STAT,
    addr::VIU_OSD1_COLOR_ADDR,
    addr::VIU_OSD1_COLOR,
    addr::VIU_OSD1_BLK0_CFG_W4,
    addr::VIU_OSD1_BLK1_CFG_W4,
    addr::VIU_OSD1_BLK2_CFG_W4,
    addr::VIU_OSD1_BLK3_CFG_W4,
    addr::VIU_OSD1_TCOLOR_AG0,
    addr::VIU_OSD1_TCOLOR_AG1,
    addr::VIU_OSD1_TCOLOR_AG2,
    addr::VIU_OSD1_TCOLOR_AG3,
    addr::VIU_OSD1_BLK0_CFG_W0,
    addr::VIU_OSD1_BLK0_CFG_W1,
    addr::VIU_OSD1_BLK0_CFG_W2,
    addr::VIU_OSD1_BLK0_CFG_W3,
    addr::VIU_OSD1_FIFO_CTRL_STAT,
    addr::VIU_OSD1_CTRL_STAT2,
];

const AFBCD_BACKUP_REGS: &[RegisterAddress] = &[
    addr::OSD1_AFBCD_ENABLE,
    addr::OSD1_AFBCD_MODE,
    addr::OSD1_AFBCD_SIZE_IN,
    addr::OSD1_AFBCD_HDR_PTR,
    addr::OSD1_AFBCD_FRAME_PTR,
    addr::OSD1_AFBCD_CHROMA_PTR,
    addr::OSD1_AFBCD_CONV_CTRL,
    addr::OSD1_AFBCD_PIXEL_HSCOPE,
    addr::OSD1_AFBCD_PIXEL_VSCOPE,
];

// Status, IRQ acknowledge and the command trigger are deliberately absent.
const MALI_AFBCD_BACKUP_REGS: &[RegisterAddress] = &[
    addr::VPU_MAFBC_IRQ_MASK,
    addr::VPU_MAFBC_SURFACE_CFG,
    addr::VPU_MAFBC_AXI_CFG,
    addr::VPU_MAFBC_HEADER_BUF_ADDR_LOW_S0,
    addr::VPU_MAFBC_HEADER_BUF_ADDR_HIGH_S0,
    addr::VPU_MAFBC_FORMAT_SPECIFIER_S0,
    addr::VPU_MAFBC_BUFFER_WIDTH_S0,
    addr::VPU_MAFBC_BUFFER_HEIGHT_S0,
    addr::VPU_MAFBC_BOUNDING_BOX_X_START_S0,
    addr::VPU_MAFBC_BOUNDING_BOX_X_END_S0,
    addr::VPU_MAFBC_BOUNDING_BOX_Y_START_S0,
    addr::VPU_MAFBC_BOUNDING_BOX_Y_END_S0,
    addr::VPU_MAFBC_OUTPUT_BUF_ADDR_LOW_S0,
    addr::VPU_MAFBC_OUTPUT_BUF_ADDR_HIGH_S0,
    addr::VPU_MAFBC_OUTPUT_BUF_STRIDE_S0,
    addr::VPU_MAFBC_PREFETCH_CFG_S0,
];

#[derive(Debug, Default)]
pub struct BackupStore {
    enabled: HwResetReason,
    shadows: [Vec<u32>; 3],
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots every group in `mask` that is not yet enabled, then latches it enabled.
    ///
    /// Returns the groups that were newly enabled. Enabling is permanent.
    pub fn backup_init<B: RegisterBus + ?Sized>(
        &mut self,
        mask: HwResetReason,
        bus: &mut B,
    ) -> HwResetReason {
        let mut newly = HwResetReason::empty();
        for group in BackupGroup::ALL {
            let bit = group.reset_bit();
            if !mask.contains(bit) || self.enabled.contains(bit) {
                continue;
            }
            self.shadows[group.index()] = group.tracked().iter().map(|&a| bus.read_reg(a)).collect();
            newly |= bit;
        }
        self.enabled |= newly;
        if !newly.is_empty() {
            tracing::debug!(groups = ?newly, "register backup enabled");
        }
        newly
    }

    pub fn enabled(&self) -> HwResetReason {
        self.enabled
    }

    pub fn is_enabled(&self, group: BackupGroup) -> bool {
        self.enabled.contains(group.reset_bit())
    }

    /// Records `value` if `addr` is tracked by an enabled group. Returns whether it was recorded.
    pub fn update_backup(&mut self, addr: RegisterAddress, value: u32) -> bool {
        match self.locate(addr) {
            Some((group, slot)) => {
                self.shadows[group.index()][slot] = value;
                true
            }
            None => false,
        }
    }

    pub fn get_backup(&self, addr: RegisterAddress) -> Option<u32> {
        self.locate(addr)
            .map(|(group, slot)| self.shadows[group.index()][slot])
    }

    /// Tracked registers of `group` with their shadow values, in address order.
    ///
    /// Empty while the group is not enabled.
    pub fn entries(&self, group: BackupGroup) -> impl Iterator<Item = (RegisterAddress, u32)> + '_ {
        let values: &[u32] = if self.is_enabled(group) {
            &self.shadows[group.index()]
        } else {
            &[]
        };
        group.tracked().iter().copied().zip(values.iter().copied())
    }

    fn locate(&self, addr: RegisterAddress) -> Option<(BackupGroup, usize)> {
        BackupGroup::ALL
            .into_iter()
            .filter(|group| self.is_enabled(*group))
            .find_map(|group| {
                group
                    .tracked()
                    .binary_search(&addr)
                    .ok()
                    .map(|slot| (group, slot))
            })
    }
}
