//! CPU-side record of the bits software last asked for, per tracked register.
//!
//! The store is built from the chip profile's table descriptors by
//! [`RecoveryStore::recovery_init`]. Until then it is inert: every lookup misses.
//!
//! Per item the state machine is:
//!
//! ```text
//! Clean --update--> NeedsRecovery --get (hardware matches)--> Recovered
//!                        ^                                        |
//!                        +----------------update------------------+
//! ```
//!
//! A `get` that finds hardware diverging returns the merged value to write and leaves the item in
//! `NeedsRecovery`; the item only becomes `Recovered` once hardware is observed to hold it.

use osd_regs::{HwResetReason, RegisterAddress, RegisterRange};
use thiserror::Error;

use crate::backup::BackupGroup;

/// One contiguous recovery table as a chip profile describes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryTableDescriptor {
    pub range: RegisterRange,
    /// Backup group whose enable bit makes recovery of this range redundant.
    pub group: Option<BackupGroup>,
    /// Per-register masks; registers not listed use `u32::MAX`.
    pub masks: &'static [(RegisterAddress, u32)],
}

impl RecoveryTableDescriptor {
    pub const fn new(range: RegisterRange) -> Self {
        Self {
            range,
            group: None,
            masks: &[],
        }
    }

    pub const fn with_group(mut self, group: BackupGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub const fn with_masks(mut self, masks: &'static [(RegisterAddress, u32)]) -> Self {
        self.masks = masks;
        self
    }

    pub fn mask_for(&self, addr: RegisterAddress) -> u32 {
        self.masks
            .iter()
            .find(|(a, _)| *a == addr)
            .map_or(u32::MAX, |(_, mask)| *mask)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    Clean,
    NeedsRecovery,
    Recovered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryItem {
    pub addr: RegisterAddress,
    pub val: u32,
    pub mask: u32,
    pub state: RecoveryState,
}

#[derive(Clone, Debug)]
pub struct RecoveryTable {
    pub base: RegisterAddress,
    pub group: Option<BackupGroup>,
    pub items: Vec<RecoveryItem>,
}

impl RecoveryTable {
    fn from_descriptor(desc: &RecoveryTableDescriptor) -> Self {
        let items = desc
            .range
            .iter()
            .map(|addr| RecoveryItem {
                addr,
                val: 0,
                mask: desc.mask_for(addr),
                state: RecoveryState::Clean,
            })
            .collect();
        Self {
            base: desc.range.first,
            group: desc.group,
            items,
        }
    }

    fn slot(&self, addr: RegisterAddress) -> Option<usize> {
        addr.offset_from(self.base).filter(|i| *i < self.items.len())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Tracked, but software never wrote it.
    NoActionNeeded,
    AlreadyRecovered,
    NeedsRecovery { value: u32, mask: u32 },
    NotTracked,
}

/// Why [`RecoveryStore::update_recovery`] did not act as the sole owner of a register.
///
/// Both cases are routine: most registers are untracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RecoveryMiss {
    #[error("register {0} is not recovery-tracked")]
    NotTracked(RegisterAddress),

    /// The value was recorded, but the `group` backup already restores this register.
    #[error("register {addr} is covered by the {group:?} backup")]
    CoveredByBackup {
        addr: RegisterAddress,
        group: BackupGroup,
    },
}

#[derive(Debug, Default)]
pub struct RecoveryStore {
    tables: Vec<RecoveryTable>,
    initialized: bool,
}

impl RecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tables. Returns `false` if they were already built.
    pub fn recovery_init(&mut self, descriptors: &[RecoveryTableDescriptor]) -> bool {
        if self.initialized {
            return false;
        }
        self.tables = descriptors
            .iter()
            .map(RecoveryTable::from_descriptor)
            .collect();
        self.initialized = true;
        tracing::debug!(tables = self.tables.len(), "recovery tables initialized");
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn tables(&self) -> &[RecoveryTable] {
        &self.tables
    }

    /// Records `value` as the wanted value of `addr` and marks the item dirty.
    pub fn update_recovery(
        &mut self,
        addr: RegisterAddress,
        value: u32,
        backup_enabled: HwResetReason,
    ) -> Result<(), RecoveryMiss> {
        let Some((group, item)) = self.item_mut(addr) else {
            return Err(RecoveryMiss::NotTracked(addr));
        };
        item.val = value;
        item.state = RecoveryState::NeedsRecovery;
        match group {
            Some(group) if backup_enabled.contains(group.reset_bit()) => {
                Err(RecoveryMiss::CoveredByBackup { addr, group })
            }
            _ => Ok(()),
        }
    }

    /// Compares the wanted value of `addr` against hardware.
    ///
    /// `live` is only called for tracked, dirty items.
    pub fn get_recovery(
        &mut self,
        addr: RegisterAddress,
        live: impl FnOnce() -> u32,
    ) -> RecoveryDecision {
        let Some((_, item)) = self.item_mut(addr) else {
            return RecoveryDecision::NotTracked;
        };
        match item.state {
            RecoveryState::Clean => RecoveryDecision::NoActionNeeded,
            RecoveryState::Recovered => RecoveryDecision::AlreadyRecovered,
            RecoveryState::NeedsRecovery => {
                let live = live();
                if live & item.mask == item.val & item.mask {
                    item.state = RecoveryState::Recovered;
                    RecoveryDecision::AlreadyRecovered
                } else {
                    RecoveryDecision::NeedsRecovery {
                        value: (live & !item.mask) | (item.val & item.mask),
                        mask: item.mask,
                    }
                }
            }
        }
    }

    /// Marks a dirty item recovered without consulting hardware.
    pub fn mark_recovered(&mut self, addr: RegisterAddress) -> bool {
        match self.item_mut(addr) {
            Some((_, item)) if item.state == RecoveryState::NeedsRecovery => {
                item.state = RecoveryState::Recovered;
                true
            }
            _ => false,
        }
    }

    pub fn item(&self, addr: RegisterAddress) -> Option<&RecoveryItem> {
        self.tables
            .iter()
            .find_map(|t| t.slot(addr).map(|i| &t.items[i]))
    }

    fn item_mut(&mut self, addr: RegisterAddress) -> Option<(Option<BackupGroup>, &mut RecoveryItem)> {
        for table in &mut self.tables {
            if let Some(i) = table.slot(addr) {
                return Some((table.group, &mut table.items[i]));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osd_regs::{addr, range};
    use proptest::prelude::*;

    const MASKS: &[(RegisterAddress, u32)] = &[(addr::VIU_OSD1_COLOR, 0x0000_ff00)];

    fn store() -> RecoveryStore {
        let mut store = RecoveryStore::new();
        store.recovery_init(&[
            RecoveryTableDescriptor::new(range::OSD1)
                .with_group(BackupGroup::Osd1)
                .with_masks(MASKS),
            RecoveryTableDescriptor::new(range::VPP_OSD_SCALER),
        ]);
        store
    }

    #[test]
    fn inert_before_init() {
        let mut store = RecoveryStore::new();
        assert_eq!(
            store.update_recovery(addr::VIU_OSD1_CTRL_STAT, 1, HwResetReason::empty()),
            Err(RecoveryMiss::NotTracked(addr::VIU_OSD1_CTRL_STAT))
        );
        assert_eq!(
            store.get_recovery(addr::VIU_OSD1_CTRL_STAT, || 0),
            RecoveryDecision::NotTracked
        );
    }

    #[test]
    fn init_is_idempotent() {
        let mut store = store();
        store
            .update_recovery(addr::VPP_OSD_SC_CTRL0, 4, HwResetReason::empty())
            .unwrap();
        assert!(!store.recovery_init(&[]));
        assert_eq!(store.tables().len(), 2);
        assert_eq!(
            store.item(addr::VPP_OSD_SC_CTRL0).map(|i| i.state),
            Some(RecoveryState::NeedsRecovery)
        );
    }

    #[test]
    fn clean_item_needs_nothing() {
        let mut store = store();
        assert_eq!(
            store.get_recovery(addr::VIU_OSD1_CTRL_STAT, || unreachable!()),
            RecoveryDecision::NoActionNeeded
        );
    }

    #[test]
    fn mismatch_merges_masked_bits_and_stays_dirty() {
        let mut store = store();
        store
            .update_recovery(addr::VIU_OSD1_COLOR, 0x1234_5678, HwResetReason::empty())
            .unwrap();
        let decision = store.get_recovery(addr::VIU_OSD1_COLOR, || 0xaaaa_aaaa);
        assert_eq!(
            decision,
            RecoveryDecision::NeedsRecovery {
                value: 0xaaaa_56aa,
                mask: 0x0000_ff00
            }
        );
        assert_eq!(
            store.item(addr::VIU_OSD1_COLOR).map(|i| i.state),
            Some(RecoveryState::NeedsRecovery)
        );

        // Bits outside the mask never matter.
        assert_eq!(
            store.get_recovery(addr::VIU_OSD1_COLOR, || 0x0000_5600),
            RecoveryDecision::AlreadyRecovered
        );
        assert_eq!(
            store.item(addr::VIU_OSD1_COLOR).map(|i| i.state),
            Some(RecoveryState::Recovered)
        );
        // Recovered short-circuits without reading hardware.
        assert_eq!(
            store.get_recovery(addr::VIU_OSD1_COLOR, || unreachable!()),
            RecoveryDecision::AlreadyRecovered
        );
    }

    #[test]
    fn backup_covered_group_records_but_reports_miss() {
        let mut store = store();
        assert_eq!(
            store.update_recovery(addr::VIU_OSD1_CTRL_STAT, 7, HwResetReason::OSD1_REGS),
            Err(RecoveryMiss::CoveredByBackup {
                addr: addr::VIU_OSD1_CTRL_STAT,
                group: BackupGroup::Osd1
            })
        );
        assert_eq!(store.item(addr::VIU_OSD1_CTRL_STAT).map(|i| i.val), Some(7));
        // Groups without a backup bit are unaffected by the mask.
        assert_eq!(
            store.update_recovery(addr::VPP_OSD_SC_CTRL0, 1, HwResetReason::OSD1_REGS),
            Ok(())
        );
    }

    #[test]
    fn mark_recovered_only_moves_dirty_items() {
        let mut store = store();
        assert!(!store.mark_recovered(addr::VPP_OSD_SC_CTRL0));
        store
            .update_recovery(addr::VPP_OSD_SC_CTRL0, 1, HwResetReason::empty())
            .unwrap();
        assert!(store.mark_recovered(addr::VPP_OSD_SC_CTRL0));
        assert_eq!(
            store.get_recovery(addr::VPP_OSD_SC_CTRL0, || 0),
            RecoveryDecision::AlreadyRecovered
        );
    }

    proptest! {
        #[test]
        fn round_trip_until_hardware_holds_value(
            offset in 0u16..0x20,
            wanted in any::<u32>(),
            stale in any::<u32>(),
        ) {
            let addr = range::OSD1.first.checked_add(offset).unwrap();
            let mut store = store();
            store.update_recovery(addr, wanted, HwResetReason::empty()).unwrap();
            let mask = store.item(addr).unwrap().mask;

            match store.get_recovery(addr, || stale) {
                RecoveryDecision::NeedsRecovery { value, mask: m } => {
                    prop_assert_eq!(m, mask);
                    prop_assert_eq!(value & mask, wanted & mask);
                    prop_assert_eq!(value & !mask, stale & !mask);
                    // Applying the merged value settles the item.
                    prop_assert_eq!(
                        store.get_recovery(addr, || value),
                        RecoveryDecision::AlreadyRecovered
                    );
                }
                RecoveryDecision::AlreadyRecovered => {
                    prop_assert_eq!(stale & mask, wanted & mask);
                }
                other => prop_assert!(false, "unexpected decision {:?}", other),
            }
            prop_assert_eq!(
                store.get_recovery(addr, || !wanted),
                RecoveryDecision::AlreadyRecovered
            );
        }
    }
}
