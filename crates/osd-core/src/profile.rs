//! Chip-generation specifics.
//!
//! Two register layouts exist: the legacy one (GXBB through TXHD) and the G12A one, which adds
//! OSD3, the VIU blend block and the MALI AFBC decoder. Everything that differs between them is
//! behind [`ChipProfile`], selected once when the core learns which SoC it runs on.

use osd_regs::{addr, range, HwResetReason, RegisterAddress};

use crate::backup::BackupGroup;
use crate::recovery::RecoveryTableDescriptor;

/// SoC major IDs, in release order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuId {
    Gxbb,
    Gxtvbb,
    Gxl,
    Gxm,
    Txl,
    Txlx,
    Axg,
    Gxlx,
    Txhd,
    G12a,
    G12b,
    Tl1,
}

impl CpuId {
    pub fn is_g12a_family(self) -> bool {
        matches!(self, CpuId::G12a | CpuId::G12b | CpuId::Tl1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfbcType {
    None,
    /// The OSD1-only decoder of GXTVBB/GXM.
    Meson,
    Mali,
}

/// Inputs to hardware-reset detection, sampled once per vsync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureState {
    pub afbc_enabled: bool,
    pub hdr_active: bool,
    /// HDR was active at the previous sample.
    pub hdr_was_active: bool,
    pub afbc_force_reset: bool,
    pub afbc_status_err_reset: bool,
    /// A MALI decode error was latched since the previous sample.
    pub afbc_decode_error: bool,
}

pub trait ChipProfile: Send + Sync {
    fn cpu_id(&self) -> CpuId;
    fn afbc_type(&self) -> AfbcType;
    fn osd_count(&self) -> usize;
    fn recovery_tables(&self) -> &'static [RecoveryTableDescriptor];
    fn reset_reason_for(&self, features: &FeatureState) -> HwResetReason;

    /// GXM and later only reset the Meson AFBC hardware, never its top registers.
    fn restores_afbcd_regs(&self) -> bool {
        self.cpu_id() < CpuId::Gxm
    }

    /// The MALI decoder needs an explicit start after its registers are restored.
    fn restarts_mali_after_restore(&self) -> bool {
        false
    }

    /// Registers whose recovery is skipped and reported as already done.
    fn recovery_exempt(&self, _addr: RegisterAddress, _enable_vd_zorder: bool) -> bool {
        false
    }
}

pub fn profile_for(cpu: CpuId) -> Box<dyn ChipProfile> {
    if cpu.is_g12a_family() {
        Box::new(G12aProfile { cpu })
    } else {
        Box::new(LegacyProfile { cpu })
    }
}

/// OSD bits of `VPP_MISC`: postblend enables and the OSD order.
pub(crate) const VPP_MISC_OSD_MASK: u32 = (1 << 12) | (1 << 13) | (1 << 26);

const OSD1_MASKS: &[(RegisterAddress, u32)] = &[(addr::VIU_OSD1_TEST_RDDATA, 0)];
const OSD2_MASKS: &[(RegisterAddress, u32)] = &[(addr::OSD_RDMA_FLAG_REG, 0)];
const VPP_MISC_MASKS: &[(RegisterAddress, u32)] = &[(addr::VPP_MISC, VPP_MISC_OSD_MASK)];
const MALI_MASKS: &[(RegisterAddress, u32)] = &[
    (addr::VPU_MAFBC_IRQ_RAW_STATUS, 0),
    (addr::VPU_MAFBC_IRQ_CLEAR, 0),
    (addr::VPU_MAFBC_IRQ_STATUS, 0),
    (addr::VPU_MAFBC_COMMAND, 0),
    (addr::VPU_MAFBC_STATUS, 0),
];

const VPP_MISC_RANGE: osd_regs::RegisterRange =
    osd_regs::RegisterRange::new(addr::VPP_MISC, addr::VPP_MISC);

static LEGACY_TABLES: [RecoveryTableDescriptor; 5] = [
    RecoveryTableDescriptor::new(range::OSD1)
        .with_group(BackupGroup::Osd1)
        .with_masks(OSD1_MASKS),
    RecoveryTableDescriptor::new(range::OSD2).with_masks(OSD2_MASKS),
    RecoveryTableDescriptor::new(range::VPP_OSD_SCALER),
    RecoveryTableDescriptor::new(VPP_MISC_RANGE).with_masks(VPP_MISC_MASKS),
    RecoveryTableDescriptor::new(range::AFBCD).with_group(BackupGroup::Afbcd),
];

static G12A_TABLES: [RecoveryTableDescriptor; 8] = [
    RecoveryTableDescriptor::new(range::OSD1)
        .with_group(BackupGroup::Osd1)
        .with_masks(OSD1_MASKS),
    RecoveryTableDescriptor::new(range::OSD2).with_masks(OSD2_MASKS),
    RecoveryTableDescriptor::new(range::OSD3),
    RecoveryTableDescriptor::new(range::VPP_OSD_SCALER),
    RecoveryTableDescriptor::new(VPP_MISC_RANGE).with_masks(VPP_MISC_MASKS),
    RecoveryTableDescriptor::new(range::VPP_BLEND_SRC),
    RecoveryTableDescriptor::new(range::OSD_BLEND),
    RecoveryTableDescriptor::new(range::MALI_AFBCD)
        .with_group(BackupGroup::MaliAfbcd)
        .with_masks(MALI_MASKS),
];

#[derive(Clone, Copy, Debug)]
pub struct LegacyProfile {
    cpu: CpuId,
}

impl LegacyProfile {
    pub fn new(cpu: CpuId) -> Self {
        Self { cpu }
    }
}

impl ChipProfile for LegacyProfile {
    fn cpu_id(&self) -> CpuId {
        self.cpu
    }

    fn afbc_type(&self) -> AfbcType {
        match self.cpu {
            CpuId::Gxtvbb | CpuId::Gxm => AfbcType::Meson,
            _ => AfbcType::None,
        }
    }

    fn osd_count(&self) -> usize {
        2
    }

    fn recovery_tables(&self) -> &'static [RecoveryTableDescriptor] {
        &LEGACY_TABLES
    }

    fn reset_reason_for(&self, features: &FeatureState) -> HwResetReason {
        let mut reason = HwResetReason::empty();
        let hdr = features.hdr_active || features.hdr_was_active;
        match self.cpu {
            CpuId::Gxtvbb => {
                if features.afbc_enabled {
                    reason |= HwResetReason::AFBCD_REGS;
                }
            }
            CpuId::Gxm => {
                // Same bit, but GXM only resets the decoder itself.
                if features.afbc_enabled {
                    reason |= HwResetReason::AFBCD_REGS;
                }
                if hdr {
                    reason |= HwResetReason::OSD1_REGS;
                }
            }
            CpuId::Gxl | CpuId::Txl => {
                if hdr {
                    reason |= HwResetReason::OSD1_REGS;
                }
            }
            _ => {}
        }
        reason
    }
}

#[derive(Clone, Copy, Debug)]
pub struct G12aProfile {
    cpu: CpuId,
}

impl G12aProfile {
    pub fn new(cpu: CpuId) -> Self {
        Self { cpu }
    }
}

impl ChipProfile for G12aProfile {
    fn cpu_id(&self) -> CpuId {
        self.cpu
    }

    fn afbc_type(&self) -> AfbcType {
        AfbcType::Mali
    }

    fn osd_count(&self) -> usize {
        3
    }

    fn recovery_tables(&self) -> &'static [RecoveryTableDescriptor] {
        &G12A_TABLES
    }

    fn reset_reason_for(&self, features: &FeatureState) -> HwResetReason {
        let mut reason = HwResetReason::empty();
        if features.afbc_enabled && features.afbc_force_reset {
            reason |= HwResetReason::MALI_AFBCD_REGS;
        }
        if features.afbc_enabled && features.afbc_decode_error && features.afbc_status_err_reset {
            reason |= HwResetReason::MALI_AFBCD_REGS;
        }
        reason
    }

    fn restarts_mali_after_restore(&self) -> bool {
        true
    }

    /// With video z-ordering, the OSD2 blend source is owned by the video path.
    fn recovery_exempt(&self, addr: RegisterAddress, enable_vd_zorder: bool) -> bool {
        enable_vd_zorder && addr == addr::VPP_OSD2_BLEND_SRC_CTRL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_disjoint(tables: &[RecoveryTableDescriptor]) -> bool {
        tables.iter().enumerate().all(|(i, a)| {
            tables[i + 1..]
                .iter()
                .all(|b| !a.range.overlaps(&b.range))
        })
    }

    #[test]
    fn recovery_tables_never_overlap() {
        assert!(tables_disjoint(&LEGACY_TABLES));
        assert!(tables_disjoint(&G12A_TABLES));
    }

    #[test]
    fn profile_selection_by_generation() {
        assert_eq!(profile_for(CpuId::G12b).afbc_type(), AfbcType::Mali);
        assert_eq!(profile_for(CpuId::G12b).osd_count(), 3);
        assert_eq!(profile_for(CpuId::Gxm).afbc_type(), AfbcType::Meson);
        assert_eq!(profile_for(CpuId::Gxl).afbc_type(), AfbcType::None);
        assert!(profile_for(CpuId::Gxtvbb).restores_afbcd_regs());
        assert!(!profile_for(CpuId::Gxm).restores_afbcd_regs());
    }

    #[test]
    fn legacy_reset_reasons() {
        let afbc = FeatureState {
            afbc_enabled: true,
            ..FeatureState::default()
        };
        assert_eq!(
            LegacyProfile::new(CpuId::Gxtvbb).reset_reason_for(&afbc),
            HwResetReason::AFBCD_REGS
        );
        assert_eq!(
            LegacyProfile::new(CpuId::Gxl).reset_reason_for(&afbc),
            HwResetReason::empty()
        );

        let hdr_just_off = FeatureState {
            hdr_was_active: true,
            ..FeatureState::default()
        };
        assert_eq!(
            LegacyProfile::new(CpuId::Gxm).reset_reason_for(&hdr_just_off),
            HwResetReason::OSD1_REGS
        );
        assert_eq!(
            LegacyProfile::new(CpuId::Txl).reset_reason_for(&hdr_just_off),
            HwResetReason::OSD1_REGS
        );
        assert_eq!(
            LegacyProfile::new(CpuId::Gxbb).reset_reason_for(&hdr_just_off),
            HwResetReason::empty()
        );
    }

    #[test]
    fn g12a_resets_mali_on_force_or_error() {
        let profile = G12aProfile::new(CpuId::G12a);
        let base = FeatureState {
            afbc_enabled: true,
            afbc_status_err_reset: true,
            ..FeatureState::default()
        };
        assert_eq!(profile.reset_reason_for(&base), HwResetReason::empty());
        assert_eq!(
            profile.reset_reason_for(&FeatureState {
                afbc_decode_error: true,
                ..base
            }),
            HwResetReason::MALI_AFBCD_REGS
        );
        assert_eq!(
            profile.reset_reason_for(&FeatureState {
                afbc_force_reset: true,
                ..base
            }),
            HwResetReason::MALI_AFBCD_REGS
        );
        assert_eq!(
            profile.reset_reason_for(&FeatureState {
                afbc_enabled: false,
                afbc_force_reset: true,
                afbc_decode_error: true,
                ..base
            }),
            HwResetReason::empty()
        );
    }

    #[test]
    fn vd_zorder_exempts_only_osd2_blend_source() {
        let profile = G12aProfile::new(CpuId::G12a);
        assert!(profile.recovery_exempt(addr::VPP_OSD2_BLEND_SRC_CTRL, true));
        assert!(!profile.recovery_exempt(addr::VPP_OSD2_BLEND_SRC_CTRL, false));
        assert!(!profile.recovery_exempt(addr::VPP_OSD1_BLEND_SRC_CTRL, true));
        assert!(!LegacyProfile::new(CpuId::Gxl).recovery_exempt(addr::VPP_OSD2_BLEND_SRC_CTRL, true));
    }
}
