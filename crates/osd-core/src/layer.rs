//! Per-output layer shadow state and the register writes each [`UpdateKind`] produces from it.
//!
//! Applying an update is split in two steps so the same code serves both the immediate path
//! (writes go through the retrying append) and the vsync path (writes go straight into the table
//! from interrupt context): [`plan_update`] reads the current register view and returns the
//! writes, the caller decides how to issue them.

use osd_regs::{addr, RegisterAddress, RegisterWrite};

use crate::profile::AfbcType;
use crate::update_list::UpdateKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsdOutput {
    Osd1,
    Osd2,
    Osd3,
}

impl OsdOutput {
    pub const COUNT: usize = 3;
    pub const ALL: [OsdOutput; OsdOutput::COUNT] = [OsdOutput::Osd1, OsdOutput::Osd2, OsdOutput::Osd3];

    pub const fn index(self) -> usize {
        match self {
            OsdOutput::Osd1 => 0,
            OsdOutput::Osd2 => 1,
            OsdOutput::Osd3 => 2,
        }
    }

    pub fn regs(self) -> OsdRegs {
        match self {
            OsdOutput::Osd1 => OsdRegs::at(addr::VIU_OSD1_CTRL_STAT),
            OsdOutput::Osd2 => OsdRegs::at(addr::VIU_OSD2_CTRL_STAT),
            OsdOutput::Osd3 => OsdRegs::at(addr::VIU_OSD3_CTRL_STAT),
        }
    }
}

/// Register block of one OSD layer. All three share the same layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsdRegs {
    pub ctrl_stat: RegisterAddress,
    pub blk0_cfg_w4: RegisterAddress,
    pub tcolor_ag0: RegisterAddress,
    pub blk0_cfg_w0: RegisterAddress,
    pub blk0_cfg_w1: RegisterAddress,
    pub blk0_cfg_w2: RegisterAddress,
    pub blk0_cfg_w3: RegisterAddress,
    pub fifo_ctrl_stat: RegisterAddress,
    pub ctrl_stat2: RegisterAddress,
}

impl OsdRegs {
    const fn at(base: RegisterAddress) -> Self {
        let b = base.raw();
        Self {
            ctrl_stat: base,
            blk0_cfg_w4: RegisterAddress::new(b + 0x03),
            tcolor_ag0: RegisterAddress::new(b + 0x07),
            blk0_cfg_w0: RegisterAddress::new(b + 0x0b),
            blk0_cfg_w1: RegisterAddress::new(b + 0x0c),
            blk0_cfg_w2: RegisterAddress::new(b + 0x0d),
            blk0_cfg_w3: RegisterAddress::new(b + 0x0e),
            fifo_ctrl_stat: RegisterAddress::new(b + 0x1b),
            ctrl_stat2: RegisterAddress::new(b + 0x1d),
        }
    }
}

// CTRL_STAT
const CTRL_ENABLE: u32 = 1 << 0;
const CTRL_GLOBAL_ALPHA_SHIFT: u32 = 12;
const CTRL_GLOBAL_ALPHA_BITS: u32 = 9;

// BLK0_CFG_W0
const W0_PRESERVE_ON_COLOR_MODE: u32 = 0x7000_7040;
const W0_COLOR_KEY_ENABLE: u32 = 1 << 6;
const W0_YUV: u32 = 1 << 7;
const W0_BIG_ENDIAN: u32 = 1 << 15;
const W0_SCALE_V: u32 = 1 << 12;
const W0_SCALE_H: u32 = 1 << 14;
const W0_REVERSE_SHIFT: u32 = 28;

const VPP_MISC_OSD2_ABOVE_OSD1: u32 = 1 << 26;
const VPP_OSD_SC_ENABLE: u32 = 1 << 3;
const AFBCD_ENABLE_KEEP: u32 = 0x100;
const COORD_MASK: u32 = 0x1fff;
const MAX_SCALE_COEFS: usize = 33;

pub const GLOBAL_ALPHA_MAX: u16 = 0x1ff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorMode {
    pub hw_blkmode: u8,
    pub hw_colormat: u8,
    pub yuv: bool,
    pub big_endian: bool,
}

impl Default for ColorMode {
    /// 32bpp ARGB.
    fn default() -> Self {
        Self {
            hw_blkmode: 5,
            hw_colormat: 1,
            yuv: false,
            big_endian: false,
        }
    }
}

/// Inclusive pixel window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
    pub x_start: u16,
    pub x_end: u16,
    pub y_start: u16,
    pub y_end: u16,
}

impl Window {
    pub const fn new(x_start: u16, y_start: u16, x_end: u16, y_end: u16) -> Self {
        Self {
            x_start,
            x_end,
            y_start,
            y_end,
        }
    }

    fn h_word(self) -> u32 {
        (u32::from(self.x_start) & COORD_MASK) | ((u32::from(self.x_end) & COORD_MASK) << 16)
    }

    fn v_word(self) -> u32 {
        (u32::from(self.y_start) & COORD_MASK) | ((u32::from(self.y_end) & COORD_MASK) << 16)
    }

    /// One horizontal half of the window, for frame-sequential stereo.
    fn half(self, phase: StereoPhase) -> Self {
        let mid = self.x_start + (self.x_end.saturating_sub(self.x_start)) / 2;
        match phase {
            StereoPhase::Left => Self { x_end: mid, ..self },
            StereoPhase::Right => Self {
                x_start: mid.saturating_add(1).min(self.x_end),
                ..self
            },
        }
    }
}

/// Source (framebuffer pan) and destination (display) windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    pub src: Window,
    pub dst: Window,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScaleEnable {
    pub horizontal: bool,
    pub vertical: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeScale {
    pub enabled: bool,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
}

fn phase_step(src: u32, dst: u32) -> u32 {
    if dst == 0 {
        return 0;
    }
    ((u64::from(src) << 24) / u64::from(dst)).min(0x0fff_ffff) as u32
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reverse {
    pub x: bool,
    pub y: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Deg90,
    Deg180,
    Deg270,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoConfig {
    pub hold_lines: u8,
    /// 0 = 24, 1 = 32, 2 = 48, 3 = 64 beats.
    pub burst_len: u8,
    pub depth: u8,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            hold_lines: 4,
            burst_len: 2,
            depth: 32,
        }
    }
}

impl FifoConfig {
    fn word(self) -> u32 {
        (u32::from(self.hold_lines) & 0x1f) << 5
            | (u32::from(self.burst_len) & 0x3) << 10
            | (u32::from(self.depth) & 0x7f) << 12
            | 2 << 22
            | 2 << 24
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoPhase {
    Left,
    Right,
}

impl StereoPhase {
    pub fn flipped(self) -> Self {
        match self {
            StereoPhase::Left => StereoPhase::Right,
            StereoPhase::Right => StereoPhase::Left,
        }
    }
}

/// What software wants one OSD layer to look like.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerState {
    pub canvas_index: u8,
    pub color_mode: ColorMode,
    pub enabled: bool,
    pub color_key: u32,
    pub color_key_enabled: bool,
    pub global_alpha: u16,
    pub z_order: u8,
    pub scale_coef: Vec<u32>,
    pub geometry: Geometry,
    pub scale_enable: ScaleEnable,
    pub free_scale: FreeScale,
    pub reverse: Reverse,
    pub rotation: Rotation,
    pub fifo: FifoConfig,
    /// Frame-sequential stereo phase, if stereo is on.
    pub stereo: Option<StereoPhase>,
    pub afbc_enabled: bool,
}

impl LayerState {
    pub(crate) fn set_scale_coef(&mut self, coef: &[u32]) {
        self.scale_coef = coef.iter().copied().take(MAX_SCALE_COEFS).collect();
    }
}

/// Source of current register values while planning.
pub(crate) trait RegisterView {
    fn view(&mut self, addr: RegisterAddress) -> u32;
}

/// Chip facts that change what an update writes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlanContext {
    pub afbc_type: AfbcType,
    pub osd_blend: bool,
}

struct Plan<'a, V: ?Sized> {
    view: &'a mut V,
    writes: Vec<RegisterWrite>,
}

impl<V: RegisterView + ?Sized> Plan<'_, V> {
    fn read(&mut self, addr: RegisterAddress) -> u32 {
        match self.writes.iter().rev().find(|w| w.addr == addr) {
            Some(w) => w.value,
            None => self.view.view(addr),
        }
    }

    fn write(&mut self, addr: RegisterAddress, value: u32) {
        self.writes.push(RegisterWrite::new(addr, value));
    }

    fn write_bits(&mut self, addr: RegisterAddress, value: u32, start: u32, len: u32) {
        let old = self.read(addr);
        self.write(addr, osd_bus::insert_bits(old, value, start, len));
    }

    fn set_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let old = self.read(addr);
        self.write(addr, old | mask);
    }

    fn clr_mask(&mut self, addr: RegisterAddress, mask: u32) {
        let old = self.read(addr);
        self.write(addr, old & !mask);
    }

    fn assign_mask(&mut self, addr: RegisterAddress, mask: u32, on: bool) {
        if on {
            self.set_mask(addr, mask);
        } else {
            self.clr_mask(addr, mask);
        }
    }
}

/// Register writes that bring hardware in line with `layers[output]` for `kind`.
pub(crate) fn plan_update<V: RegisterView + ?Sized>(
    kind: UpdateKind,
    output: OsdOutput,
    layers: &[LayerState],
    ctx: PlanContext,
    view: &mut V,
) -> Vec<RegisterWrite> {
    let mut plan = Plan {
        view,
        writes: Vec::new(),
    };
    let layer = &layers[output.index()];
    let regs = output.regs();

    match kind {
        UpdateKind::ColorMode => {
            let mode = layer.color_mode;
            let mut w0 = plan.read(regs.blk0_cfg_w0) & W0_PRESERVE_ON_COLOR_MODE;
            w0 |= u32::from(layer.canvas_index) << 16;
            if mode.big_endian {
                w0 |= W0_BIG_ENDIAN;
            }
            w0 |= (u32::from(mode.hw_colormat) & 0xf) << 2;
            if mode.yuv {
                w0 |= W0_YUV;
            }
            w0 |= (u32::from(mode.hw_blkmode) & 0xf) << 8;
            plan.write(regs.blk0_cfg_w0, w0);

            // The decoder must see the new format in the same generation as the layer.
            match (ctx.afbc_type, output) {
                (AfbcType::Meson, OsdOutput::Osd1) => {
                    if layer.afbc_enabled {
                        plan.write(addr::OSD1_AFBCD_MODE, u32::from(mode.hw_blkmode) << 24);
                    }
                    plan.write(
                        addr::OSD1_AFBCD_ENABLE,
                        AFBCD_ENABLE_KEEP | u32::from(layer.afbc_enabled),
                    );
                }
                (AfbcType::Mali, _) => {
                    if layer.afbc_enabled {
                        plan.write(addr::VPU_MAFBC_FORMAT_SPECIFIER_S0, u32::from(mode.hw_blkmode));
                    }
                    plan.assign_mask(
                        addr::VPU_MAFBC_SURFACE_CFG,
                        1 << output.index(),
                        layer.afbc_enabled,
                    );
                }
                _ => {}
            }
        }
        UpdateKind::Enable => {
            plan.assign_mask(regs.ctrl_stat, CTRL_ENABLE, layer.enabled);
            let postblend = match output {
                OsdOutput::Osd1 => Some(1 << 12),
                OsdOutput::Osd2 => Some(1 << 13),
                OsdOutput::Osd3 => None,
            };
            if let Some(bit) = postblend {
                plan.assign_mask(addr::VPP_MISC, bit, layer.enabled);
            }
        }
        UpdateKind::ColorKey => {
            plan.write(regs.tcolor_ag0, layer.color_key);
            plan.assign_mask(regs.blk0_cfg_w0, W0_COLOR_KEY_ENABLE, layer.color_key_enabled);
        }
        UpdateKind::ColorKeyEnable => {
            plan.assign_mask(regs.blk0_cfg_w0, W0_COLOR_KEY_ENABLE, layer.color_key_enabled);
        }
        UpdateKind::GlobalAlpha => {
            plan.write_bits(
                regs.ctrl_stat,
                u32::from(layer.global_alpha.min(GLOBAL_ALPHA_MAX)),
                CTRL_GLOBAL_ALPHA_SHIFT,
                CTRL_GLOBAL_ALPHA_BITS,
            );
        }
        UpdateKind::Order => {
            if ctx.osd_blend {
                let z = |o: OsdOutput| u32::from(layers[o.index()].z_order) & 0xf;
                let blend = z(OsdOutput::Osd1) | z(OsdOutput::Osd2) << 4 | z(OsdOutput::Osd3) << 8;
                plan.write_bits(addr::VIU_OSD_BLEND_CTRL, blend, 0, 12);
                let src_ctrl = match output {
                    OsdOutput::Osd1 => Some(addr::VPP_OSD1_BLEND_SRC_CTRL),
                    OsdOutput::Osd2 => Some(addr::VPP_OSD2_BLEND_SRC_CTRL),
                    OsdOutput::Osd3 => None,
                };
                if let Some(reg) = src_ctrl {
                    plan.write(reg, z(output) | u32::from(layer.enabled) << 8);
                }
            } else {
                let osd2_above =
                    layers[OsdOutput::Osd2.index()].z_order > layers[OsdOutput::Osd1.index()].z_order;
                plan.assign_mask(addr::VPP_MISC, VPP_MISC_OSD2_ABOVE_OSD1, osd2_above);
            }
        }
        UpdateKind::ScaleCoef => {
            plan.write(addr::VPP_OSD_SCALE_COEF_IDX, 0);
            for &coef in &layer.scale_coef {
                plan.write(addr::VPP_OSD_SCALE_COEF, coef);
            }
        }
        UpdateKind::Geometry => {
            let src = match layer.stereo {
                Some(phase) => layer.geometry.src.half(phase),
                None => layer.geometry.src,
            };
            let dst = layer.geometry.dst;
            plan.write(regs.blk0_cfg_w1, src.h_word());
            plan.write(regs.blk0_cfg_w2, src.v_word());
            plan.write(regs.blk0_cfg_w3, dst.h_word());
            plan.write(regs.blk0_cfg_w4, dst.v_word());

            if output == OsdOutput::Osd1 && layer.afbc_enabled {
                match ctx.afbc_type {
                    AfbcType::Meson => {
                        // The AFBC decoder takes its scope end-first.
                        plan.write(addr::OSD1_AFBCD_PIXEL_HSCOPE, src.h_word().rotate_left(16));
                        plan.write(addr::OSD1_AFBCD_PIXEL_VSCOPE, src.v_word().rotate_left(16));
                    }
                    AfbcType::Mali => {
                        plan.write(addr::VPU_MAFBC_BOUNDING_BOX_X_START_S0, src.x_start.into());
                        plan.write(addr::VPU_MAFBC_BOUNDING_BOX_X_END_S0, src.x_end.into());
                        plan.write(addr::VPU_MAFBC_BOUNDING_BOX_Y_START_S0, src.y_start.into());
                        plan.write(addr::VPU_MAFBC_BOUNDING_BOX_Y_END_S0, src.y_end.into());
                    }
                    AfbcType::None => {}
                }
            }
            if ctx.osd_blend && output == OsdOutput::Osd1 {
                plan.write(addr::VIU_OSD_BLEND_DIN0_SCOPE_H, dst.h_word());
                plan.write(addr::VIU_OSD_BLEND_DIN0_SCOPE_V, dst.v_word());
            }
        }
        UpdateKind::ScaleEnable => {
            plan.assign_mask(regs.blk0_cfg_w0, W0_SCALE_H, layer.scale_enable.horizontal);
            plan.assign_mask(regs.blk0_cfg_w0, W0_SCALE_V, layer.scale_enable.vertical);
        }
        UpdateKind::FreescaleEnable => {
            let fs = layer.free_scale;
            if fs.enabled {
                plan.write(addr::VPP_OSD_SC_CTRL0, VPP_OSD_SC_ENABLE | output.index() as u32);
                plan.write(addr::VPP_OSD_HSC_CTRL0, phase_step(fs.src_width, fs.dst_width));
                plan.write(addr::VPP_OSD_VSC_CTRL0, phase_step(fs.src_height, fs.dst_height));
            } else {
                plan.write(addr::VPP_OSD_SC_CTRL0, 0);
                plan.write(addr::VPP_OSD_HSC_CTRL0, 0);
                plan.write(addr::VPP_OSD_VSC_CTRL0, 0);
            }
        }
        UpdateKind::Reverse => {
            let bits = u32::from(layer.reverse.x) | u32::from(layer.reverse.y) << 1;
            plan.write_bits(regs.blk0_cfg_w0, bits, W0_REVERSE_SHIFT, 2);
        }
        UpdateKind::Rotate => {
            let quarter_turns = match layer.rotation {
                Rotation::None => 0,
                Rotation::Deg90 => 1,
                Rotation::Deg180 => 2,
                Rotation::Deg270 => 3,
            };
            plan.write_bits(regs.ctrl_stat2, quarter_turns, 0, 2);
        }
        UpdateKind::Fifo => {
            plan.write(regs.fifo_ctrl_stat, layer.fifo.word());
        }
    }

    plan.writes
}
