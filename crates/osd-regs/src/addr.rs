//! VCBUS register offsets used by the OSD core.
//!
//! Only the registers the deferred-update core programs, tracks or reserves are listed.

use crate::RegisterAddress;

const fn r(raw: u16) -> RegisterAddress {
    RegisterAddress::new(raw)
}

// RDMA controller.
pub const RDMA_AHB_START_ADDR_MAN: RegisterAddress = r(0x1100);
pub const RDMA_AHB_END_ADDR_MAN: RegisterAddress = r(0x1101);
pub const RDMA_AHB_START_ADDR_1: RegisterAddress = r(0x1102);
pub const RDMA_AHB_END_ADDR_1: RegisterAddress = r(0x1103);
pub const RDMA_AHB_START_ADDR_2: RegisterAddress = r(0x1104);
pub const RDMA_AHB_END_ADDR_2: RegisterAddress = r(0x1105);
pub const RDMA_AHB_START_ADDR_3: RegisterAddress = r(0x1106);
pub const RDMA_AHB_END_ADDR_3: RegisterAddress = r(0x1107);
pub const RDMA_ACCESS_AUTO: RegisterAddress = r(0x1110);
pub const RDMA_ACCESS_MAN: RegisterAddress = r(0x1113);
pub const RDMA_CTRL: RegisterAddress = r(0x1114);
pub const RDMA_STATUS: RegisterAddress = r(0x1115);

// VIU top.
pub const VIU_SW_RESET: RegisterAddress = r(0x1a01);

// OSD1.
pub const VIU_OSD1_CTRL_STAT: RegisterAddress = r(0x1a10);
pub const VIU_OSD1_COLOR_ADDR: RegisterAddress = r(0x1a11);
pub const VIU_OSD1_COLOR: RegisterAddress = r(0x1a12);
pub const VIU_OSD1_BLK0_CFG_W4: RegisterAddress = r(0x1a13);
pub const VIU_OSD1_BLK1_CFG_W4: RegisterAddress = r(0x1a14);
pub const VIU_OSD1_BLK2_CFG_W4: RegisterAddress = r(0x1a15);
pub const VIU_OSD1_BLK3_CFG_W4: RegisterAddress = r(0x1a16);
pub const VIU_OSD1_TCOLOR_AG0: RegisterAddress = r(0x1a17);
pub const VIU_OSD1_TCOLOR_AG1: RegisterAddress = r(0x1a18);
pub const VIU_OSD1_TCOLOR_AG2: RegisterAddress = r(0x1a19);
pub const VIU_OSD1_TCOLOR_AG3: RegisterAddress = r(0x1a1a);
pub const VIU_OSD1_BLK0_CFG_W0: RegisterAddress = r(0x1a1b);
pub const VIU_OSD1_BLK0_CFG_W1: RegisterAddress = r(0x1a1c);
pub const VIU_OSD1_BLK0_CFG_W2: RegisterAddress = r(0x1a1d);
pub const VIU_OSD1_BLK0_CFG_W3: RegisterAddress = r(0x1a1e);
pub const VIU_OSD1_FIFO_CTRL_STAT: RegisterAddress = r(0x1a2b);
pub const VIU_OSD1_TEST_RDDATA: RegisterAddress = r(0x1a2c);
pub const VIU_OSD1_CTRL_STAT2: RegisterAddress = r(0x1a2d);

// OSD2. The same layout as OSD1, shifted by 0x20.
pub const VIU_OSD2_CTRL_STAT: RegisterAddress = r(0x1a30);
pub const VIU_OSD2_COLOR_ADDR: RegisterAddress = r(0x1a31);
pub const VIU_OSD2_COLOR: RegisterAddress = r(0x1a32);
pub const VIU_OSD2_BLK0_CFG_W4: RegisterAddress = r(0x1a33);
pub const VIU_OSD2_TCOLOR_AG0: RegisterAddress = r(0x1a37);
pub const VIU_OSD2_TCOLOR_AG3: RegisterAddress = r(0x1a3a);
pub const VIU_OSD2_BLK0_CFG_W0: RegisterAddress = r(0x1a3b);
pub const VIU_OSD2_BLK0_CFG_W1: RegisterAddress = r(0x1a3c);
pub const VIU_OSD2_BLK0_CFG_W2: RegisterAddress = r(0x1a3d);
pub const VIU_OSD2_BLK0_CFG_W3: RegisterAddress = r(0x1a3e);
pub const VIU_OSD2_FIFO_CTRL_STAT: RegisterAddress = r(0x1a4b);
pub const VIU_OSD2_CTRL_STAT2: RegisterAddress = r(0x1a4d);

/// Repurposed as the RDMA handshake register (see [`crate::rdma`]).
pub const OSD_RDMA_FLAG_REG: RegisterAddress = VIU_OSD2_TCOLOR_AG3;

// OSD1 on the second VIU. Never routed through RDMA.
pub const VIU2_OSD1_CTRL_STAT: RegisterAddress = r(0x1e10);
pub const VIU2_OSD1_BLK3_CFG_W4: RegisterAddress = r(0x1e2d);

// VPP.
pub const VPP_OSD_SC_CTRL0: RegisterAddress = r(0x1dc8);
pub const VPP_OSD_VSC_CTRL0: RegisterAddress = r(0x1dc9);
pub const VPP_OSD_HSC_CTRL0: RegisterAddress = r(0x1dcb);
pub const VPP_OSD_SCALE_COEF_IDX: RegisterAddress = r(0x1dcc);
pub const VPP_OSD_SCALE_COEF: RegisterAddress = r(0x1dcd);
pub const VPP_MISC: RegisterAddress = r(0x1d26);
pub const VPP_OSD1_BLEND_SRC_CTRL: RegisterAddress = r(0x1dfd);
pub const VPP_OSD2_BLEND_SRC_CTRL: RegisterAddress = r(0x1dfe);

// Meson AFBC decoder (GXTVBB/GXM).
pub const OSD1_AFBCD_ENABLE: RegisterAddress = r(0x31a0);
pub const OSD1_AFBCD_MODE: RegisterAddress = r(0x31a1);
pub const OSD1_AFBCD_SIZE_IN: RegisterAddress = r(0x31a2);
pub const OSD1_AFBCD_HDR_PTR: RegisterAddress = r(0x31a3);
pub const OSD1_AFBCD_FRAME_PTR: RegisterAddress = r(0x31a4);
pub const OSD1_AFBCD_CHROMA_PTR: RegisterAddress = r(0x31a5);
pub const OSD1_AFBCD_CONV_CTRL: RegisterAddress = r(0x31a6);
pub const OSD1_AFBCD_STATUS: RegisterAddress = r(0x31a8);
pub const OSD1_AFBCD_PIXEL_HSCOPE: RegisterAddress = r(0x31a9);
pub const OSD1_AFBCD_PIXEL_VSCOPE: RegisterAddress = r(0x31aa);

// VIU OSD blend (G12A and later).
pub const VIU_OSD_BLEND_CTRL: RegisterAddress = r(0x39b0);
pub const VIU_OSD_BLEND_DIN0_SCOPE_H: RegisterAddress = r(0x39b1);
pub const VIU_OSD_BLEND_DIN0_SCOPE_V: RegisterAddress = r(0x39b2);
pub const VIU_OSD_BLEND_BLEND0_SIZE: RegisterAddress = r(0x39b9);
pub const VIU_OSD_BLEND_BLEND1_SIZE: RegisterAddress = r(0x39ba);

// MALI AFBC decoder (G12A and later).
pub const VPU_MAFBC_BLOCK_ID: RegisterAddress = r(0x3a00);
pub const VPU_MAFBC_IRQ_RAW_STATUS: RegisterAddress = r(0x3a01);
pub const VPU_MAFBC_IRQ_CLEAR: RegisterAddress = r(0x3a02);
pub const VPU_MAFBC_IRQ_MASK: RegisterAddress = r(0x3a03);
pub const VPU_MAFBC_IRQ_STATUS: RegisterAddress = r(0x3a04);
pub const VPU_MAFBC_COMMAND: RegisterAddress = r(0x3a05);
pub const VPU_MAFBC_STATUS: RegisterAddress = r(0x3a06);
pub const VPU_MAFBC_SURFACE_CFG: RegisterAddress = r(0x3a07);
pub const VPU_MAFBC_AXI_CFG: RegisterAddress = r(0x3a08);
pub const VPU_MAFBC_HEADER_BUF_ADDR_LOW_S0: RegisterAddress = r(0x3a10);
pub const VPU_MAFBC_HEADER_BUF_ADDR_HIGH_S0: RegisterAddress = r(0x3a11);
pub const VPU_MAFBC_FORMAT_SPECIFIER_S0: RegisterAddress = r(0x3a12);
pub const VPU_MAFBC_BUFFER_WIDTH_S0: RegisterAddress = r(0x3a13);
pub const VPU_MAFBC_BUFFER_HEIGHT_S0: RegisterAddress = r(0x3a14);
pub const VPU_MAFBC_BOUNDING_BOX_X_START_S0: RegisterAddress = r(0x3a15);
pub const VPU_MAFBC_BOUNDING_BOX_X_END_S0: RegisterAddress = r(0x3a16);
pub const VPU_MAFBC_BOUNDING_BOX_Y_START_S0: RegisterAddress = r(0x3a17);
pub const VPU_MAFBC_BOUNDING_BOX_Y_END_S0: RegisterAddress = r(0x3a18);
pub const VPU_MAFBC_OUTPUT_BUF_ADDR_LOW_S0: RegisterAddress = r(0x3a19);
pub const VPU_MAFBC_OUTPUT_BUF_ADDR_HIGH_S0: RegisterAddress = r(0x3a1a);
pub const VPU_MAFBC_OUTPUT_BUF_STRIDE_S0: RegisterAddress = r(0x3a1b);
pub const VPU_MAFBC_PREFETCH_CFG_S0: RegisterAddress = r(0x3a1c);

// OSD3 (G12A and later).
pub const VIU_OSD3_CTRL_STAT: RegisterAddress = r(0x3d80);
pub const VIU_OSD3_BLK0_CFG_W0: RegisterAddress = r(0x3d8b);

// VPU arbiter.
pub const VPU_RDARB_MODE_L1C2: RegisterAddress = r(0x2799);
