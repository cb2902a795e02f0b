//! RDMA channel programming and the flag-register handshake.
//!
//! The OSD core owns one RDMA channel. Its table is bracketed by two writes to
//! [`OSD_RDMA_FLAG_REG`](crate::addr::OSD_RDMA_FLAG_REG):
//!
//! - the first item writes [`MARK_TBL_RST`], which sets [`FLAG_REJECT`] as soon as hardware starts
//!   replaying the table;
//! - the last item writes [`MARK_TBL_DONE`], which leaves REJECT set and adds [`FLAG_DONE`].
//!
//! REJECT therefore stays set from the moment hardware starts consuming a table until software
//! clears it when handling the RDMA-done interrupt.

use crate::addr;
use crate::RegisterAddress;

pub const FLAG_REJECT: u32 = 1 << 30;
pub const FLAG_DONE: u32 = 1 << 29;
pub const FLAGS_ALL: u32 = FLAG_REJECT | FLAG_DONE;

pub const MARK_TBL_RST: u32 = FLAG_REJECT;
pub const MARK_TBL_DONE: u32 = FLAGS_ALL;

/// Channel used by the OSD core.
pub const OSD_RDMA_CHANNEL: u8 = 3;

/// Entries that fit in the one-page DMA table.
pub const TABLE_CAPACITY: usize = 512;
pub const TABLE_SIZE_BYTES: usize = TABLE_CAPACITY * crate::RegisterWrite::SIZE_BYTES;

/// `START`/`END` address registers for an auto-triggered channel (1..=3).
pub const fn channel_addr_regs(channel: u8) -> (RegisterAddress, RegisterAddress) {
    match channel {
        1 => (addr::RDMA_AHB_START_ADDR_1, addr::RDMA_AHB_END_ADDR_1),
        2 => (addr::RDMA_AHB_START_ADDR_2, addr::RDMA_AHB_END_ADDR_2),
        3 => (addr::RDMA_AHB_START_ADDR_3, addr::RDMA_AHB_END_ADDR_3),
        _ => (addr::RDMA_AHB_START_ADDR_MAN, addr::RDMA_AHB_END_ADDR_MAN),
    }
}

/// `RDMA_ACCESS_AUTO` bit arming the vsync auto-start for `channel`.
pub const fn auto_trigger_bit(channel: u8) -> u32 {
    1 << (8 * channel as u32)
}

/// `RDMA_ACCESS_AUTO` bit selecting register writes (rather than reads) for `channel`.
pub const fn auto_write_bit(channel: u8) -> u32 {
    1 << (4 + channel as u32)
}

/// `RDMA_ACCESS_AUTO` bit selecting incremental addressing for `channel`.
pub const fn auto_incr_bit(channel: u8) -> u32 {
    1 << channel as u32
}

/// `RDMA_STATUS` done bit for `channel`; writing it to `RDMA_CTRL` acknowledges it.
pub const fn status_done_bit(channel: u8) -> u32 {
    1 << (24 + channel as u32)
}

/// `RDMA_CTRL` value used when starting the OSD channel: free-running clock off, 48-beat AHB
/// bursts in both directions.
pub const CTRL_DEFAULT: u32 = (1 << 7) | (1 << 6) | (3 << 4) | (3 << 2);

/// Value for the END register describing a table of `count` items at `table_paddr`.
///
/// END is inclusive, so an empty table is `table_paddr - 1`.
pub const fn end_addr_for(table_paddr: u32, count: usize) -> u32 {
    table_paddr
        .wrapping_add((count * crate::RegisterWrite::SIZE_BYTES) as u32)
        .wrapping_sub(1)
}

/// Number of table items covered by an END register value.
pub const fn count_for_end(table_paddr: u32, end_addr: u32) -> usize {
    let end = end_addr.wrapping_add(1);
    if end > table_paddr {
        ((end - table_paddr) as usize) / crate::RegisterWrite::SIZE_BYTES
    } else {
        0
    }
}
