//! Software model of the parts of the Meson VPU the OSD core talks to.
//!
//! The model is deliberately small:
//! - a sparse 32-bit register file (unwritten registers read as zero),
//! - one block of DMA-coherent RAM with a bump allocator,
//! - the auto-triggered RDMA channel used by the OSD core, which replays the table between its
//!   `START` and `END` registers when [`SimulatedVpu::vsync`] is called,
//! - `VIU_SW_RESET` side effects (register blocks named by the pulse are cleared),
//! - a write log, so tests can assert the order in which writes reached the registers.
//!
//! [`SimulatedVpu`] is a cheap cloneable handle. The driver under test owns one clone as its bus,
//! the test keeps another to play the hardware side.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use osd_bus::{insert_bits, DmaError, DmaMemory, DmaRegion, RegisterBus};
use osd_regs::{addr, rdma, HwResetReason, RegisterAddress, RegisterWrite};

/// Bus address of the first byte of simulated coherent RAM.
pub const DMA_BASE: u32 = 0x0100_0000;
pub const DMA_SIZE_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteSource {
    Cpu,
    Rdma,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoggedWrite {
    pub source: WriteSource,
    pub addr: RegisterAddress,
    pub value: u32,
}

/// What one call to [`SimulatedVpu::vsync`] or [`SimulatedVpu::resume`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Table items written to registers during this call.
    pub replayed: usize,
    /// The channel reached `END` and raised its done status.
    pub completed: bool,
}

#[derive(Debug)]
struct ActiveReplay {
    next: u32,
    end: u32,
}

#[derive(Debug)]
struct VpuState {
    regs: BTreeMap<RegisterAddress, u32>,
    dma: Vec<u8>,
    next_alloc: usize,
    live_allocs: usize,
    fail_next_alloc: bool,
    log: Vec<LoggedWrite>,
    replay: Option<ActiveReplay>,
    pause_budget: Option<usize>,
    reject_stuck: bool,
    reject_on_next_dma_write: bool,
    vsync_count: u64,
}

impl VpuState {
    fn new() -> Self {
        Self {
            regs: BTreeMap::new(),
            dma: vec![0; DMA_SIZE_BYTES],
            next_alloc: 0,
            live_allocs: 0,
            fail_next_alloc: false,
            log: Vec::new(),
            replay: None,
            pause_budget: None,
            reject_stuck: false,
            reject_on_next_dma_write: false,
            vsync_count: 0,
        }
    }

    fn peek(&self, addr: RegisterAddress) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn load(&self, addr: RegisterAddress) -> u32 {
        let value = self.peek(addr);
        if addr == addr::OSD_RDMA_FLAG_REG && self.reject_stuck {
            value | rdma::FLAG_REJECT
        } else {
            value
        }
    }

    fn store(&mut self, source: WriteSource, addr: RegisterAddress, value: u32) {
        self.log.push(LoggedWrite {
            source,
            addr,
            value,
        });

        if addr == addr::VIU_SW_RESET {
            self.clobber(HwResetReason::from_bits_truncate(value));
            self.regs.insert(addr, value);
        } else if addr == addr::RDMA_CTRL {
            // Status bits written back to RDMA_CTRL acknowledge them.
            let ack = value & 0xff00_0000;
            if ack != 0 {
                let status = self.peek(addr::RDMA_STATUS) & !ack;
                self.regs.insert(addr::RDMA_STATUS, status);
            }
            self.regs.insert(addr, value & !0xff00_0000);
        } else {
            self.regs.insert(addr, value);
        }
    }

    fn clobber(&mut self, reason: HwResetReason) {
        for range in reason.clobbered_ranges() {
            self.regs.retain(|addr, _| !range.contains(*addr));
        }
    }

    fn dma_offset(&self, paddr: u32, len: usize) -> Result<usize, DmaError> {
        let region = DmaRegion {
            paddr: DMA_BASE,
            size_bytes: self.dma.len(),
        };
        if !region.contains(paddr, len) {
            return Err(DmaError::OutOfRange { paddr, len });
        }
        Ok((paddr - DMA_BASE) as usize)
    }

    fn read_item(&self, paddr: u32) -> Option<RegisterWrite> {
        let offset = self.dma_offset(paddr, RegisterWrite::SIZE_BYTES).ok()?;
        let mut bytes = [0u8; RegisterWrite::SIZE_BYTES];
        bytes.copy_from_slice(&self.dma[offset..offset + RegisterWrite::SIZE_BYTES]);
        Some(RegisterWrite::decode_le(&bytes))
    }

    fn channel_armed(&self) -> bool {
        self.peek(addr::RDMA_ACCESS_AUTO) & rdma::auto_trigger_bit(rdma::OSD_RDMA_CHANNEL) != 0
    }

    /// An empty table (`END` one byte before `START`) completes without writing anything.
    fn start_replay(&mut self) {
        let (start_reg, end_reg) = rdma::channel_addr_regs(rdma::OSD_RDMA_CHANNEL);
        let start = self.peek(start_reg);
        let end = self.peek(end_reg);
        self.replay = Some(ActiveReplay { next: start, end });
    }

    fn run_replay(&mut self) -> ReplayReport {
        let mut report = ReplayReport::default();
        while let Some(active) = self.replay.as_ref() {
            let item_last = active.next.wrapping_add(RegisterWrite::SIZE_BYTES as u32 - 1);
            if item_last > active.end || item_last < active.next {
                break;
            }
            if let Some(budget) = self.pause_budget.as_mut() {
                if *budget == 0 {
                    return report;
                }
                *budget -= 1;
            }
            let paddr = active.next;
            let Some(item) = self.read_item(paddr) else {
                tracing::warn!(paddr, "RDMA table item outside simulated RAM");
                break;
            };
            tracing::trace!(addr = %item.addr, value = item.value, "rdma replay");
            self.store(WriteSource::Rdma, item.addr, item.value);
            report.replayed += 1;
            if let Some(active) = self.replay.as_mut() {
                active.next = paddr + RegisterWrite::SIZE_BYTES as u32;
            }
        }

        self.replay = None;
        let status =
            self.peek(addr::RDMA_STATUS) | rdma::status_done_bit(rdma::OSD_RDMA_CHANNEL);
        self.regs.insert(addr::RDMA_STATUS, status);
        report.completed = true;
        report
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedVpu {
    state: Arc<Mutex<VpuState>>,
}

impl Default for SimulatedVpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVpu {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VpuState::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals a vertical sync.
    ///
    /// If the OSD channel is armed, hardware replays its table and raises the done status. A
    /// replay paused by [`SimulatedVpu::pause_after`] is not restarted by later vsyncs.
    pub fn vsync(&self) -> ReplayReport {
        let mut state = self.lock();
        state.vsync_count += 1;
        if state.replay.is_some() || !state.channel_armed() {
            return ReplayReport::default();
        }
        state.start_replay();
        state.run_replay()
    }

    /// Makes the next replay stop after `items` table items, leaving hardware mid-consumption.
    pub fn pause_after(&self, items: usize) {
        self.lock().pause_budget = Some(items);
    }

    /// Lets a paused replay run to `END`.
    pub fn resume(&self) -> ReplayReport {
        let mut state = self.lock();
        state.pause_budget = None;
        if state.replay.is_none() {
            return ReplayReport::default();
        }
        state.run_replay()
    }

    pub fn replay_in_progress(&self) -> bool {
        self.lock().replay.is_some()
    }

    /// Keeps the REJECT handshake bit reading as set, as if hardware never finished.
    pub fn set_reject_stuck(&self, stuck: bool) {
        self.lock().reject_stuck = stuck;
    }

    /// Sets REJECT right after the next DMA write, as if the channel latched the table while
    /// software was still filling it.
    pub fn reject_after_next_dma_write(&self) {
        self.lock().reject_on_next_dma_write = true;
    }

    /// Clears the REJECT bit from the hardware side.
    pub fn release_reject(&self) {
        let mut state = self.lock();
        let flag = state.peek(addr::OSD_RDMA_FLAG_REG) & !rdma::FLAG_REJECT;
        state.regs.insert(addr::OSD_RDMA_FLAG_REG, flag);
    }

    /// A VIU self-reset that happens without any software write.
    pub fn simulate_viu_reset(&self, reason: HwResetReason) {
        self.lock().clobber(reason);
    }

    /// Register value as hardware holds it, without read side effects.
    pub fn reg(&self, addr: RegisterAddress) -> u32 {
        self.lock().peek(addr)
    }

    /// Sets a register from the hardware side. Not logged.
    pub fn poke(&self, addr: RegisterAddress, value: u32) {
        self.lock().regs.insert(addr, value);
    }

    pub fn write_log(&self) -> Vec<LoggedWrite> {
        self.lock().log.clone()
    }

    pub fn clear_write_log(&self) {
        self.lock().log.clear();
    }

    /// Registers written by the RDMA channel, in replay order, excluding the flag register.
    pub fn rdma_payload_writes(&self) -> Vec<(RegisterAddress, u32)> {
        self.lock()
            .log
            .iter()
            .filter(|w| w.source == WriteSource::Rdma && w.addr != addr::OSD_RDMA_FLAG_REG)
            .map(|w| (w.addr, w.value))
            .collect()
    }

    pub fn vsync_count(&self) -> u64 {
        self.lock().vsync_count
    }

    pub fn rdma_armed(&self) -> bool {
        self.lock().channel_armed()
    }

    pub fn live_allocations(&self) -> usize {
        self.lock().live_allocs
    }

    pub fn fail_next_alloc(&self) {
        self.lock().fail_next_alloc = true;
    }

    pub fn dma_item(&self, paddr: u32) -> Option<RegisterWrite> {
        self.lock().read_item(paddr)
    }
}

impl RegisterBus for SimulatedVpu {
    fn read_reg(&mut self, addr: RegisterAddress) -> u32 {
        self.lock().load(addr)
    }

    fn write_reg(&mut self, addr: RegisterAddress, value: u32) {
        self.lock().store(WriteSource::Cpu, addr, value);
    }

    fn set_bits(&mut self, addr: RegisterAddress, value: u32, start: u32, len: u32) {
        let mut state = self.lock();
        let old = state.load(addr);
        state.store(WriteSource::Cpu, addr, insert_bits(old, value, start, len));
    }
}

impl DmaMemory for SimulatedVpu {
    fn alloc_coherent(&mut self, size_bytes: usize) -> Result<DmaRegion, DmaError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_alloc) {
            return Err(DmaError::AllocationFailed { size_bytes });
        }
        let start = state.next_alloc.next_multiple_of(RegisterWrite::SIZE_BYTES);
        let end = start
            .checked_add(size_bytes)
            .filter(|end| *end <= state.dma.len())
            .ok_or(DmaError::AllocationFailed { size_bytes })?;
        state.next_alloc = end;
        state.live_allocs += 1;
        Ok(DmaRegion {
            paddr: DMA_BASE + start as u32,
            size_bytes,
        })
    }

    fn free_coherent(&mut self, _region: DmaRegion) {
        let mut state = self.lock();
        state.live_allocs = state.live_allocs.saturating_sub(1);
    }

    fn write_physical(&mut self, paddr: u32, buf: &[u8]) -> Result<(), DmaError> {
        let mut state = self.lock();
        let offset = state.dma_offset(paddr, buf.len())?;
        state.dma[offset..offset + buf.len()].copy_from_slice(buf);
        if std::mem::take(&mut state.reject_on_next_dma_write) {
            let flag = state.peek(addr::OSD_RDMA_FLAG_REG) | rdma::FLAG_REJECT;
            state.regs.insert(addr::OSD_RDMA_FLAG_REG, flag);
        }
        Ok(())
    }

    fn read_physical(&mut self, paddr: u32, buf: &mut [u8]) -> Result<(), DmaError> {
        let state = self.lock();
        let offset = state.dma_offset(paddr, buf.len())?;
        buf.copy_from_slice(&state.dma[offset..offset + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_table(vpu: &mut SimulatedVpu, region: DmaRegion, items: &[RegisterWrite]) {
        for (i, item) in items.iter().enumerate() {
            vpu.write_physical(region.paddr + (i * 8) as u32, &item.encode_le())
                .unwrap();
        }
        let (start, end) = rdma::channel_addr_regs(rdma::OSD_RDMA_CHANNEL);
        vpu.write_reg(start, region.paddr);
        vpu.write_reg(end, rdma::end_addr_for(region.paddr, items.len()));
        vpu.set_mask(
            addr::RDMA_ACCESS_AUTO,
            rdma::auto_trigger_bit(rdma::OSD_RDMA_CHANNEL),
        );
    }

    #[test]
    fn allocations_are_aligned_and_bounded() {
        let mut vpu = SimulatedVpu::new();
        let a = vpu.alloc_coherent(3).unwrap();
        let b = vpu.alloc_coherent(8).unwrap();
        assert_eq!(a.paddr, DMA_BASE);
        assert_eq!(b.paddr, DMA_BASE + 8);
        assert_eq!(vpu.live_allocations(), 2);
        assert!(vpu.alloc_coherent(DMA_SIZE_BYTES).is_err());

        vpu.fail_next_alloc();
        assert_eq!(
            vpu.alloc_coherent(8),
            Err(DmaError::AllocationFailed { size_bytes: 8 })
        );
        assert!(vpu.alloc_coherent(8).is_ok());
    }

    #[test]
    fn physical_access_outside_ram_is_rejected() {
        let mut vpu = SimulatedVpu::new();
        let mut buf = [0u8; 8];
        assert!(vpu.read_physical(DMA_BASE - 8, &mut buf).is_err());
        assert!(vpu
            .write_physical(DMA_BASE + DMA_SIZE_BYTES as u32 - 4, &buf)
            .is_err());
    }

    #[test]
    fn vsync_replays_armed_table_and_raises_done() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(rdma::TABLE_SIZE_BYTES).unwrap();
        write_table(
            &mut vpu,
            region,
            &[
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_RST),
                RegisterWrite::new(addr::VIU_OSD1_CTRL_STAT, 0x20),
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_DONE),
            ],
        );

        let report = vpu.vsync();
        assert_eq!(
            report,
            ReplayReport {
                replayed: 3,
                completed: true
            }
        );
        assert_eq!(vpu.reg(addr::VIU_OSD1_CTRL_STAT), 0x20);
        assert_ne!(vpu.reg(addr::OSD_RDMA_FLAG_REG) & rdma::FLAG_REJECT, 0);
        let done = rdma::status_done_bit(rdma::OSD_RDMA_CHANNEL);
        assert_ne!(vpu.reg(addr::RDMA_STATUS) & done, 0);

        vpu.write_reg(addr::RDMA_CTRL, done);
        assert_eq!(vpu.reg(addr::RDMA_STATUS) & done, 0);
    }

    #[test]
    fn empty_table_completes_without_writes() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(64).unwrap();
        write_table(&mut vpu, region, &[]);
        vpu.clear_write_log();

        assert_eq!(
            vpu.vsync(),
            ReplayReport {
                replayed: 0,
                completed: true
            }
        );
        assert!(vpu.write_log().is_empty());
        let done = rdma::status_done_bit(rdma::OSD_RDMA_CHANNEL);
        assert_ne!(vpu.reg(addr::RDMA_STATUS) & done, 0);
    }

    #[test]
    fn unarmed_channel_ignores_vsync() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(64).unwrap();
        write_table(
            &mut vpu,
            region,
            &[RegisterWrite::new(addr::VIU_OSD1_CTRL_STAT, 1)],
        );
        vpu.write_reg(addr::RDMA_ACCESS_AUTO, 0);
        assert_eq!(vpu.vsync(), ReplayReport::default());
        assert_eq!(vpu.reg(addr::VIU_OSD1_CTRL_STAT), 0);
        assert_eq!(vpu.vsync_count(), 1);
    }

    #[test]
    fn paused_replay_holds_reject_until_resumed() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(64).unwrap();
        write_table(
            &mut vpu,
            region,
            &[
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_RST),
                RegisterWrite::new(addr::VIU_OSD1_COLOR, 7),
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_DONE),
            ],
        );
        vpu.pause_after(1);
        let report = vpu.vsync();
        assert_eq!(report.replayed, 1);
        assert!(!report.completed);
        assert!(vpu.replay_in_progress());
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), rdma::MARK_TBL_RST);

        let report = vpu.resume();
        assert_eq!(report.replayed, 2);
        assert!(report.completed);
        assert_eq!(vpu.reg(addr::VIU_OSD1_COLOR), 7);
    }

    #[test]
    fn sw_reset_pulse_clears_named_blocks() {
        let mut vpu = SimulatedVpu::new();
        vpu.write_reg(addr::VIU_OSD1_CTRL_STAT, 1);
        vpu.write_reg(addr::OSD1_AFBCD_ENABLE, 0x101);
        vpu.write_reg(addr::VIU_SW_RESET, HwResetReason::AFBCD_REGS.bits());
        assert_eq!(vpu.reg(addr::OSD1_AFBCD_ENABLE), 0);
        assert_eq!(vpu.reg(addr::VIU_OSD1_CTRL_STAT), 1);

        vpu.simulate_viu_reset(HwResetReason::OSD1_REGS);
        assert_eq!(vpu.reg(addr::VIU_OSD1_CTRL_STAT), 0);
    }

    #[test]
    fn stuck_reject_overrides_flag_reads() {
        let mut vpu = SimulatedVpu::new();
        vpu.set_reject_stuck(true);
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), rdma::FLAG_REJECT);
        vpu.set_reject_stuck(false);
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), 0);
    }

    #[test]
    fn dma_write_can_raise_reject_once() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(16).unwrap();
        vpu.reject_after_next_dma_write();
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), 0);

        let item = RegisterWrite::new(addr::VPP_MISC, 1);
        vpu.write_physical(region.paddr, &item.encode_le()).unwrap();
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), rdma::FLAG_REJECT);

        vpu.release_reject();
        vpu.write_physical(region.paddr + 8, &item.encode_le()).unwrap();
        assert_eq!(vpu.read_reg(addr::OSD_RDMA_FLAG_REG), 0);
    }

    #[test]
    fn write_log_separates_cpu_and_rdma_writes() {
        let mut vpu = SimulatedVpu::new();
        let region = vpu.alloc_coherent(64).unwrap();
        write_table(
            &mut vpu,
            region,
            &[
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_RST),
                RegisterWrite::new(addr::VIU_OSD1_COLOR, 1),
                RegisterWrite::new(addr::VPP_MISC, 2),
                RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, rdma::MARK_TBL_DONE),
            ],
        );
        vpu.clear_write_log();
        vpu.write_reg(addr::VIU_OSD1_CTRL_STAT, 3);
        vpu.vsync();

        assert_eq!(
            vpu.rdma_payload_writes(),
            vec![(addr::VIU_OSD1_COLOR, 1), (addr::VPP_MISC, 2)]
        );
        assert_eq!(
            vpu.write_log()[0],
            LoggedWrite {
                source: WriteSource::Cpu,
                addr: addr::VIU_OSD1_CTRL_STAT,
                value: 3
            }
        );
    }
}
