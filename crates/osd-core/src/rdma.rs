//! RDMA table manager.
//!
//! The table lives in one coherent DMA page and always has the shape
//!
//! ```text
//! [0]        FLAG_REG = MARK_TBL_RST
//! [1..n-1]   payload writes, in append order
//! [n-1]      FLAG_REG = MARK_TBL_DONE
//! ```
//!
//! Hardware replays `[START, END]` at vsync. REJECT (set by the first item) tells software that
//! hardware owns the table; software only moves `END` while REJECT is clear, and only the RDMA-done
//! interrupt clears it. A table that outgrows the flush threshold, or that hardware never releases,
//! is flushed synchronously through the register port instead of being dropped.

use std::collections::BTreeSet;

use osd_bus::{DmaRegion, OsdBus};
use osd_regs::rdma::{self, FLAG_REJECT, MARK_TBL_DONE, MARK_TBL_RST, OSD_RDMA_CHANNEL};
use osd_regs::{addr, range, HwResetReason, RegisterAddress, RegisterWrite};
use serde::Serialize;

use crate::backup::BackupGroup;
use crate::config::OsdConfig;
use crate::error::RdmaError;
use crate::io::RegisterIo;
use crate::layer::RegisterView;
use crate::profile::ChipProfile;
use crate::recovery::{RecoveryDecision, RecoveryStore};

const OVERFLOW_LOG_INTERVAL: u64 = 50;
const AFBCD_ENABLE_KEEP: u32 = 0x100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerContext {
    /// Thread context. May be retried while hardware holds the table.
    Immediate,
    /// Vsync or RDMA-done interrupt, after REJECT was cleared.
    AtIrq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Queued and `END` advanced over it.
    Applied,
    /// Applied synchronously together with everything queued before it.
    Flushed,
    /// Queued, but hardware grabbed the table first. Picked up by the next generation.
    Deferred,
    /// RDMA is off or the register bypasses it; written straight to hardware.
    Direct,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RdmaStats {
    pub vsync_irq_count: u64,
    pub rdma_irq_count: u64,
    pub rdma_lost_count: u64,
    /// Entries carried into a new generation by recovery.
    pub rdma_recovery_count: u64,
    pub overflow_count: u64,
    pub stuck_count: u64,
}

/// Pause between attempts while hardware holds REJECT.
pub trait RetryBackoff: Send + Sync {
    fn backoff(&self, attempt: u32);
}

impl<F: Fn(u32) + Send + Sync> RetryBackoff for F {
    fn backoff(&self, attempt: u32) {
        self(attempt)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct YieldBackoff;

impl RetryBackoff for YieldBackoff {
    fn backoff(&self, _attempt: u32) {
        std::thread::yield_now();
    }
}

#[derive(Debug)]
struct RdmaTable {
    region: DmaRegion,
    /// CPU mirror of the DMA page; `items.len()` is the item count.
    items: Vec<RegisterWrite>,
}

impl RdmaTable {
    fn item_paddr(&self, index: usize) -> u32 {
        self.region.paddr + (index * RegisterWrite::SIZE_BYTES) as u32
    }

    fn end_for(&self, count: usize) -> u32 {
        rdma::end_addr_for(self.region.paddr, count)
    }
}

fn skeleton() -> Vec<RegisterWrite> {
    vec![
        RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, MARK_TBL_RST),
        RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, MARK_TBL_DONE),
    ]
}

pub(crate) struct RdmaEngine<B> {
    pub(crate) io: RegisterIo<B>,
    pub(crate) recovery: RecoveryStore,
    pub(crate) stats: RdmaStats,
    /// An RDMA-done interrupt arrived since the previous vsync.
    pub(crate) rdma_done: bool,
    table: RdmaTable,
    enabled: bool,
    profile: Option<Box<dyn ChipProfile>>,
    config: OsdConfig,
    dumps_left: u32,
    pending_reset: HwResetReason,
}

impl<B: OsdBus> RdmaEngine<B> {
    pub(crate) fn new(bus: B, config: OsdConfig) -> Result<Self, RdmaError> {
        let mut io = RegisterIo::new(bus);
        let region = io.alloc_coherent(rdma::TABLE_SIZE_BYTES)?;
        let mut engine = Self {
            io,
            recovery: RecoveryStore::new(),
            stats: RdmaStats::default(),
            rdma_done: false,
            table: RdmaTable {
                region,
                items: skeleton(),
            },
            enabled: false,
            profile: None,
            dumps_left: config.dump_reg_on_reset,
            pending_reset: HwResetReason::empty(),
            config,
        };
        engine.write_skeleton()?;
        Ok(engine)
    }

    pub(crate) fn config(&self) -> &OsdConfig {
        &self.config
    }

    pub(crate) fn profile(&self) -> Option<&dyn ChipProfile> {
        self.profile.as_deref()
    }

    pub(crate) fn set_profile(&mut self, profile: Box<dyn ChipProfile>) {
        self.profile = Some(profile);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn table_snapshot(&self) -> Vec<RegisterWrite> {
        self.table.items.clone()
    }

    pub(crate) fn enable(&mut self, on: bool) -> Result<(), RdmaError> {
        if on == self.enabled {
            return Ok(());
        }
        let (start_reg, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let auto = rdma::auto_trigger_bit(OSD_RDMA_CHANNEL) | rdma::auto_write_bit(OSD_RDMA_CHANNEL);
        if on {
            self.table.items = skeleton();
            self.write_skeleton()?;
            self.io.clr_mask(addr::OSD_RDMA_FLAG_REG, rdma::FLAGS_ALL);
            self.io.write(start_reg, self.table.region.paddr);
            self.io.write(end_reg, self.table.end_for(0));
            self.io.write(addr::RDMA_CTRL, rdma::CTRL_DEFAULT);
            self.io.set_mask(addr::RDMA_ACCESS_AUTO, auto);
            self.rdma_done = true;
            tracing::info!(paddr = self.table.region.paddr, "osd rdma enabled");
        } else {
            self.io.clr_mask(addr::RDMA_ACCESS_AUTO, auto);
            tracing::info!("osd rdma disabled");
        }
        self.enabled = on;
        Ok(())
    }

    pub(crate) fn reject_held(&mut self) -> bool {
        self.io.read(addr::OSD_RDMA_FLAG_REG) & FLAG_REJECT != 0
    }

    pub(crate) fn clear_reject(&mut self) {
        self.io.clr_mask(addr::OSD_RDMA_FLAG_REG, rdma::FLAGS_ALL);
    }

    /// Newest value software asked for: the current table, then the backup shadow, then hardware.
    pub(crate) fn vsync_read(&mut self, addr: RegisterAddress) -> u32 {
        if self.enabled {
            let payload = self.payload();
            if let Some(item) = payload.iter().rev().find(|item| item.addr == addr) {
                return item.value;
            }
        }
        match self.io.backup().get_backup(addr) {
            Some(value) => value,
            None => self.io.read(addr),
        }
    }

    /// One append attempt. `Ok(None)` asks an [`CallerContext::Immediate`] caller to back off and
    /// retry; interrupt-context appends never get it.
    pub(crate) fn try_append(
        &mut self,
        write: RegisterWrite,
        ctx: CallerContext,
        forced_reset: bool,
    ) -> Result<Option<AppendOutcome>, RdmaError> {
        if write.addr == addr::OSD_RDMA_FLAG_REG {
            return Err(RdmaError::ReservedRegister(write.addr));
        }
        if !self.enabled || range::VIU2_OSD1.contains(write.addr) {
            self.io.write(write.addr, write.value);
            self.record_recovery(write);
            return Ok(Some(AppendOutcome::Direct));
        }

        let count = self.table.items.len();
        if count > self.config.rdma_flush_threshold {
            self.stats.overflow_count += 1;
            if (self.stats.overflow_count - 1) % OVERFLOW_LOG_INTERVAL == 0 {
                tracing::warn!(
                    count,
                    overflows = self.stats.overflow_count,
                    "osd rdma table full, flushing synchronously"
                );
            }
            return self.flush_direct(write).map(Some);
        }
        if forced_reset {
            tracing::debug!(addr = %write.addr, "forced rdma reset pending, flushing synchronously");
            return self.flush_direct(write).map(Some);
        }

        if self.reject_held() {
            return match ctx {
                CallerContext::Immediate => Ok(None),
                CallerContext::AtIrq => Err(self.protocol_violation(write)),
            };
        }

        self.push_item(write)?;
        if !self.reject_held() {
            self.write_end();
            self.record(write);
            return Ok(Some(AppendOutcome::Applied));
        }

        // Hardware started consuming between the check and the push.
        match ctx {
            CallerContext::Immediate => {
                self.pop_item()?;
                Ok(None)
            }
            CallerContext::AtIrq => {
                self.record(write);
                Ok(Some(AppendOutcome::Deferred))
            }
        }
    }

    /// Called after the retry budget ran out with REJECT still held.
    pub(crate) fn append_exhausted(&mut self, write: RegisterWrite) -> Result<AppendOutcome, RdmaError> {
        self.stats.stuck_count += 1;
        tracing::warn!(
            addr = %write.addr,
            retries = self.config.rdma_retry_limit,
            "osd rdma table stuck with REJECT held, flushing synchronously"
        );
        self.flush_direct(write)
    }

    fn protocol_violation(&self, write: RegisterWrite) -> RdmaError {
        tracing::error!(
            addr = %write.addr,
            value = write.value,
            "interrupt-context rdma write while hardware holds the table"
        );
        if cfg!(debug_assertions) {
            panic!("interrupt-context rdma write to {} while REJECT is held", write.addr);
        }
        RdmaError::RejectHeldInIrq { addr: write.addr }
    }

    /// Applies everything queued plus `write` through the register port and empties the table.
    fn flush_direct(&mut self, write: RegisterWrite) -> Result<AppendOutcome, RdmaError> {
        let queued = self.payload().to_vec();
        for item in queued {
            self.io.write(item.addr, item.value);
        }
        self.io.write(write.addr, write.value);
        self.record_recovery(write);

        self.table.items = skeleton();
        self.write_skeleton()?;
        self.write_end();
        Ok(AppendOutcome::Flushed)
    }

    /// Starts a new generation once hardware has released the table.
    ///
    /// Previous-generation writes that hardware does not hold (recovery mismatch) or never reached
    /// (past the old `END`) are carried into the new table in their original order. Returns the
    /// number of carried entries.
    pub(crate) fn reset_table_for_new_generation(&mut self) -> Result<usize, RdmaError> {
        if self.reject_held() {
            tracing::debug!("rdma table still owned by hardware, not resetting");
            return Ok(0);
        }
        let (_, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let old_count = rdma::count_for_end(self.table.region.paddr, self.io.read(end_reg));
        self.io.write(end_reg, self.table.end_for(0));

        let old = std::mem::take(&mut self.table.items);
        let last = old.len().saturating_sub(1);
        let mut seen = BTreeSet::new();
        let mut carried = Vec::new();
        for (i, item) in old.iter().enumerate().take(last).skip(1).rev() {
            if item.addr == addr::OSD_RDMA_FLAG_REG || item.addr == addr::VPP_MISC {
                continue;
            }
            if self.is_recovery_exempt(item.addr) {
                self.recovery.mark_recovered(item.addr);
                continue;
            }
            let io = &mut self.io;
            let addr = item.addr;
            match self.recovery.get_recovery(addr, || io.read(addr)) {
                // One merged value per register; every other carried write keeps its own slot.
                RecoveryDecision::NeedsRecovery { value, .. } if seen.insert(addr) => {
                    tracing::debug!(%addr, value, "carrying recovery write forward");
                    carried.push(RegisterWrite::new(addr, value));
                }
                RecoveryDecision::NotTracked | RecoveryDecision::NoActionNeeded if i >= old_count => {
                    tracing::debug!(%addr, value = item.value, "carrying unconsumed write forward");
                    carried.push(*item);
                }
                _ => {}
            }
        }
        carried.reverse();

        self.table.items = skeleton();
        self.write_skeleton()?;
        for &item in &carried {
            self.push_item(item)?;
            self.record_recovery(item);
        }
        self.stats.rdma_recovery_count += carried.len() as u64;
        self.write_end();
        if self.config.rdma_debug {
            self.dump_table("new generation");
        }
        Ok(carried.len())
    }

    /// Re-queues the backed-up state of every group `reason` clobbers, behind a reset pulse.
    ///
    /// While hardware holds the table the reset is latched and queued by the next RDMA-done
    /// dispatch, see [`Self::take_pending_reset`]. A restore that does not fit under the flush
    /// threshold is refused whole and leaves the table untouched.
    pub(crate) fn reset_and_flush(&mut self, reason: HwResetReason) -> Result<(), RdmaError> {
        if !self.reset_allowed() {
            return Ok(());
        }
        let reason = reason & self.io.backup().enabled();
        if reason.is_empty() {
            return Ok(());
        }
        if self.reject_held() {
            self.pending_reset |= reason;
            tracing::debug!(?reason, "rdma table owned by hardware, deferring reset restore");
            return Ok(());
        }

        // OSD1 comes back through recovery, it is never pulsed.
        let pulse = reason - HwResetReason::OSD1_REGS;
        let mut writes = Vec::new();
        if !pulse.is_empty() {
            writes.push(RegisterWrite::new(addr::VIU_SW_RESET, pulse.bits()));
            writes.push(RegisterWrite::new(addr::VIU_SW_RESET, 0));
        }
        writes.extend(self.restore_list(reason));

        let count = self.table.items.len() + writes.len();
        if count >= self.config.rdma_flush_threshold {
            tracing::error!(count, ?reason, "reset restore overflows the rdma table");
            return Err(RdmaError::ResetFlushOverflow { count });
        }
        for write in writes {
            self.write_internal(write)?;
        }

        if self.dumps_left > 0 {
            self.dumps_left -= 1;
            self.dump_table("hardware reset");
        }

        if self.reject_held() {
            // Past the latched END: the next generation carries the restore.
            tracing::debug!(?reason, "hardware took the table during reset restore");
            return Ok(());
        }
        self.write_end();
        Ok(())
    }

    /// Reset reasons latched while hardware held the table.
    pub(crate) fn take_pending_reset(&mut self) -> HwResetReason {
        std::mem::take(&mut self.pending_reset)
    }

    /// Resets are inert until the chip is known, since the restore set depends on it.
    fn reset_allowed(&self) -> bool {
        if self.config.disable_rdma_reset {
            return false;
        }
        if self.profile.is_none() {
            tracing::debug!("no chip profile, ignoring hardware reset");
            return false;
        }
        true
    }

    /// Same as [`Self::reset_and_flush`] with RDMA off: pulse and restore straight to hardware.
    pub(crate) fn reset_direct(&mut self, reason: HwResetReason) {
        if !self.reset_allowed() {
            return;
        }
        let reason = (reason & self.io.backup().enabled()) - HwResetReason::OSD1_REGS;
        if reason.is_empty() {
            return;
        }
        self.io.write(addr::VIU_SW_RESET, reason.bits());
        self.io.write(addr::VIU_SW_RESET, 0);
        for item in self.restore_list(reason) {
            self.io.write(item.addr, item.value);
        }
    }

    fn restore_list(&self, reason: HwResetReason) -> Vec<RegisterWrite> {
        let mut restore = reason;
        let profile = self.profile();
        if !profile.is_some_and(|p| p.restores_afbcd_regs()) {
            restore.remove(HwResetReason::AFBCD_REGS);
        }

        let mut items = Vec::new();
        for group in BackupGroup::ALL {
            if !restore.contains(group.reset_bit()) {
                continue;
            }
            for (addr, mut value) in self.io.backup().entries(group) {
                if addr == addr::OSD1_AFBCD_ENABLE {
                    value |= AFBCD_ENABLE_KEEP;
                }
                items.push(RegisterWrite::new(addr, value));
            }
        }
        if restore.contains(HwResetReason::MALI_AFBCD_REGS)
            && profile.is_some_and(|p| p.restarts_mali_after_restore())
        {
            items.push(RegisterWrite::new(addr::VPU_MAFBC_COMMAND, 1));
        }
        items
    }

    /// Queues without moving `END`. The reset path checks REJECT and capacity up front.
    fn write_internal(&mut self, write: RegisterWrite) -> Result<(), RdmaError> {
        if write.addr == addr::VIU_SW_RESET {
            // Starting the decoder before the reset pulse makes it fault.
            let last = self.table.items.len() - 1;
            for index in 1..last {
                if self.table.items[index].addr == addr::VPU_MAFBC_COMMAND {
                    let neutral = RegisterWrite::new(addr::VIU_OSD1_TEST_RDDATA, 0);
                    self.table.items[index] = neutral;
                    self.io.write_item(self.table.item_paddr(index), neutral)?;
                }
            }
        }
        self.push_item(write)?;
        self.record(write);
        Ok(())
    }

    fn is_recovery_exempt(&self, addr: RegisterAddress) -> bool {
        self.profile()
            .is_some_and(|p| p.recovery_exempt(addr, self.config.enable_vd_zorder))
    }

    fn payload(&self) -> &[RegisterWrite] {
        match self.table.items.len() {
            len if len > 2 => &self.table.items[1..len - 1],
            _ => &[],
        }
    }

    /// Puts `write` where DONE was and moves DONE one slot on.
    fn push_item(&mut self, write: RegisterWrite) -> Result<(), RdmaError> {
        let last = self.table.items.len() - 1;
        if last + 1 >= rdma::TABLE_CAPACITY {
            return Err(RdmaError::ResetFlushOverflow {
                count: self.table.items.len(),
            });
        }
        let done = RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, MARK_TBL_DONE);
        // DONE goes out first so hardware never sees a table without a tail.
        self.io.write_item(self.table.item_paddr(last + 1), done)?;
        self.io.write_item(self.table.item_paddr(last), write)?;
        self.table.items[last] = write;
        self.table.items.push(done);
        Ok(())
    }

    fn pop_item(&mut self) -> Result<(), RdmaError> {
        self.table.items.pop();
        let last = self.table.items.len() - 1;
        let done = RegisterWrite::new(addr::OSD_RDMA_FLAG_REG, MARK_TBL_DONE);
        self.table.items[last] = done;
        self.io.write_item(self.table.item_paddr(last), done)?;
        Ok(())
    }

    fn write_skeleton(&mut self) -> Result<(), RdmaError> {
        for (index, item) in self.table.items.clone().into_iter().enumerate() {
            self.io.write_item(self.table.item_paddr(index), item)?;
        }
        Ok(())
    }

    fn write_end(&mut self) {
        let (_, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        self.io.write(end_reg, self.table.end_for(self.table.items.len()));
    }

    fn record(&mut self, write: RegisterWrite) {
        self.io.backup_mut().update_backup(write.addr, write.value);
        self.record_recovery(write);
    }

    fn record_recovery(&mut self, write: RegisterWrite) {
        // Misses are routine: most registers are untracked or already covered by backup.
        let _ = self
            .recovery
            .update_recovery(write.addr, write.value, self.io.backup().enabled());
    }

    fn dump_table(&self, why: &str) {
        tracing::debug!(why, count = self.table.items.len(), "osd rdma table dump");
        for (index, item) in self.table.items.iter().enumerate() {
            tracing::debug!(index, addr = %item.addr, "value {:#010x}", item.value);
        }
    }

    pub(crate) fn into_bus(mut self) -> B {
        if let Err(err) = self.enable(false) {
            tracing::warn!(%err, "failed to stop osd rdma on detach");
        }
        let region = self.table.region;
        self.io.free_coherent(region);
        self.io.into_bus()
    }
}

impl<B: OsdBus> RegisterView for RdmaEngine<B> {
    fn view(&mut self, addr: RegisterAddress) -> u32 {
        self.vsync_read(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osd_sim::SimulatedVpu;
    use pretty_assertions::assert_eq;

    use crate::profile::{profile_for, CpuId};

    fn engine(vpu: &SimulatedVpu) -> RdmaEngine<SimulatedVpu> {
        let mut engine = RdmaEngine::new(vpu.clone(), OsdConfig::default()).unwrap();
        engine.enable(true).unwrap();
        engine
    }

    fn w(addr: RegisterAddress, value: u32) -> RegisterWrite {
        RegisterWrite::new(addr, value)
    }

    fn append(engine: &mut RdmaEngine<SimulatedVpu>, addr: RegisterAddress, value: u32) -> AppendOutcome {
        engine
            .try_append(w(addr, value), CallerContext::Immediate, false)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn append_keeps_sentinels_and_advances_end() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        assert_eq!(append(&mut engine, addr::VIU_OSD1_BLK0_CFG_W0, 0x10), AppendOutcome::Applied);

        let table = engine.table_snapshot();
        assert_eq!(
            table,
            vec![
                w(addr::OSD_RDMA_FLAG_REG, MARK_TBL_RST),
                w(addr::VIU_OSD1_BLK0_CFG_W0, 0x10),
                w(addr::OSD_RDMA_FLAG_REG, MARK_TBL_DONE),
            ]
        );
        let (start_reg, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let start = vpu.reg(start_reg);
        assert_eq!(rdma::count_for_end(start, vpu.reg(end_reg)), 3);
        for (i, item) in table.iter().enumerate() {
            assert_eq!(vpu.dma_item(start + 8 * i as u32), Some(*item));
        }
    }

    #[test]
    fn flag_register_is_reserved() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        let err = engine
            .try_append(w(addr::OSD_RDMA_FLAG_REG, 1), CallerContext::Immediate, false)
            .unwrap_err();
        assert_eq!(err, RdmaError::ReservedRegister(addr::OSD_RDMA_FLAG_REG));
    }

    #[test]
    fn disabled_engine_writes_directly() {
        let vpu = SimulatedVpu::new();
        let mut engine = RdmaEngine::new(vpu.clone(), OsdConfig::default()).unwrap();
        let outcome = engine
            .try_append(w(addr::VPP_MISC, 3), CallerContext::Immediate, false)
            .unwrap();
        assert_eq!(outcome, Some(AppendOutcome::Direct));
        assert_eq!(vpu.reg(addr::VPP_MISC), 3);
    }

    #[test]
    fn second_viu_bypasses_table() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        assert_eq!(append(&mut engine, addr::VIU2_OSD1_CTRL_STAT, 9), AppendOutcome::Direct);
        assert_eq!(vpu.reg(addr::VIU2_OSD1_CTRL_STAT), 9);
        assert_eq!(engine.table_snapshot().len(), 2);
    }

    #[test]
    fn held_reject_asks_immediate_caller_to_retry() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        vpu.set_reject_stuck(true);
        let outcome = engine
            .try_append(w(addr::VPP_MISC, 1), CallerContext::Immediate, false)
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(engine.table_snapshot().len(), 2);

        assert_eq!(engine.append_exhausted(w(addr::VPP_MISC, 1)).unwrap(), AppendOutcome::Flushed);
        assert_eq!(engine.stats.stuck_count, 1);
        assert_eq!(vpu.reg(addr::VPP_MISC), 1);
    }

    #[test]
    fn vsync_read_prefers_newest_table_entry() {
        let vpu = SimulatedVpu::new();
        vpu.poke(addr::VPP_MISC, 0xaa);
        let mut engine = engine(&vpu);
        assert_eq!(engine.vsync_read(addr::VPP_MISC), 0xaa);
        append(&mut engine, addr::VPP_MISC, 1);
        append(&mut engine, addr::VPP_MISC, 2);
        assert_eq!(engine.vsync_read(addr::VPP_MISC), 2);
    }

    #[test]
    fn unconsumed_untracked_writes_are_carried() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        let untracked = RegisterAddress::new(0x2000);
        append(&mut engine, untracked, 5);

        // Hardware never ran the table: END goes back to empty as if it had latched before the append.
        let (_, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let paddr = vpu.reg(rdma::channel_addr_regs(OSD_RDMA_CHANNEL).0);
        vpu.poke(end_reg, rdma::end_addr_for(paddr, 1));

        assert_eq!(engine.reset_table_for_new_generation().unwrap(), 1);
        assert_eq!(engine.table_snapshot()[1], w(untracked, 5));
        assert_eq!(engine.stats.rdma_recovery_count, 1);
    }

    #[test]
    fn unconsumed_set_clear_pair_is_carried_whole() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        let untracked = RegisterAddress::new(0x2000);
        append(&mut engine, untracked, 1);
        append(&mut engine, untracked, 0);

        let (start_reg, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        vpu.poke(end_reg, rdma::end_addr_for(vpu.reg(start_reg), 1));

        assert_eq!(engine.reset_table_for_new_generation().unwrap(), 2);
        assert_eq!(
            engine.table_snapshot(),
            vec![
                w(addr::OSD_RDMA_FLAG_REG, MARK_TBL_RST),
                w(untracked, 1),
                w(untracked, 0),
                w(addr::OSD_RDMA_FLAG_REG, MARK_TBL_DONE),
            ]
        );
    }

    #[test]
    fn recovery_carries_one_merged_value_per_register() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        let profile = profile_for(CpuId::Gxl);
        engine.recovery.recovery_init(profile.recovery_tables());
        engine.set_profile(profile);
        append(&mut engine, addr::VPP_OSD_SC_CTRL0, 1);
        append(&mut engine, addr::VPP_OSD_SC_CTRL0, 2);

        let (start_reg, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        vpu.poke(end_reg, rdma::end_addr_for(vpu.reg(start_reg), 1));

        assert_eq!(engine.reset_table_for_new_generation().unwrap(), 1);
        let table = engine.table_snapshot();
        assert_eq!(table.len(), 3);
        assert_eq!(table[1].addr, addr::VPP_OSD_SC_CTRL0);
    }

    #[test]
    fn interrupt_append_racing_hardware_is_deferred() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        let untracked = RegisterAddress::new(0x2000);
        vpu.reject_after_next_dma_write();

        let outcome = engine
            .try_append(w(untracked, 7), CallerContext::AtIrq, false)
            .unwrap();
        assert_eq!(outcome, Some(AppendOutcome::Deferred));
        assert_eq!(engine.table_snapshot()[1], w(untracked, 7));
        let (start_reg, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let start = vpu.reg(start_reg);
        assert_eq!(rdma::count_for_end(start, vpu.reg(end_reg)), 0);

        // Hardware released the table without reaching the write: the next generation has it.
        engine.clear_reject();
        assert_eq!(engine.reset_table_for_new_generation().unwrap(), 1);
        assert_eq!(engine.table_snapshot()[1], w(untracked, 7));
        assert_eq!(rdma::count_for_end(start, vpu.reg(end_reg)), 3);
    }

    #[test]
    fn reset_while_hardware_owns_table_is_latched() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        engine.set_profile(profile_for(CpuId::Gxtvbb));
        engine.io.backup_init(HwResetReason::AFBCD_REGS);
        append(&mut engine, RegisterAddress::new(0x2000), 1);
        let (_, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let end_before = vpu.reg(end_reg);
        let table_before = engine.table_snapshot();

        vpu.set_reject_stuck(true);
        engine.reset_and_flush(HwResetReason::AFBCD_REGS).unwrap();
        assert_eq!(engine.table_snapshot(), table_before);
        assert_eq!(vpu.reg(end_reg), end_before);

        vpu.set_reject_stuck(false);
        assert_eq!(engine.take_pending_reset(), HwResetReason::AFBCD_REGS);
        assert_eq!(engine.take_pending_reset(), HwResetReason::empty());
    }

    #[test]
    fn oversized_reset_restore_leaves_table_untouched() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        engine.set_profile(profile_for(CpuId::Gxtvbb));
        engine.io.backup_init(HwResetReason::AFBCD_REGS);
        for i in 0..497u16 {
            append(&mut engine, RegisterAddress::new(0x2000 + i), u32::from(i));
        }
        let (_, end_reg) = rdma::channel_addr_regs(OSD_RDMA_CHANNEL);
        let end_before = vpu.reg(end_reg);
        let table_before = engine.table_snapshot();
        assert_eq!(table_before.len(), 499);

        let err = engine.reset_and_flush(HwResetReason::AFBCD_REGS).unwrap_err();
        assert!(matches!(err, RdmaError::ResetFlushOverflow { count } if count >= 500));
        assert_eq!(engine.table_snapshot(), table_before);
        assert_eq!(vpu.reg(end_reg), end_before);
    }

    #[test]
    fn reset_is_inert_before_chip_is_known() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        engine.io.backup_init(HwResetReason::AFBCD_REGS);
        vpu.clear_write_log();

        engine.reset_and_flush(HwResetReason::AFBCD_REGS).unwrap();
        assert_eq!(engine.table_snapshot().len(), 2);
        engine.reset_direct(HwResetReason::AFBCD_REGS);
        assert!(vpu.write_log().iter().all(|w| w.addr != addr::VIU_SW_RESET));
    }

    #[test]
    fn consumed_untracked_writes_are_dropped() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        append(&mut engine, RegisterAddress::new(0x2000), 5);
        vpu.vsync();
        engine.clear_reject();
        assert_eq!(engine.reset_table_for_new_generation().unwrap(), 0);
        assert_eq!(engine.table_snapshot().len(), 2);
    }

    #[test]
    fn reset_pulse_neutralizes_queued_decoder_start() {
        let vpu = SimulatedVpu::new();
        let mut engine = engine(&vpu);
        engine.set_profile(profile_for(CpuId::G12a));
        engine.io.backup_init(HwResetReason::MALI_AFBCD_REGS);
        append(&mut engine, addr::VPU_MAFBC_COMMAND, 1);

        engine.reset_and_flush(HwResetReason::MALI_AFBCD_REGS).unwrap();
        let table = engine.table_snapshot();
        assert_eq!(table[1], w(addr::VIU_OSD1_TEST_RDDATA, 0));
        assert_eq!(table[2], w(addr::VIU_SW_RESET, HwResetReason::MALI_AFBCD_REGS.bits()));
        assert_eq!(table[3], w(addr::VIU_SW_RESET, 0));
        assert_eq!(table[table.len() - 2], w(addr::VPU_MAFBC_COMMAND, 1));
    }

    #[test]
    fn reset_is_inert_when_disabled_by_config() {
        let vpu = SimulatedVpu::new();
        let config = OsdConfig {
            disable_rdma_reset: true,
            ..OsdConfig::default()
        };
        let mut engine = RdmaEngine::new(vpu.clone(), config).unwrap();
        engine.enable(true).unwrap();
        engine.io.backup_init(HwResetReason::AFBCD_REGS);
        engine.reset_and_flush(HwResetReason::AFBCD_REGS).unwrap();
        assert_eq!(engine.table_snapshot().len(), 2);
    }

    #[test]
    fn detach_stops_channel_and_frees_table() {
        let vpu = SimulatedVpu::new();
        let engine = engine(&vpu);
        assert!(vpu.rdma_armed());
        assert_eq!(vpu.live_allocations(), 1);
        let _bus = engine.into_bus();
        assert!(!vpu.rdma_armed());
        assert_eq!(vpu.live_allocations(), 0);
    }
}
