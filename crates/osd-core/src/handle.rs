//! The [`OsdCore`] handle: everything the display glue calls, from thread and interrupt context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use osd_bus::{insert_bits, OsdBus};
use osd_regs::rdma::{self, OSD_RDMA_CHANNEL};
use osd_regs::{addr, HwResetReason, RegisterAddress, RegisterWrite};

use crate::config::OsdConfig;
use crate::error::{OsdError, RdmaError, Result};
use crate::layer::{
    plan_update, ColorMode, FifoConfig, FreeScale, Geometry, LayerState, OsdOutput, PlanContext,
    Reverse, Rotation, ScaleEnable, StereoPhase,
};
use crate::profile::{profile_for, AfbcType, CpuId, FeatureState};
use crate::rdma::{
    AppendOutcome, CallerContext, RdmaEngine, RdmaStats, RetryBackoff, YieldBackoff,
};
use crate::recovery::{RecoveryDecision, RecoveryState};
use crate::update_list::{PendingUpdateSet, UpdateKind, UpdateList};
use crate::vsync::{VsyncOutcome, VsyncWait};

/// Decoder error bits of `VPU_MAFBC_IRQ_RAW_STATUS`.
const MALI_DECODE_ERROR_MASK: u32 = 0x3c;
const MALI_IRQ_CLEAR_ALL: u32 = 0x3f;

/// Outputs addressable before the chip generation is known.
const DEFAULT_OSD_COUNT: usize = 2;

struct OsdCoreState<B> {
    engine: RdmaEngine<B>,
    layers: Vec<LayerState>,
    updates: UpdateList,
    features: FeatureState,
}

impl<B: OsdBus> OsdCoreState<B> {
    fn osd_count(&self) -> usize {
        self.engine
            .profile()
            .map_or(DEFAULT_OSD_COUNT, |p| p.osd_count())
    }

    fn check_output(&self, output: OsdOutput) -> Result<()> {
        if output.index() < self.osd_count() {
            Ok(())
        } else {
            Err(OsdError::UnsupportedOutput(output))
        }
    }

    fn plan(&mut self, kind: UpdateKind, output: OsdOutput) -> Vec<RegisterWrite> {
        let ctx = match self.engine.profile() {
            Some(p) => PlanContext {
                afbc_type: p.afbc_type(),
                osd_blend: p.cpu_id().is_g12a_family(),
            },
            None => PlanContext {
                afbc_type: AfbcType::None,
                osd_blend: false,
            },
        };
        let layers = self.layers.clone();
        plan_update(kind, output, &layers, ctx, &mut self.engine)
    }

    /// `Ok(None)` as soon as one write has to wait for hardware; writes before it stay queued.
    fn append_all(
        &mut self,
        writes: &[RegisterWrite],
        forced: bool,
    ) -> Result<Option<AppendOutcome>, RdmaError> {
        let mut outcome = AppendOutcome::Applied;
        for &write in writes {
            match self.engine.try_append(write, CallerContext::Immediate, forced)? {
                Some(applied) => outcome = applied,
                None => return Ok(None),
            }
        }
        Ok(Some(outcome))
    }

    fn write_at_irq(&mut self, writes: Vec<RegisterWrite>, forced: bool) -> Result<(), RdmaError> {
        for write in writes {
            self.engine.try_append(write, CallerContext::AtIrq, forced)?;
        }
        Ok(())
    }

    fn drain(&mut self, forced: bool) -> Result<(), RdmaError> {
        for output in OsdOutput::ALL.into_iter().take(self.osd_count()) {
            let pending = self.updates.take(output);
            for kind in pending.kinds() {
                let writes = self.plan(kind, output);
                self.write_at_irq(writes, forced)?;
            }
        }
        Ok(())
    }

    fn stereo_toggle(&mut self, forced: bool) -> Result<(), RdmaError> {
        for output in OsdOutput::ALL.into_iter().take(self.osd_count()) {
            let layer = &mut self.layers[output.index()];
            let Some(phase) = layer.stereo else {
                continue;
            };
            layer.stereo = Some(phase.flipped());
            let writes = self.plan(UpdateKind::Geometry, output);
            self.write_at_irq(writes, forced)?;
        }
        Ok(())
    }

    fn hw_reset(&mut self, forced: bool) -> Result<(), RdmaError> {
        let Some(afbc_type) = self.engine.profile().map(|p| p.afbc_type()) else {
            return Ok(());
        };
        let config = self.engine.config();
        let mut features = FeatureState {
            afbc_enabled: self.layers[OsdOutput::Osd1.index()].afbc_enabled,
            afbc_force_reset: config.afbc_force_reset,
            afbc_status_err_reset: config.afbc_status_err_reset,
            afbc_decode_error: false,
            ..self.features
        };
        if afbc_type == AfbcType::Mali && features.afbc_enabled {
            let raw = self.engine.io.read(addr::VPU_MAFBC_IRQ_RAW_STATUS);
            features.afbc_decode_error = raw & MALI_DECODE_ERROR_MASK != 0;
            let clear = RegisterWrite::new(addr::VPU_MAFBC_IRQ_CLEAR, MALI_IRQ_CLEAR_ALL);
            self.engine.try_append(clear, CallerContext::AtIrq, forced)?;
        }

        let detected = self
            .engine
            .profile()
            .map_or(HwResetReason::empty(), |p| p.reset_reason_for(&features));
        let reason = detected | self.engine.take_pending_reset();
        self.features.hdr_was_active = features.hdr_active;
        if reason.is_empty() {
            return Ok(());
        }
        tracing::debug!(?reason, "osd hardware reset");
        self.reset(reason)
    }

    fn reset(&mut self, reason: HwResetReason) -> Result<(), RdmaError> {
        if self.engine.is_enabled() {
            self.engine.reset_and_flush(reason)
        } else {
            self.engine.reset_direct(reason);
            Ok(())
        }
    }

    /// The per-generation work shared by both interrupt sources.
    fn dispatch(&mut self, forced: bool) -> Result<(), RdmaError> {
        self.drain(forced)?;
        self.stereo_toggle(forced)?;
        self.hw_reset(forced)
    }
}

/// Deferred-update core of the OSD display pipeline.
///
/// One handle per display pipeline. All methods take `&self`; the handle can be shared between
/// the interrupt handler and any number of threads.
pub struct OsdCore<B> {
    state: Mutex<OsdCoreState<B>>,
    vsync: VsyncWait,
    forced_reset: AtomicBool,
    backoff: Box<dyn RetryBackoff>,
    retry_limit: u32,
    vsync_timeout: Duration,
    attached_at: Instant,
}

impl<B: OsdBus> OsdCore<B> {
    /// Takes ownership of the bus and allocates the RDMA table. RDMA starts disabled.
    pub fn attach(bus: B, config: OsdConfig) -> Result<Self> {
        config.validate()?;
        let retry_limit = config.rdma_retry_limit;
        let vsync_timeout = config.vsync_timeout();
        let engine = RdmaEngine::new(bus, config)?;
        Ok(Self {
            state: Mutex::new(OsdCoreState {
                engine,
                layers: vec![LayerState::default(); OsdOutput::COUNT],
                updates: UpdateList::default(),
                features: FeatureState::default(),
            }),
            vsync: VsyncWait::default(),
            forced_reset: AtomicBool::new(false),
            backoff: Box::new(YieldBackoff),
            retry_limit,
            vsync_timeout,
            attached_at: Instant::now(),
        })
    }

    pub fn with_backoff(mut self, backoff: impl RetryBackoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Stops RDMA, frees the table and hands the bus back.
    pub fn detach(self) -> B {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        state.engine.into_bus()
    }

    fn lock(&self) -> MutexGuard<'_, OsdCoreState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.attached_at.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn set_chip_generation(&self, cpu: CpuId) -> Result<()> {
        let mut st = self.lock();
        if st.engine.profile().is_some() {
            return Err(OsdError::ProfileAlreadySet);
        }
        st.engine.set_profile(profile_for(cpu));
        tracing::info!(?cpu, "osd chip generation set");
        Ok(())
    }

    pub fn chip_generation(&self) -> Option<CpuId> {
        self.lock().engine.profile().map(|p| p.cpu_id())
    }

    /// Starts shadowing the register groups in `mask`. Returns the groups newly enabled.
    pub fn backup_init(&self, mask: HwResetReason) -> HwResetReason {
        self.lock().engine.io.backup_init(mask)
    }

    /// Builds the recovery tables of the selected chip. Returns `false` if already built.
    pub fn recovery_init(&self) -> Result<bool> {
        let mut st = self.lock();
        let tables = st
            .engine
            .profile()
            .ok_or(OsdError::NoChipProfile)?
            .recovery_tables();
        Ok(st.engine.recovery.recovery_init(tables))
    }

    pub fn enable_rdma(&self, on: bool) -> Result<()> {
        self.lock().engine.enable(on)?;
        Ok(())
    }

    pub fn rdma_enabled(&self) -> bool {
        self.lock().engine.is_enabled()
    }

    /// Queues the writes `plan` produces, retrying while hardware holds the table.
    ///
    /// `plan` runs under the same lock as the append, and again after every backoff.
    fn append_planned<F>(&self, mut plan: F) -> Result<AppendOutcome>
    where
        F: FnMut(&mut OsdCoreState<B>) -> Result<Vec<RegisterWrite>>,
    {
        for attempt in 0..self.retry_limit {
            let forced = self.forced_reset.load(Ordering::Acquire);
            let mut st = self.lock();
            let writes = plan(&mut *st)?;
            if let Some(outcome) = st.append_all(&writes, forced)? {
                return Ok(outcome);
            }
            drop(st);
            self.backoff.backoff(attempt);
        }

        let mut st = self.lock();
        let writes = plan(&mut *st)?;
        let mut outcome = AppendOutcome::Flushed;
        for write in writes {
            outcome = st.engine.append_exhausted(write)?;
        }
        Ok(outcome)
    }

    fn append_composed(&self, addr: RegisterAddress, f: impl Fn(u32) -> u32) -> Result<AppendOutcome> {
        self.append_planned(|st| {
            let value = f(st.engine.vsync_read(addr));
            Ok(vec![RegisterWrite::new(addr, value)])
        })
    }

    /// Queues a register write for the next vsync, retrying while hardware holds the table.
    pub fn append_write(&self, addr: RegisterAddress, value: u32) -> Result<AppendOutcome> {
        self.append_planned(|_| Ok(vec![RegisterWrite::new(addr, value)]))
    }

    /// Interrupt-context variant of [`Self::append_write`]. Never retries.
    pub fn irq_write(&self, addr: RegisterAddress, value: u32) -> Result<AppendOutcome> {
        let forced = self.forced_reset.load(Ordering::Acquire);
        let outcome = self.lock().engine.try_append(
            RegisterWrite::new(addr, value),
            CallerContext::AtIrq,
            forced,
        )?;
        Ok(outcome.unwrap_or(AppendOutcome::Deferred))
    }

    pub fn vsync_read(&self, addr: RegisterAddress) -> u32 {
        self.lock().engine.vsync_read(addr)
    }

    pub fn vsync_write(&self, addr: RegisterAddress, value: u32) -> Result<AppendOutcome> {
        self.append_write(addr, value)
    }

    pub fn vsync_write_bits(
        &self,
        addr: RegisterAddress,
        value: u32,
        start: u32,
        len: u32,
    ) -> Result<AppendOutcome> {
        self.append_composed(addr, |old| insert_bits(old, value, start, len))
    }

    pub fn vsync_set_mask(&self, addr: RegisterAddress, mask: u32) -> Result<AppendOutcome> {
        self.append_composed(addr, |old| old | mask)
    }

    pub fn vsync_clr_mask(&self, addr: RegisterAddress, mask: u32) -> Result<AppendOutcome> {
        self.append_composed(addr, |old| old & !mask)
    }

    /// Applies `kind` for `output` now if RDMA defers it anyway, otherwise at the next vsync.
    pub fn add_to_update_list(&self, output: OsdOutput, kind: UpdateKind) -> Result<()> {
        self.append_planned(|st| {
            st.check_output(output)?;
            if !st.engine.is_enabled() {
                st.updates.add(output, kind);
                return Ok(Vec::new());
            }
            Ok(st.plan(kind, output))
        })?;
        Ok(())
    }

    pub fn pending_updates(&self, output: OsdOutput) -> PendingUpdateSet {
        self.lock().updates.pending(output)
    }

    pub fn layer(&self, output: OsdOutput) -> LayerState {
        self.lock().layers[output.index()].clone()
    }

    fn update_layer(
        &self,
        output: OsdOutput,
        kind: UpdateKind,
        f: impl FnOnce(&mut LayerState),
    ) -> Result<()> {
        {
            let mut st = self.lock();
            st.check_output(output)?;
            f(&mut st.layers[output.index()]);
        }
        self.add_to_update_list(output, kind)
    }

    pub fn set_color_mode(&self, output: OsdOutput, canvas_index: u8, mode: ColorMode) -> Result<()> {
        self.update_layer(output, UpdateKind::ColorMode, |l| {
            l.canvas_index = canvas_index;
            l.color_mode = mode;
        })
    }

    pub fn set_enable(&self, output: OsdOutput, enabled: bool) -> Result<()> {
        self.update_layer(output, UpdateKind::Enable, |l| l.enabled = enabled)
    }

    pub fn set_color_key(&self, output: OsdOutput, color_key: u32) -> Result<()> {
        self.update_layer(output, UpdateKind::ColorKey, |l| l.color_key = color_key)
    }

    pub fn set_color_key_enable(&self, output: OsdOutput, enabled: bool) -> Result<()> {
        self.update_layer(output, UpdateKind::ColorKeyEnable, |l| {
            l.color_key_enabled = enabled
        })
    }

    pub fn set_global_alpha(&self, output: OsdOutput, alpha: u16) -> Result<()> {
        self.update_layer(output, UpdateKind::GlobalAlpha, |l| l.global_alpha = alpha)
    }

    pub fn set_order(&self, output: OsdOutput, z_order: u8) -> Result<()> {
        self.update_layer(output, UpdateKind::Order, |l| l.z_order = z_order)
    }

    pub fn set_scale_coef(&self, output: OsdOutput, coef: &[u32]) -> Result<()> {
        self.update_layer(output, UpdateKind::ScaleCoef, |l| l.set_scale_coef(coef))
    }

    pub fn set_geometry(&self, output: OsdOutput, geometry: Geometry) -> Result<()> {
        self.update_layer(output, UpdateKind::Geometry, |l| l.geometry = geometry)
    }

    pub fn set_scale_enable(&self, output: OsdOutput, scale: ScaleEnable) -> Result<()> {
        self.update_layer(output, UpdateKind::ScaleEnable, |l| l.scale_enable = scale)
    }

    pub fn set_free_scale(&self, output: OsdOutput, free_scale: FreeScale) -> Result<()> {
        self.update_layer(output, UpdateKind::FreescaleEnable, |l| {
            l.free_scale = free_scale
        })
    }

    pub fn set_reverse(&self, output: OsdOutput, reverse: Reverse) -> Result<()> {
        self.update_layer(output, UpdateKind::Reverse, |l| l.reverse = reverse)
    }

    pub fn set_rotation(&self, output: OsdOutput, rotation: Rotation) -> Result<()> {
        self.update_layer(output, UpdateKind::Rotate, |l| l.rotation = rotation)
    }

    pub fn set_fifo(&self, output: OsdOutput, fifo: FifoConfig) -> Result<()> {
        self.update_layer(output, UpdateKind::Fifo, |l| l.fifo = fifo)
    }

    /// Frame-sequential stereo: the layer alternates halves of its source window every vsync.
    pub fn set_stereo(&self, output: OsdOutput, on: bool) -> Result<()> {
        self.update_layer(output, UpdateKind::Geometry, |l| {
            l.stereo = on.then_some(StereoPhase::Left);
        })
    }

    /// Compressed (AFBC) scan-out on OSD1.
    pub fn set_afbc_enabled(&self, enabled: bool) -> Result<()> {
        self.update_layer(OsdOutput::Osd1, UpdateKind::ColorMode, |l| {
            l.afbc_enabled = enabled
        })
    }

    pub fn set_hdr_active(&self, active: bool) {
        self.lock().features.hdr_active = active;
    }

    /// RDMA-done interrupt: hardware finished the table, start the next generation.
    pub fn handle_rdma_irq(&self) -> Result<()> {
        let mut st = self.lock();
        if !st.engine.is_enabled() {
            return Ok(());
        }
        let done = rdma::status_done_bit(OSD_RDMA_CHANNEL);
        if st.engine.io.read(addr::RDMA_STATUS) & done == 0 {
            st.engine.stats.rdma_lost_count += 1;
            tracing::debug!("rdma interrupt without done status");
            return Ok(());
        }

        st.engine.clear_reject();
        let forced = self.forced_reset.load(Ordering::Acquire);
        let result = st
            .engine
            .reset_table_for_new_generation()
            .and_then(|_| st.dispatch(forced));
        st.engine.io.write(addr::RDMA_CTRL, done);
        st.engine.stats.rdma_irq_count += 1;
        st.engine.rdma_done = true;
        drop(st);

        self.vsync.notify(self.now_ns());
        result.map_err(OsdError::from)
    }

    /// Vsync interrupt. Without RDMA this is where pending updates reach hardware.
    pub fn handle_vsync_irq(&self) -> Result<()> {
        let mut st = self.lock();
        st.engine.stats.vsync_irq_count += 1;
        if st.engine.is_enabled() {
            if !st.engine.rdma_done {
                st.engine.stats.rdma_lost_count += 1;
            }
            st.engine.rdma_done = false;
            if self.forced_reset.swap(false, Ordering::AcqRel) {
                tracing::info!("forced osd rdma restart");
                st.engine.enable(false)?;
                st.engine.enable(true)?;
            }
            return Ok(());
        }

        let result = st.dispatch(false);
        drop(st);
        self.vsync.notify(self.now_ns());
        result.map_err(OsdError::from)
    }

    /// Restores the register groups a hardware self-reset clobbered.
    pub fn reset_and_flush_on_hw_reset(&self, reason: HwResetReason) -> Result<()> {
        self.lock().reset(reason)?;
        Ok(())
    }

    /// Makes appends flush synchronously until the next vsync restarts RDMA.
    pub fn request_forced_reset(&self) {
        self.forced_reset.store(true, Ordering::Release);
    }

    pub fn wait_for_vsync(&self) -> VsyncOutcome {
        self.vsync.wait(self.vsync_timeout)
    }

    pub fn wait_for_vsync_timeout(&self, timeout: Duration) -> VsyncOutcome {
        self.vsync.wait(timeout)
    }

    /// Time of the most recent dispatched vsync, in nanoseconds since attach. Zero before the first.
    pub fn last_vsync_timestamp_ns(&self) -> u64 {
        self.vsync.last_timestamp_ns()
    }

    pub fn stats(&self) -> RdmaStats {
        self.lock().engine.stats
    }

    pub fn table_snapshot(&self) -> Vec<RegisterWrite> {
        self.lock().engine.table_snapshot()
    }

    pub fn get_backup(&self, addr: RegisterAddress) -> Option<u32> {
        self.lock().engine.io.backup().get_backup(addr)
    }

    /// Compares the recorded value of `addr` against hardware.
    pub fn get_recovery(&self, addr: RegisterAddress) -> RecoveryDecision {
        let mut st = self.lock();
        let engine = &mut st.engine;
        let io = &mut engine.io;
        engine.recovery.get_recovery(addr, || io.read(addr))
    }

    pub fn recovery_state(&self, addr: RegisterAddress) -> Option<RecoveryState> {
        self.lock().engine.recovery.item(addr).map(|item| item.state)
    }
}
