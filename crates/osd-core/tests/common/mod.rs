#![allow(dead_code)]

use osd_core::{CpuId, HwResetReason, OsdConfig, OsdCore};
use osd_sim::{ReplayReport, SimulatedVpu};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A core attached to a fresh simulated VPU. RDMA is left off.
pub fn attach(cpu: Option<CpuId>, config: OsdConfig) -> (SimulatedVpu, OsdCore<SimulatedVpu>) {
    init_tracing();
    let vpu = SimulatedVpu::new();
    let core = OsdCore::attach(vpu.clone(), config).expect("attach");
    if let Some(cpu) = cpu {
        core.set_chip_generation(cpu).expect("chip generation");
    }
    (vpu, core)
}

/// Chip profile set, recovery built, `backup` groups shadowed and RDMA running.
pub fn rdma_rig(
    cpu: CpuId,
    backup: HwResetReason,
    config: OsdConfig,
) -> (SimulatedVpu, OsdCore<SimulatedVpu>) {
    let (vpu, core) = attach(Some(cpu), config);
    core.backup_init(backup);
    assert!(core.recovery_init().expect("recovery init"));
    core.enable_rdma(true).expect("enable rdma");
    (vpu, core)
}

/// One display frame with RDMA: hardware replays at vsync, then both interrupts are handled.
pub fn frame(vpu: &SimulatedVpu, core: &OsdCore<SimulatedVpu>) -> ReplayReport {
    let report = vpu.vsync();
    core.handle_vsync_irq().expect("vsync irq");
    core.handle_rdma_irq().expect("rdma irq");
    report
}
