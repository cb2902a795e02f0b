//! Deferred register-update core of the Meson OSD display pipeline.
//!
//! Register writes are batched into an RDMA table that hardware replays at vsync. The core keeps
//! a backup shadow and a recovery record of every write, so that register state survives both
//! table resets between generations and hardware self-resets of the OSD and AFBC blocks.
//!
//! [`OsdCore`] is the entry point; the `osd-sim` crate provides a software VPU
//! for tests.
#![forbid(unsafe_code)]

pub mod backup;
pub mod config;
pub mod error;
mod handle;
pub mod io;
pub mod layer;
pub mod profile;
pub mod rdma;
pub mod recovery;
pub mod update_list;
mod vsync;

pub use crate::backup::{BackupGroup, BackupStore};
pub use crate::config::{ConfigError, OsdConfig};
pub use crate::error::{OsdError, RdmaError, Result};
pub use crate::handle::OsdCore;
pub use crate::layer::{
    ColorMode, FifoConfig, FreeScale, Geometry, LayerState, OsdOutput, Reverse, Rotation,
    ScaleEnable, StereoPhase, Window,
};
pub use crate::profile::{AfbcType, ChipProfile, CpuId, FeatureState};
pub use crate::rdma::{AppendOutcome, CallerContext, RdmaStats, RetryBackoff, YieldBackoff};
pub use crate::recovery::{RecoveryDecision, RecoveryMiss, RecoveryState};
pub use crate::update_list::{PendingUpdateSet, UpdateKind};
pub use crate::vsync::VsyncOutcome;

pub use osd_regs::{addr, HwResetReason, RegisterAddress, RegisterWrite};
