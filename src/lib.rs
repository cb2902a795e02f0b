//! Meson OSD deferred-update core.
//!
//! This crate re-exports the workspace members:
//! - [`regs`]: register map, RDMA table item and handshake bits,
//! - [`bus`]: the hardware boundary traits,
//! - everything in `osd-core` at the top level.
#![forbid(unsafe_code)]

pub use osd_bus as bus;
pub use osd_core::*;
pub use osd_regs as regs;
