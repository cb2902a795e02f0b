use osd_bus::DmaError;
use osd_regs::RegisterAddress;
use thiserror::Error;

use crate::config::ConfigError;
use crate::layer::OsdOutput;

/// Failures of the RDMA table engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RdmaError {
    #[error(transparent)]
    Dma(#[from] DmaError),

    /// An interrupt-context append found hardware still consuming the table. The interrupt
    /// handler clears REJECT before touching the table, so this is a sequencing bug.
    #[error("RDMA table busy (REJECT held) during interrupt-context write of {addr}")]
    RejectHeldInIrq { addr: RegisterAddress },

    /// The handshake register cannot carry a payload.
    #[error("register {0} is reserved for the RDMA handshake")]
    ReservedRegister(RegisterAddress),

    #[error("reset restore left {count} items in the RDMA table, above the flush threshold")]
    ResetFlushOverflow { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OsdError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error(transparent)]
    Rdma(RdmaError),

    #[error("{0:?} does not exist on this chip")]
    UnsupportedOutput(OsdOutput),

    #[error("chip generation has not been set")]
    NoChipProfile,

    #[error("chip generation is already set")]
    ProfileAlreadySet,
}

impl From<RdmaError> for OsdError {
    fn from(err: RdmaError) -> Self {
        match err {
            RdmaError::Dma(dma) => OsdError::Dma(dma),
            other => OsdError::Rdma(other),
        }
    }
}

pub type Result<T, E = OsdError> = std::result::Result<T, E>;
