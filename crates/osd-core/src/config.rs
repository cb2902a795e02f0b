use std::time::Duration;

use osd_regs::rdma;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest flush threshold that still leaves room for the trailing DONE sentinel written one
/// slot past the last counted item.
pub const MAX_FLUSH_THRESHOLD: usize = rdma::TABLE_CAPACITY - 2;

/// Tunables of the deferred-update core.
///
/// Every field has a default, so a partial JSON/TOML document deserializes into a complete
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdConfig {
    /// Appends that find more than this many items in the RDMA table flush it synchronously.
    pub rdma_flush_threshold: usize,
    /// Attempts made while hardware holds REJECT before an append degrades to a flush.
    pub rdma_retry_limit: u32,
    pub vsync_timeout_ms: u64,
    /// Fast-test mode with a short vsync wait.
    pub pxp_mode: bool,
    pub pxp_vsync_timeout_ms: u64,
    /// Turns hardware-reset handling into a no-op.
    pub disable_rdma_reset: bool,
    /// Dump the RDMA table at debug level after every generation reset.
    pub rdma_debug: bool,
    /// Number of subsequent reset-and-flush passes that dump the table.
    pub dump_reg_on_reset: u32,
    pub afbc_force_reset: bool,
    pub afbc_status_err_reset: bool,
    /// Video layers are z-ordered through the OSD2 blend source (G12A family).
    pub enable_vd_zorder: bool,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            rdma_flush_threshold: 500,
            rdma_retry_limit: 100,
            vsync_timeout_ms: 1000,
            pxp_mode: false,
            pxp_vsync_timeout_ms: 50,
            disable_rdma_reset: false,
            rdma_debug: false,
            dump_reg_on_reset: 0,
            afbc_force_reset: false,
            afbc_status_err_reset: true,
            enable_vd_zorder: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("rdma_flush_threshold {threshold} exceeds the table capacity (max {max})")]
    FlushThresholdTooLarge { threshold: usize, max: usize },

    #[error("rdma_flush_threshold {threshold} leaves no room for a payload item")]
    FlushThresholdTooSmall { threshold: usize },

    #[error("rdma_retry_limit must be non-zero")]
    ZeroRetryLimit,

    #[error("{field} must be non-zero")]
    ZeroTimeout { field: &'static str },
}

impl OsdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rdma_flush_threshold > MAX_FLUSH_THRESHOLD {
            return Err(ConfigError::FlushThresholdTooLarge {
                threshold: self.rdma_flush_threshold,
                max: MAX_FLUSH_THRESHOLD,
            });
        }
        // An empty table already holds the two sentinels.
        if self.rdma_flush_threshold < 2 {
            return Err(ConfigError::FlushThresholdTooSmall {
                threshold: self.rdma_flush_threshold,
            });
        }
        if self.rdma_retry_limit == 0 {
            return Err(ConfigError::ZeroRetryLimit);
        }
        if self.vsync_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "vsync_timeout_ms",
            });
        }
        if self.pxp_mode && self.pxp_vsync_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "pxp_vsync_timeout_ms",
            });
        }
        Ok(())
    }

    /// Timeout used by [`crate::OsdCore::wait_for_vsync`].
    pub fn vsync_timeout(&self) -> Duration {
        if self.pxp_mode {
            Duration::from_millis(self.pxp_vsync_timeout_ms)
        } else {
            Duration::from_millis(self.vsync_timeout_ms)
        }
    }
}
