use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VsyncOutcome {
    /// A vsync was dispatched; nanoseconds since attach.
    Vsync { timestamp_ns: u64 },
    TimedOut,
}

#[derive(Debug, Default)]
struct VsyncMark {
    seq: u64,
    timestamp_ns: u64,
}

/// Wakes threads blocked until the next dispatched vsync.
#[derive(Debug, Default)]
pub(crate) struct VsyncWait {
    mark: Mutex<VsyncMark>,
    cond: Condvar,
}

impl VsyncWait {
    fn lock(&self) -> MutexGuard<'_, VsyncMark> {
        self.mark.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self, timestamp_ns: u64) {
        let mut mark = self.lock();
        mark.seq = mark.seq.wrapping_add(1);
        mark.timestamp_ns = timestamp_ns;
        drop(mark);
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self, timeout: Duration) -> VsyncOutcome {
        let mark = self.lock();
        let seen = mark.seq;
        let (mark, result) = self
            .cond
            .wait_timeout_while(mark, timeout, |mark| mark.seq == seen)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            VsyncOutcome::TimedOut
        } else {
            VsyncOutcome::Vsync {
                timestamp_ns: mark.timestamp_ns,
            }
        }
    }

    pub(crate) fn last_timestamp_ns(&self) -> u64 {
        self.lock().timestamp_ns
    }
}
