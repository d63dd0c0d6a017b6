//! Cooperative interruption agreed on by all workers.
//!
//! Any signal source (an OS handler, a test) drives an [`InterruptFlag`]. The
//! driver asks the [`InterruptCoordinator`] at gradient-step boundaries only;
//! the answer is the logical OR over all ranks, so every worker stops at the
//! same boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::comm::Communicator;

/// What the signal source should do after reporting an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// First interrupt, recorded for the next step boundary.
    Recorded,
    /// Already signaled and not consumed yet; fall back to default termination.
    Escalate,
}

/// Idle / Signaled state of one worker.
#[derive(Debug, Default)]
pub struct InterruptFlag {
    signaled: AtomicBool,
}

impl InterruptFlag {
    pub fn signal(&self) -> SignalOutcome {
        if self.signaled.swap(true, Ordering::SeqCst) {
            SignalOutcome::Escalate
        } else {
            SignalOutcome::Recorded
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.signaled.swap(false, Ordering::SeqCst)
    }
}

/// Turns per-worker flags into one collective stop decision.
#[derive(Debug, Clone, Default)]
pub struct InterruptCoordinator {
    flag: Arc<InterruptFlag>,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing flag, e.g. one wired to an OS signal handler.
    pub fn with_flag(flag: Arc<InterruptFlag>) -> Self {
        Self { flag }
    }

    pub fn flag(&self) -> Arc<InterruptFlag> {
        Arc::clone(&self.flag)
    }

    /// Collective. Returns true on every rank if any rank was signaled, and
    /// resets the local flag to idle.
    pub fn should_stop<C: Communicator>(&self, comm: &C) -> bool {
        let local = self.flag.take();
        if local {
            info!("process {} received interrupt", comm.rank());
        }
        comm.all_reduce_or(local)
    }
}
