//! Interruption handling.
//!
//! A [`CancelHandle`] is shared between the signal listener and the
//! pipeline. Cancelling it flags the run and terminates whichever external
//! tool is currently running, so blocking reads on its output return.

pub mod shutdown;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Child;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::utils::errors::{BackupError, Result};

#[derive(Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    active_child: Arc<Mutex<Option<Pid>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the run as cancelled and terminate the active child, if any.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Ok(slot) = self.active_child.lock() {
            if let Some(pid) = *slot {
                terminate(pid);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `Interrupted` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BackupError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Register a freshly spawned child. The registration lasts until the
    /// returned guard is dropped.
    pub fn track(&self, child: &Child) -> ChildGuard {
        let pid = Pid::from_raw(child.id() as i32);
        if let Ok(mut slot) = self.active_child.lock() {
            *slot = Some(pid);
        }
        // cancel() may have run before the pid was visible
        if self.is_cancelled() {
            terminate(pid);
        }
        ChildGuard {
            slot: Arc::clone(&self.active_child),
        }
    }
}

pub struct ChildGuard {
    slot: Arc<Mutex<Option<Pid>>>,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

fn terminate(pid: Pid) {
    debug!("Sending SIGTERM to child {}", pid);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        warn!("Failed to signal child {}: {}", pid, e);
    }
}
