//! Cooperative cancellation driven by SIGINT/SIGTERM.
//!
//! The handler only flips a flag; the executor checks it between steps and
//! runs cleanup on the normal flow of control. Signals that arrive while
//! cleanup runs are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

use crate::error::SweepError;

/// Run-scoped cancellation flag shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    cleaning: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the process-wide handler. Call once, from the binary.
    pub fn install_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || token.signal()).context("install interrupt handler")
    }

    /// Record a cancellation request unless cleanup is already running.
    pub fn signal(&self) {
        if self.cleaning.load(Ordering::SeqCst) {
            warn!("interrupt received during cleanup, ignoring");
            return;
        }
        warn!("interrupt received, stopping after the current step");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Interrupted` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SweepError::Interrupted.into());
        }
        Ok(())
    }

    /// Enter cleanup; further signals are ignored until the guard drops.
    pub fn cleanup_guard(&self) -> CleanupGuard {
        self.cleaning.store(true, Ordering::SeqCst);
        CleanupGuard {
            cleaning: Arc::clone(&self.cleaning),
        }
    }
}

/// Marks cleanup as running for its lifetime.
#[derive(Debug)]
pub struct CleanupGuard {
    cleaning: Arc<AtomicBool>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.cleaning.store(false, Ordering::SeqCst);
    }
}
