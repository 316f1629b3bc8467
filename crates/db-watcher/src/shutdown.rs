//! Write-once stop signal shared between the controller and its tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Sending side of a stop signal.
///
/// Cloning is cheap; every clone triggers the same signal. Only the first
/// `trigger` publishes, later calls are no-ops.
#[derive(Clone)]
pub struct ShutdownSignal {
    fired: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    /// Fire the signal. Returns `true` for the caller that actually fired it.
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    /// Create a new receiving side.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownSignal`].
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// A dropped signal counts as shutdown.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
