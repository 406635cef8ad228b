//! Cooperative cancellation and pausing for lip-sync loops.
//!
//! Loops check a [`CancellationToken`] before every emission and race it against
//! every delay. A [`PlaybackGate`] holds them while speech is paused.

use std::sync::Arc;
use tokio::sync::watch;

pub use tokio_util::sync::CancellationToken;

/// Shared paused/playing switch. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct PlaybackGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for PlaybackGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { paused: Arc::new(tx) }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolve once the gate is open (immediately if not paused).
    pub async fn wait_open(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}
