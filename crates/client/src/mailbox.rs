//! Freshest-wins snapshot handoff between threads.
//!
//! The network thread publishes canonical snapshots; the prediction thread
//! takes whichever is newest when it gets around to reconciling. Capacity is
//! one: publishing over an unconsumed snapshot replaces it, so a slow
//! consumer reconciles against the latest state instead of working through
//! a backlog of stale ones.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use driftsync_core::Snapshot;

pub fn mailbox() -> (SnapshotSender, SnapshotReceiver) {
    let (tx, rx) = bounded(1);
    (
        SnapshotSender {
            tx,
            rx: rx.clone(),
        },
        SnapshotReceiver { rx },
    )
}

/// Publishing half; owned by the network thread.
#[derive(Clone)]
pub struct SnapshotSender {
    tx: Sender<Snapshot>,
    rx: Receiver<Snapshot>,
}

impl SnapshotSender {
    /// Publish a snapshot, displacing any unconsumed one.
    pub fn publish(&self, snapshot: Snapshot) {
        let mut snapshot = snapshot;
        loop {
            match self.tx.try_send(snapshot) {
                Ok(()) => return,
                Err(TrySendError::Full(s)) => {
                    // Evict the stale occupant and retry.
                    let _ = self.rx.try_recv();
                    snapshot = s;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Consuming half; owned by the prediction thread.
pub struct SnapshotReceiver {
    rx: Receiver<Snapshot>,
}

impl SnapshotReceiver {
    /// Take the most recent published snapshot, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        self.rx.try_iter().last()
    }
}

// ============================================================================
// Tests
// ============================================================================
