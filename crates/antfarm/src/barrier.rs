//! Single-shot barrier released when the fleet reaches one consensus group.

use std::sync::Arc;
use tokio::sync::watch;

/// A one-way gate shared by every job runner in a farm.
///
/// Starts closed, opens once on [`release`](SyncBarrier::release) and stays
/// open. There is no way to close it again; a new wait needs a new barrier.
#[derive(Debug, Clone)]
pub struct SyncBarrier {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBarrier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the barrier. Subsequent calls do nothing.
    pub fn release(&self) {
        self.tx.send_if_modified(|released| {
            let changed = !*released;
            *released = true;
            changed
        });
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the barrier is open.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on release.
        let _ = rx.wait_for(|released| *released).await;
    }
}
