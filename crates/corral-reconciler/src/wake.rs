//! Coalesced wake-ups for the reconciler loop.
//!
//! A wake that arrives while the same pool already has a wake pending
//! (or a pass in flight that has not yet drained the pending mark) folds
//! into the one queued run instead of piling up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

#[derive(Clone)]
pub struct WakeHandle {
    pending: Arc<Mutex<HashSet<String>>>,
    tx: mpsc::UnboundedSender<String>,
}

impl WakeHandle {
    /// Raw handle/receiver pair. Production code gets its handle from
    /// [`Reconciler::wake_handle`](crate::Reconciler::wake_handle); this
    /// exists for wiring tests around the loop.
    pub fn channel() -> (WakeHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WakeHandle {
            pending: Arc::new(Mutex::new(HashSet::new())),
            tx,
        };
        (handle, rx)
    }

    /// Requests a reconcile pass for `pool_id`. Duplicate requests while
    /// one is pending are dropped.
    pub fn wake(&self, pool_id: &str) {
        let newly_pending = self
            .pending
            .lock()
            .map(|mut set| set.insert(pool_id.to_string()))
            .unwrap_or(false);
        if newly_pending {
            // Receiver dropped means the loop is shutting down.
            let _ = self.tx.send(pool_id.to_string());
        }
    }

    /// Clears the pending mark once the loop picks the pool up. Wakes
    /// arriving after this point queue one fresh run.
    pub(crate) fn acknowledge(&self, pool_id: &str) {
        if let Ok(mut set) = self.pending.lock() {
            set.remove(pool_id);
        }
    }
}
