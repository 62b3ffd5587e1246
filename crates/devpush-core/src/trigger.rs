//! Single-slot trigger channel between the watcher and the control loop
//!
//! The channel holds at most one pending signal. Firing while a signal is
//! already queued is a no-op, so any number of triggers raised during a busy
//! cycle collapse into exactly one follow-up cycle.

use tokio::sync::mpsc;

/// Create a connected trigger pair.
pub fn channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSender { tx }, TriggerReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<()>,
}

impl TriggerSender {
    /// Request a cycle. Returns `false` if one was already pending or the
    /// receiving side is gone.
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

impl TriggerReceiver {
    /// Wait for the next pending trigger. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Consume a pending trigger without waiting.
    pub fn try_recv(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
