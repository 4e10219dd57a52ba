//! Per-session status broadcast.
//!
//! Subscribers see the latest status and are woken on every change. Nothing
//! is buffered: a slow subscriber skips intermediate states but always
//! observes the final one.

use tokio::sync::watch;

use crate::session::SessionStatus;

pub type StatusReceiver = watch::Receiver<SessionStatus>;

#[derive(Debug)]
pub struct EventNotifier {
    sender: watch::Sender<SessionStatus>,
}

impl EventNotifier {
    pub fn new(initial: SessionStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Publish a status change. Succeeds whether or not anyone listens.
    pub fn publish(&self, status: SessionStatus) {
        let previous = self.sender.send_replace(status);
        if previous != status {
            tracing::trace!(from = %previous, to = %status, "status published");
        }
    }

    pub fn subscribe(&self) -> StatusReceiver {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
