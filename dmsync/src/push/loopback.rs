//! Loopback push channel for tests and the demo.
//!
//! Backed by a [`tokio::sync::mpsc`] channel whose sending half is handed
//! to the [`InMemoryBackend`] on [`join`](PushChannel::join). Events the
//! backend publishes for the joined user arrive here in publish order.

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc};

use dmsync_proto::event::PushEvent;
use dmsync_proto::message::UserId;

use super::{PushChannel, PushError};
use crate::api::memory::InMemoryBackend;

/// In-process push channel fed by an [`InMemoryBackend`].
pub struct LoopbackPushChannel {
    backend: InMemoryBackend,
    /// Sending half, moved into the backend on join.
    pending_tx: SyncMutex<Option<mpsc::Sender<PushEvent>>>,
    rx: Mutex<mpsc::Receiver<PushEvent>>,
}

impl LoopbackPushChannel {
    /// Create an unjoined channel buffering up to `buffer` events.
    #[must_use]
    pub fn new(backend: InMemoryBackend, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            backend,
            pending_tx: SyncMutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }
}

impl PushChannel for LoopbackPushChannel {
    async fn join(&self, user: &UserId) -> Result<(), PushError> {
        if !self.backend.has_user(user) {
            return Err(PushError::JoinRejected(format!("unknown user {user}")));
        }
        let tx = self
            .pending_tx
            .lock()
            .take()
            .ok_or_else(|| PushError::JoinRejected("channel already joined".into()))?;
        self.backend.subscribe(user, tx);
        tracing::debug!(user = %user, "joined loopback push channel");
        Ok(())
    }

    async fn next_event(&self) -> Result<PushEvent, PushError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(PushError::ConnectionClosed)
    }

    async fn leave(&self) {
        self.pending_tx.lock().take();
        self.rx.lock().await.close();
    }
}
