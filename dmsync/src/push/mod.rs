//! Push channel abstraction.
//!
//! A [`PushChannel`] is one long-lived subscription per session that
//! delivers [`PushEvent`]s. Connection setup, reconnect and backoff belong
//! to the implementation; the engine only joins, consumes and leaves.
//! Implementations:
//! - [`loopback::LoopbackPushChannel`]: fed by the in-memory backend
//! - [`websocket::WebSocketPushChannel`]: binary frames over a WebSocket

pub mod loopback;
pub mod websocket;

use dmsync_proto::codec::CodecError;
use dmsync_proto::event::PushEvent;
use dmsync_proto::message::UserId;

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The subscription has ended (server closed, left, or never joined).
    #[error("push channel closed")]
    ConnectionClosed,

    /// Connecting or joining did not complete in time.
    #[error("push channel operation timed out")]
    Timeout,

    /// The server refused the join.
    #[error("join rejected: {0}")]
    JoinRejected(String),

    /// A frame could not be encoded or decoded.
    #[error("push frame codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("push channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PushError {
    /// Whether the channel can deliver no further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

/// Subscription delivering message events for one user.
///
/// # Ordering
///
/// Events for one conversation arrive in the order the server emitted
/// them. Nothing is promised across conversations.
pub trait PushChannel: Send + Sync {
    /// Subscribe to events addressed to `user`.
    fn join(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<(), PushError>> + Send;

    /// Wait for the next event.
    ///
    /// Returns [`PushError::ConnectionClosed`] once the subscription ended.
    fn next_event(&self) -> impl std::future::Future<Output = Result<PushEvent, PushError>> + Send;

    /// End the subscription.
    fn leave(&self) -> impl std::future::Future<Output = ()> + Send;
}
