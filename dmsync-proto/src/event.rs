//! Push-channel protocol.
//!
//! A client opens the channel, sends [`ChannelFrame::Join`] with its user
//! id and waits for [`ChannelFrame::Joined`]. After that the server only
//! sends [`ChannelFrame::Event`] (and [`ChannelFrame::Error`] on failure).
//! Events for one conversation are emitted in server order; nothing is
//! promised across conversations.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId, WireMessage};

/// An event delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushEvent {
    /// Someone sent a message into one of our conversations.
    MessageReceived {
        /// Conversation the message belongs to.
        conversation_id: ConversationId,
        /// The message payload.
        message: WireMessage,
    },
    /// The server persisted a message we sent.
    MessageSendConfirmed {
        /// Conversation the message belongs to (possibly newly minted).
        conversation_id: ConversationId,
        /// The authoritative message record.
        message: WireMessage,
    },
}

impl PushEvent {
    /// Conversation this event targets.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageReceived {
                conversation_id, ..
            }
            | Self::MessageSendConfirmed {
                conversation_id, ..
            } => conversation_id,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message-received",
            Self::MessageSendConfirmed { .. } => "message-send-confirmed",
        }
    }
}

/// Frames exchanged over the push-channel connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelFrame {
    /// Client subscribes to events for a user. Must be the first frame.
    Join {
        /// The joining user.
        user_id: UserId,
    },
    /// Server acknowledges the subscription.
    Joined {
        /// The user that was joined (echoed back).
        user_id: UserId,
    },
    /// A push event.
    Event(PushEvent),
    /// Server-side error.
    Error {
        /// Human-readable description.
        reason: String,
    },
}
