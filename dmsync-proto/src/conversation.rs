//! Conversation and peer profile types.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Timestamp, UserId};

/// Minimal denormalized profile of the other participant of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Account id of the peer.
    pub id: UserId,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Avatar reference (URL or storage key), if any.
    pub avatar: Option<String>,
}

impl Peer {
    /// Creates a peer without an avatar.
    pub fn new(
        id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: UserId::new(id),
            first_name: first_name.into(),
            last_name: last_name.into(),
            avatar: None,
        }
    }

    /// "First Last", falling back to the account id when both parts are blank.
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.id.to_string()
        } else {
            name.to_string()
        }
    }
}

/// A conversation as listed by the server's conversation directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-minted conversation id.
    pub id: ConversationId,
    /// The other participant.
    pub peer: Peer,
    /// Text of the most recent message.
    pub last_message_preview: String,
    /// Time of the most recent message.
    pub last_message_at: Timestamp,
    /// Messages received while the conversation was not focused.
    pub unread_count: u32,
}
