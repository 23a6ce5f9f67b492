//! Message types shared between the engine and its collaborators.
//!
//! [`WireMessage`] is what the history API and the push channel deliver:
//! every field is optional because the engine does not trust collaborator
//! payloads. [`Message`] is the validated form the engine stores, produced
//! by [`Message::from_wire`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Maximum accepted message content length in bytes.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Stable identifier of a user account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation between two users.
///
/// Minted by the server on the first message between a pair of users and
/// never generated by the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message.
///
/// Non-negative values are assigned once by the server and are the
/// message's permanent identity. Negative values are provisional sentinels
/// for locally created entries that the server has not confirmed yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(i64);

impl MessageId {
    /// Creates a message identifier from its raw value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is a provisional (not server-assigned) identifier.
    #[must_use]
    pub const fn is_provisional(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Where a message entry came from.
///
/// Only used in memory to resolve reconciliation; never sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OriginSource {
    /// Loaded from a paginated history fetch.
    #[default]
    HistoryFetch,
    /// Delivered by the push channel as a new message.
    PushReceived,
    /// Delivered by the push channel as confirmation of our own send.
    PushSendConfirmed,
    /// Created locally and not yet confirmed by the server.
    OptimisticLocal,
}

/// A validated message held in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Authoritative id (or a provisional sentinel for optimistic entries).
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text content.
    pub content: String,
    /// Authoritative creation time, used for ordering.
    pub created_at: Timestamp,
    /// Source of this entry.
    #[serde(skip)]
    pub origin: OriginSource,
}

impl Message {
    /// Ordering key: creation time, then id as tie-break.
    #[must_use]
    pub const fn sort_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }

    /// Compares two messages by [`sort_key`](Self::sort_key).
    #[must_use]
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.sort_key().cmp(&b.sort_key())
    }

    /// Validates a collaborator payload and tags it with its origin.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessage`] naming the first required field that
    /// is missing.
    pub fn from_wire(wire: WireMessage, origin: OriginSource) -> Result<Self, MalformedMessage> {
        let id = wire.id.ok_or(MalformedMessage::MissingField("id"))?;
        let conversation_id = wire
            .conversation_id
            .ok_or(MalformedMessage::MissingField("conversation_id"))?;
        let sender_id = wire
            .sender_id
            .ok_or(MalformedMessage::MissingField("sender_id"))?;
        let created_at = wire
            .created_at
            .ok_or(MalformedMessage::MissingField("created_at"))?;
        if id.is_provisional() {
            return Err(MalformedMessage::ProvisionalId(id));
        }

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            content: wire.content.unwrap_or_default(),
            created_at,
            origin,
        })
    }

    /// Converts back into the collaborator DTO.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            id: Some(self.id),
            conversation_id: Some(self.conversation_id.clone()),
            sender_id: Some(self.sender_id.clone()),
            content: Some(self.content.clone()),
            created_at: Some(self.created_at),
        }
    }
}

/// Message as delivered by a collaborator, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned id.
    pub id: Option<MessageId>,
    /// Owning conversation.
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender_id: Option<UserId>,
    /// Text content.
    pub content: Option<String>,
    /// Creation time.
    pub created_at: Option<Timestamp>,
}

/// A collaborator delivered a message the engine refuses to store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    /// A required field was absent.
    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),
    /// The server sent an id in the provisional range.
    #[error("server sent provisional message id {0}")]
    ProvisionalId(MessageId),
}
