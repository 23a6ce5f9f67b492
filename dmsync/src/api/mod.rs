//! Request/response collaborators consumed by the engine.
//!
//! Defines the [`HistoryFetcher`] and [`MessageApi`] traits. Wire formats
//! are the implementation's concern; the engine only sees the DTOs below.
//! Implementations:
//! - [`memory::InMemoryBackend`]: in-process server simulation for tests
//!   and the demo binary

pub mod memory;

use dmsync_proto::conversation::{Conversation, Peer};
use dmsync_proto::message::{ConversationId, UserId, WireMessage};

/// Errors returned by collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never got a response (connection refused, reset, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Server-provided description.
        message: String,
    },

    /// The request was refused and repeating it will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Rejected(_) => false,
        }
    }
}

/// One page of a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    /// Messages of this page, ascending by creation time.
    pub messages: Vec<WireMessage>,
    /// Page number this response is for (1 = most recent).
    pub page: u32,
    /// Whether older pages exist.
    pub has_more: bool,
}

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// An existing conversation.
    Conversation(ConversationId),
    /// A peer we have no conversation with yet; the server mints one.
    Peer(UserId),
}

impl std::fmt::Display for SendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation {id}"),
            Self::Peer(id) => write!(f, "peer {id}"),
        }
    }
}

/// Successful response to [`MessageApi::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Conversation the message landed in (possibly newly minted).
    pub conversation_id: ConversationId,
    /// The authoritative message record.
    pub message: WireMessage,
}

/// Paginated pulls of the conversation directory and message logs.
///
/// Pure request/response: calls are retried by the caller, never
/// internally.
pub trait HistoryFetcher: Send + Sync {
    /// The caller's conversations.
    fn fetch_conversation_list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// One page of a conversation's messages. Page 1 is the most recent.
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> impl std::future::Future<Output = Result<MessagePage, ApiError>> + Send;

    /// Users matching a free-text query.
    fn search_peers(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Peer>, ApiError>> + Send;

    /// Tell the server the caller has read a conversation. Best-effort.
    fn mark_read(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}

/// Outbound message submission.
pub trait MessageApi: Send + Sync {
    /// Send `text` to a conversation or a peer.
    fn send_message(
        &self,
        target: &SendTarget,
        text: &str,
    ) -> impl std::future::Future<Output = Result<SentMessage, ApiError>> + Send;
}
