//! In-process server simulation.
//!
//! [`InMemoryBackend`] plays the role of the history API, the send API and
//! the push-channel server at once. Each user talks to it through a
//! [`BackendClient`] (implements [`HistoryFetcher`] and [`MessageApi`]) and
//! a [`LoopbackPushChannel`]. It keeps the server-side invariants the
//! engine relies on: ids are assigned once, conversations are minted on
//! the first message between two users, and events for a conversation are
//! emitted in the order messages were accepted.
//!
//! Test hooks: [`fail_next`](InMemoryBackend::fail_next) queues an error for
//! the next call of an operation, [`hold_fetches`](InMemoryBackend::hold_fetches)
//! parks fetches until [`release_fetches`](InMemoryBackend::release_fetches),
//! and [`request_count`](InMemoryBackend::request_count) counts calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use dmsync_proto::conversation::{Conversation, Peer};
use dmsync_proto::event::PushEvent;
use dmsync_proto::message::{ConversationId, Message, MessageId, OriginSource, Timestamp, UserId};

use super::{ApiError, HistoryFetcher, MessageApi, MessagePage, SendTarget, SentMessage};
use crate::push::loopback::LoopbackPushChannel;

/// Backend operations, for failure injection and request counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `fetch_conversation_list`.
    ListConversations,
    /// `fetch_messages`.
    FetchMessages,
    /// `search_peers`.
    SearchPeers,
    /// `mark_read`.
    MarkRead,
    /// `send_message`.
    SendMessage,
}

impl Operation {
    /// Operations parked by [`InMemoryBackend::hold_fetches`].
    const fn is_fetch(self) -> bool {
        matches!(
            self,
            Self::ListConversations | Self::FetchMessages | Self::SearchPeers
        )
    }
}

/// A conversation as the server stores it.
#[derive(Debug)]
struct ServerConversation {
    id: ConversationId,
    members: [UserId; 2],
    messages: Vec<Message>,
    unread: HashMap<UserId, u32>,
}

impl ServerConversation {
    fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    fn other(&self, user: &UserId) -> &UserId {
        if self.members[0] == *user {
            &self.members[1]
        } else {
            &self.members[0]
        }
    }
}

#[derive(Debug)]
struct BackendState {
    users: BTreeMap<UserId, Peer>,
    conversations: Vec<ServerConversation>,
    subscribers: HashMap<UserId, Vec<mpsc::Sender<PushEvent>>>,
    next_message_id: i64,
    clock: u64,
    failures: HashMap<Operation, VecDeque<ApiError>>,
    requests: HashMap<Operation, usize>,
}

impl BackendState {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp::from_millis(self.clock)
    }

    fn find(&self, id: &ConversationId) -> Option<&ServerConversation> {
        self.conversations.iter().find(|c| c.id == *id)
    }

    fn find_mut(&mut self, id: &ConversationId) -> Option<&mut ServerConversation> {
        self.conversations.iter_mut().find(|c| c.id == *id)
    }

    fn between(&self, a: &UserId, b: &UserId) -> Option<ConversationId> {
        self.conversations
            .iter()
            .find(|c| c.has_member(a) && c.has_member(b))
            .map(|c| c.id.clone())
    }

    fn ensure_conversation(&mut self, a: &UserId, b: &UserId) -> ConversationId {
        if let Some(id) = self.between(a, b) {
            return id;
        }
        let id = ConversationId::new(format!("conv-{}", uuid::Uuid::now_v7()));
        tracing::debug!(conversation_id = %id, "minted conversation");
        self.conversations.push(ServerConversation {
            id: id.clone(),
            members: [a.clone(), b.clone()],
            messages: Vec::new(),
            unread: HashMap::new(),
        });
        id
    }

    fn append(&mut self, conversation: &ConversationId, sender: &UserId, text: &str) -> Message {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        let created_at = self.tick();
        let message = Message {
            id,
            conversation_id: conversation.clone(),
            sender_id: sender.clone(),
            content: text.to_string(),
            created_at,
            origin: OriginSource::HistoryFetch,
        };
        if let Some(conv) = self.find_mut(conversation) {
            conv.messages.push(message.clone());
        }
        message
    }

    fn peer_profile(&self, id: &UserId) -> Peer {
        self.users
            .get(id)
            .cloned()
            .unwrap_or_else(|| Peer::new(id.as_str(), "", ""))
    }

    fn conversation_list(&self, user: &UserId) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.has_member(user))
            .filter_map(|c| {
                let last = c.messages.last()?;
                Some(Conversation {
                    id: c.id.clone(),
                    peer: self.peer_profile(c.other(user)),
                    last_message_preview: last.content.clone(),
                    last_message_at: last.created_at,
                    unread_count: c.unread.get(user).copied().unwrap_or(0),
                })
            })
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }

    fn publish(&mut self, user: &UserId, event: &PushEvent) {
        let Some(senders) = self.subscribers.get_mut(user) else {
            return;
        };
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user = %user, kind = event.kind(), "push buffer full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Shared handle to the simulated server. Cloning shares state.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    hold: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty backend whose clock starts at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Timestamp::now())
    }

    /// Create an empty backend whose clock starts at `start`.
    ///
    /// Every accepted message advances the clock by one millisecond.
    #[must_use]
    pub fn with_clock(start: Timestamp) -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(BackendState {
                users: BTreeMap::new(),
                conversations: Vec::new(),
                subscribers: HashMap::new(),
                next_message_id: 1,
                clock: start.as_millis(),
                failures: HashMap::new(),
                requests: HashMap::new(),
            })),
            hold: Arc::new(hold),
        }
    }

    /// Register a user account.
    pub fn add_user(&self, peer: Peer) {
        self.state.lock().users.insert(peer.id.clone(), peer);
    }

    /// A request/response client acting as `user`.
    #[must_use]
    pub fn client(&self, user: &UserId) -> BackendClient {
        BackendClient {
            backend: self.clone(),
            user: user.clone(),
        }
    }

    /// A push channel fed by this backend.
    #[must_use]
    pub fn push_channel(&self, buffer: usize) -> LoopbackPushChannel {
        LoopbackPushChannel::new(self.clone(), buffer)
    }

    /// Store a historic message from `from` to `to` without emitting events.
    pub fn insert_history(&self, from: &UserId, to: &UserId, text: &str) -> Message {
        let mut state = self.state.lock();
        let conversation = state.ensure_conversation(from, to);
        state.append(&conversation, from, text)
    }

    /// Store an exact message record without emitting events.
    ///
    /// The conversation must already exist (see [`conversation_between`](Self::conversation_between)
    /// and [`insert_history`](Self::insert_history)); returns `false` otherwise.
    pub fn insert_raw(&self, message: Message) -> bool {
        let mut state = self.state.lock();
        let Some(conv) = state.find_mut(&message.conversation_id) else {
            return false;
        };
        let pos = conv
            .messages
            .partition_point(|m| m.sort_key() <= message.sort_key());
        conv.messages.insert(pos, message);
        true
    }

    /// Id the next accepted message will get. Later ones count up from it.
    pub fn set_next_message_id(&self, next: i64) {
        self.state.lock().next_message_id = next;
    }

    /// Mint (or look up) the conversation between two users.
    pub fn conversation_between(&self, a: &UserId, b: &UserId) -> ConversationId {
        self.state.lock().ensure_conversation(a, b)
    }

    /// Deliver an arbitrary event to `user`'s subscribers.
    pub fn emit(&self, user: &UserId, event: &PushEvent) {
        self.state.lock().publish(user, event);
    }

    /// Drop every subscription of `user`, as if the server hung up.
    pub fn disconnect(&self, user: &UserId) {
        self.state.lock().subscribers.remove(user);
    }

    /// Make the next call of `op` fail with `error`. Calls queue up.
    pub fn fail_next(&self, op: Operation, error: ApiError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// How many times `op` has been called.
    #[must_use]
    pub fn request_count(&self, op: Operation) -> usize {
        self.state.lock().requests.get(&op).copied().unwrap_or(0)
    }

    /// Park fetch operations until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.hold.send_replace(true);
    }

    /// Let parked fetch operations complete.
    pub fn release_fetches(&self) {
        self.hold.send_replace(false);
    }

    /// Server-side unread counter of `user` in a conversation.
    #[must_use]
    pub fn server_unread(&self, conversation: &ConversationId, user: &UserId) -> u32 {
        self.state
            .lock()
            .find(conversation)
            .and_then(|c| c.unread.get(user).copied())
            .unwrap_or(0)
    }

    pub(crate) fn subscribe(&self, user: &UserId, tx: mpsc::Sender<PushEvent>) {
        self.state
            .lock()
            .subscribers
            .entry(user.clone())
            .or_default()
            .push(tx);
    }

    pub(crate) fn has_user(&self, user: &UserId) -> bool {
        self.state.lock().users.contains_key(user)
    }

    /// Count the call, wait out a hold, then consume an injected failure.
    async fn begin(&self, op: Operation) -> Result<(), ApiError> {
        {
            *self.state.lock().requests.entry(op).or_insert(0) += 1;
        }

        if op.is_fetch() {
            let mut rx = self.hold.subscribe();
            let released = rx.wait_for(|held| !*held).await.is_ok();
            if !released {
                return Err(ApiError::Network("backend shut down".into()));
            }
        }

        let injected = {
            self.state
                .lock()
                .failures
                .get_mut(&op)
                .and_then(VecDeque::pop_front)
        };
        match injected {
            Some(err) => {
                tracing::debug!(?op, error = %err, "injected backend failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// Per-user view of the [`InMemoryBackend`].
#[derive(Debug, Clone)]
pub struct BackendClient {
    backend: InMemoryBackend,
    user: UserId,
}

impl BackendClient {
    /// The user this client acts as.
    #[must_use]
    pub const fn user(&self) -> &UserId {
        &self.user
    }
}

impl HistoryFetcher for BackendClient {
    async fn fetch_conversation_list(&self) -> Result<Vec<Conversation>, ApiError> {
        self.backend.begin(Operation::ListConversations).await?;
        Ok(self.backend.state.lock().conversation_list(&self.user))
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, ApiError> {
        self.backend.begin(Operation::FetchMessages).await?;
        if page == 0 || page_size == 0 {
            return Err(ApiError::Rejected("page and page size start at 1".into()));
        }

        let state = self.backend.state.lock();
        let conv = state
            .find(conversation)
            .filter(|c| c.has_member(&self.user))
            .ok_or_else(|| ApiError::Rejected(format!("unknown conversation {conversation}")))?;

        let size = page_size as usize;
        let skip = (page as usize - 1).saturating_mul(size);
        let end = conv.messages.len().saturating_sub(skip);
        let start = end.saturating_sub(size);
        Ok(MessagePage {
            messages: conv.messages[start..end]
                .iter()
                .map(Message::to_wire)
                .collect(),
            page,
            has_more: start > 0,
        })
    }

    async fn search_peers(&self, query: &str) -> Result<Vec<Peer>, ApiError> {
        self.backend.begin(Operation::SearchPeers).await?;
        let needle = query.trim().to_lowercase();
        let state = self.backend.state.lock();
        Ok(state
            .users
            .values()
            .filter(|p| p.id != self.user)
            .filter(|p| {
                p.display_name().to_lowercase().contains(&needle)
                    || p.id.as_str().to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        self.backend.begin(Operation::MarkRead).await?;
        let mut state = self.backend.state.lock();
        let conv = state
            .find_mut(conversation)
            .filter(|c| c.has_member(&self.user))
            .ok_or_else(|| ApiError::Rejected(format!("unknown conversation {conversation}")))?;
        conv.unread.insert(self.user.clone(), 0);
        Ok(())
    }
}

impl MessageApi for BackendClient {
    async fn send_message(&self, target: &SendTarget, text: &str) -> Result<SentMessage, ApiError> {
        self.backend.begin(Operation::SendMessage).await?;
        if text.trim().is_empty() {
            return Err(ApiError::Rejected("empty message".into()));
        }

        let mut state = self.backend.state.lock();
        let conversation = match target {
            SendTarget::Conversation(id) => state
                .find(id)
                .filter(|c| c.has_member(&self.user))
                .map(|c| c.id.clone())
                .ok_or_else(|| ApiError::Rejected(format!("unknown conversation {id}")))?,
            SendTarget::Peer(peer) => {
                if *peer == self.user {
                    return Err(ApiError::Rejected("cannot message yourself".into()));
                }
                if !state.users.contains_key(peer) {
                    return Err(ApiError::Rejected(format!("unknown user {peer}")));
                }
                state.ensure_conversation(&self.user, peer)
            }
        };

        let message = state.append(&conversation, &self.user, text);
        let recipient = state
            .find(&conversation)
            .map(|c| c.other(&self.user).clone())
            .unwrap_or_else(|| self.user.clone());
        if let Some(conv) = state.find_mut(&conversation) {
            *conv.unread.entry(recipient.clone()).or_insert(0) += 1;
        }

        let wire = message.to_wire();
        state.publish(
            &self.user,
            &PushEvent::MessageSendConfirmed {
                conversation_id: conversation.clone(),
                message: wire.clone(),
            },
        );
        state.publish(
            &recipient,
            &PushEvent::MessageReceived {
                conversation_id: conversation.clone(),
                message: wire.clone(),
            },
        );
        tracing::debug!(
            conversation_id = %conversation,
            message_id = %message.id,
            "message accepted"
        );

        Ok(SentMessage {
            conversation_id: conversation,
            message: wire,
        })
    }
}
