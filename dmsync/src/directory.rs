//! Conversation directory with recency ordering and search merge.
//!
//! Holds the server's conversation list, kept sorted by most recent
//! message, and an optional set of peer search results. [`entries`]
//! merges both into one list: real conversations first, then every
//! searched peer that has no conversation yet as a
//! [`DirectoryEntry::ProspectiveContact`]. Deduplication is by peer id,
//! never by name.
//!
//! Unread counters live here. They only go up for messages from the other
//! side in conversations that are not active, and only go back to zero when
//! a conversation becomes active.
//!
//! [`entries`]: ConversationDirectory::entries

use std::collections::{HashMap, HashSet};

use dmsync_proto::conversation::{Conversation, Peer};
use dmsync_proto::message::{ConversationId, Message, Timestamp, UserId};

/// One row of the merged directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEntry {
    /// An existing conversation.
    Conversation {
        /// Conversation identifier.
        conversation_id: ConversationId,
        /// The other participant.
        peer: Peer,
        /// Text of the most recent message.
        preview: String,
        /// When the most recent message was created.
        last_message_at: Timestamp,
        /// Messages received while the conversation was not active.
        unread_count: u32,
    },
    /// A searched peer we have no conversation with.
    ProspectiveContact {
        /// The peer's user id.
        peer_id: UserId,
        /// The peer's profile.
        peer: Peer,
    },
}

impl DirectoryEntry {
    /// The peer this row is about.
    #[must_use]
    pub const fn peer(&self) -> &Peer {
        match self {
            Self::Conversation { peer, .. } | Self::ProspectiveContact { peer, .. } => peer,
        }
    }

    /// Whether this row is a prospective contact.
    #[must_use]
    pub const fn is_prospective(&self) -> bool {
        matches!(self, Self::ProspectiveContact { .. })
    }
}

/// Effect of [`ConversationDirectory::apply_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryUpdate {
    /// The conversation's preview and position were updated.
    Updated {
        /// Whether its unread counter went up.
        unread_incremented: bool,
    },
    /// The directory has no entry for the message's conversation.
    UnknownConversation,
}

/// An active peer search.
#[derive(Debug, Clone)]
struct SearchResults {
    query: String,
    peers: Vec<Peer>,
}

/// Ordered conversation list plus transient search results.
#[derive(Debug, Clone)]
pub struct ConversationDirectory {
    self_id: UserId,
    /// Sorted descending by `last_message_at`, ties by id.
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    search: Option<SearchResults>,
}

impl ConversationDirectory {
    /// Create an empty directory for the user `self_id`.
    #[must_use]
    pub const fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            conversations: Vec::new(),
            active: None,
            search: None,
        }
    }

    /// Merge a freshly fetched conversation list into the directory.
    ///
    /// The server decides which conversations exist. For a row we already
    /// hold, the local unread count is kept, since the server's count lags
    /// behind messages read while the conversation was active. The local
    /// preview and timestamp are also kept unless the server has seen a
    /// newer message, in which case the server row wins whole: it knows
    /// about messages that never reached us live. The active conversation
    /// always ends at zero unread.
    pub fn merge_fetched(&mut self, list: Vec<Conversation>) {
        let mut known: HashMap<ConversationId, Conversation> = self
            .conversations
            .drain(..)
            .map(|c| (c.id.clone(), c))
            .collect();

        self.conversations = list
            .into_iter()
            .map(|mut fetched| {
                if let Some(local) = known.remove(&fetched.id)
                    && local.last_message_at >= fetched.last_message_at
                {
                    fetched.last_message_preview = local.last_message_preview;
                    fetched.last_message_at = local.last_message_at;
                    fetched.unread_count = local.unread_count;
                }
                fetched
            })
            .collect();

        if let Some(active) = &self.active
            && let Some(conv) = self.conversations.iter_mut().find(|c| c.id == *active)
        {
            conv.unread_count = 0;
        }
        self.sort();
    }

    /// Fold a new or confirmed message into its conversation's row.
    ///
    /// Preview and timestamp only move forward: an older message (say, a
    /// late redelivery) leaves them alone. The list is re-sorted either way.
    pub fn apply_message(&mut self, message: &Message) -> DirectoryUpdate {
        let is_active = self.active.as_ref() == Some(&message.conversation_id);
        let from_self = message.sender_id == self.self_id;
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return DirectoryUpdate::UnknownConversation;
        };

        if message.created_at >= conv.last_message_at {
            conv.last_message_preview.clone_from(&message.content);
            conv.last_message_at = message.created_at;
        }
        let unread_incremented = !from_self && !is_active;
        if unread_incremented {
            conv.unread_count = conv.unread_count.saturating_add(1);
        }
        self.sort();
        DirectoryUpdate::Updated { unread_incremented }
    }

    /// Make `conversation` the active one and reset its unread counter.
    ///
    /// Returns `true` if the counter was non-zero.
    pub fn set_active(&mut self, conversation: Option<ConversationId>) -> bool {
        let mut had_unread = false;
        if let Some(id) = &conversation
            && let Some(conv) = self.conversations.iter_mut().find(|c| c.id == *id)
        {
            had_unread = conv.unread_count > 0;
            conv.unread_count = 0;
        }
        self.active = conversation;
        had_unread
    }

    /// Install peer search results for `query`.
    pub fn set_search(&mut self, query: impl Into<String>, peers: Vec<Peer>) {
        self.search = Some(SearchResults {
            query: query.into(),
            peers,
        });
    }

    /// Drop the search results.
    pub fn clear_search(&mut self) {
        self.search = None;
    }

    /// The query whose results are shown, if any.
    #[must_use]
    pub fn search_query(&self) -> Option<&str> {
        self.search.as_ref().map(|s| s.query.as_str())
    }

    /// The merged, ordered view.
    #[must_use]
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        let mut entries: Vec<DirectoryEntry> = self
            .conversations
            .iter()
            .map(|c| DirectoryEntry::Conversation {
                conversation_id: c.id.clone(),
                peer: c.peer.clone(),
                preview: c.last_message_preview.clone(),
                last_message_at: c.last_message_at,
                unread_count: c.unread_count,
            })
            .collect();

        if let Some(search) = &self.search {
            let mut seen: HashSet<&UserId> = self.conversations.iter().map(|c| &c.peer.id).collect();
            seen.insert(&self.self_id);
            for peer in &search.peers {
                if seen.insert(&peer.id) {
                    entries.push(DirectoryEntry::ProspectiveContact {
                        peer_id: peer.id.clone(),
                        peer: peer.clone(),
                    });
                }
            }
        }
        entries
    }

    /// The conversation with `peer`, if one is known.
    #[must_use]
    pub fn conversation_for_peer(&self, peer: &UserId) -> Option<&ConversationId> {
        self.conversations
            .iter()
            .find(|c| c.peer.id == *peer)
            .map(|c| &c.id)
    }

    /// A peer from the current search results.
    #[must_use]
    pub fn searched_peer(&self, peer: &UserId) -> Option<&Peer> {
        self.search
            .as_ref()
            .and_then(|s| s.peers.iter().find(|p| p.id == *peer))
    }

    /// A conversation's row.
    #[must_use]
    pub fn get(&self, conversation: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == *conversation)
    }

    /// Sum of all unread counters.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.unread_count))
    }

    /// Number of conversations.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    fn sort(&mut self) {
        self.conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
