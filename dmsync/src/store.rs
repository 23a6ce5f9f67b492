//! Per-conversation ordered, deduplicated message logs.
//!
//! The store is pure in-memory state with no error paths: callers validate
//! collaborator payloads (see [`Message::from_wire`]) before handing them
//! over. Every operation leaves each log sorted ascending by
//! [`Message::sort_key`] with no two entries sharing an id.

use std::collections::{HashMap, HashSet};

use dmsync_proto::message::{ConversationId, Message, MessageId, OriginSource};

/// How a fetched batch is combined with a conversation's existing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// An older page obtained by backfilling; goes before the current head.
    PrependOlder,
    /// The first page; unioned with whatever live events already arrived.
    AppendInitial,
}

/// Result of [`MessageStore::insert_live`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveInsert {
    /// The message was new and has been inserted.
    Inserted,
    /// A message with the same id is already present; nothing changed.
    Duplicate,
    /// The message was inserted and superseded a provisional entry.
    Replaced {
        /// Id of the provisional entry that was removed.
        provisional: MessageId,
    },
}

impl LiveInsert {
    /// Whether the log changed.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// One conversation's log plus its id index.
#[derive(Debug, Default, Clone)]
struct ConversationLog {
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl ConversationLog {
    fn insert_sorted(&mut self, message: Message) {
        let key = message.sort_key();
        let pos = self.entries.partition_point(|m| m.sort_key() <= key);
        self.ids.insert(message.id);
        self.entries.insert(pos, message);
    }

    fn remove(&mut self, id: MessageId) -> Option<Message> {
        let pos = self.entries.iter().position(|m| m.id == id)?;
        self.ids.remove(&id);
        Some(self.entries.remove(pos))
    }

    /// Drops entries already present, and repeats within the batch itself.
    fn filter_new(&self, batch: Vec<Message>) -> Vec<Message> {
        let mut seen = HashSet::with_capacity(batch.len());
        batch
            .into_iter()
            .filter(|m| !self.ids.contains(&m.id) && seen.insert(m.id))
            .collect()
    }
}

/// Holds one log per conversation.
///
/// Logs are independent of each other: an operation on one conversation
/// never reads or touches another's.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    logs: HashMap<ConversationId, ConversationLog>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: HashMap::new(),
        }
    }

    /// Merge a fetched page into a conversation's log.
    ///
    /// Entries whose id is already present are skipped, so repeating a
    /// merge with the same batch is a no-op. For [`MergeMode::PrependOlder`]
    /// the batch is expected to be ascending and older than the current
    /// head and is placed in front of it as received; if that assumption
    /// does not hold (the server's pages shifted under new messages) the
    /// combined log is re-sorted. [`MergeMode::AppendInitial`] is a union
    /// with any entries that arrived live before the fetch completed.
    ///
    /// Returns the number of entries added.
    pub fn merge_batch(
        &mut self,
        conversation: &ConversationId,
        batch: Vec<Message>,
        mode: MergeMode,
    ) -> usize {
        let log = self.logs.entry(conversation.clone()).or_default();
        let fresh = log.filter_new(batch);
        let inserted = fresh.len();
        if inserted == 0 {
            return 0;
        }

        log.ids.extend(fresh.iter().map(|m| m.id));
        match mode {
            MergeMode::PrependOlder => {
                let mut combined = fresh;
                combined.append(&mut log.entries);
                log.entries = combined;
            }
            MergeMode::AppendInitial => log.entries.extend(fresh),
        }
        if !log.entries.is_sorted_by_key(Message::sort_key) {
            log.entries.sort_by(Message::chronological);
        }

        tracing::trace!(
            conversation_id = %conversation,
            inserted,
            ?mode,
            "merged batch"
        );
        inserted
    }

    /// Insert one message delivered live.
    ///
    /// Idempotent by id. A message confirming our own send supersedes the
    /// oldest provisional entry from the same sender with the same content,
    /// so one logical send never shows up twice.
    pub fn insert_live(&mut self, message: Message) -> LiveInsert {
        let log = self.logs.entry(message.conversation_id.clone()).or_default();
        if log.ids.contains(&message.id) {
            tracing::debug!(message_id = %message.id, "duplicate live message dropped");
            return LiveInsert::Duplicate;
        }

        let superseded = if message.origin == OriginSource::PushSendConfirmed {
            log.entries
                .iter()
                .find(|m| {
                    m.id.is_provisional()
                        && m.sender_id == message.sender_id
                        && m.content == message.content
                })
                .map(|m| m.id)
        } else {
            None
        };
        if let Some(id) = superseded {
            log.remove(id);
        }

        log.insert_sorted(message);
        match superseded {
            Some(provisional) => LiveInsert::Replaced { provisional },
            None => LiveInsert::Inserted,
        }
    }

    /// The ordered log of a conversation (empty if unknown).
    #[must_use]
    pub fn messages(&self, conversation: &ConversationId) -> &[Message] {
        self.logs
            .get(conversation)
            .map_or(&[], |log| log.entries.as_slice())
    }

    /// Number of entries in a conversation's log.
    #[must_use]
    pub fn len(&self, conversation: &ConversationId) -> usize {
        self.messages(conversation).len()
    }
}
