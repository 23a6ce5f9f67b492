//! Display-ready snapshots of the directory and message log.

use std::fmt::Write as _;

use chrono::{Local, TimeZone};

use dmsync_proto::message::{Message, MessageId, Timestamp, UserId};

use crate::directory::DirectoryEntry;

/// Shown when a timestamp cannot be rendered.
const UNKNOWN_TIME: &str = "??:??";

/// One rendered message bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Message id.
    pub id: MessageId,
    /// Sender id.
    pub sender: UserId,
    /// Message text.
    pub content: String,
    /// `created_at` rendered with the configured format.
    pub time: String,
    /// Whether the local user sent it.
    pub is_own: bool,
}

impl MessageView {
    /// Render `message` for the user `self_id`.
    #[must_use]
    pub fn new(message: &Message, self_id: &UserId, time_format: &str) -> Self {
        Self {
            id: message.id,
            sender: message.sender_id.clone(),
            content: message.content.clone(),
            time: format_timestamp(message.created_at, time_format),
            is_own: message.sender_id == *self_id,
        }
    }
}

/// Render a whole log.
#[must_use]
pub fn message_views(messages: &[Message], self_id: &UserId, time_format: &str) -> Vec<MessageView> {
    messages
        .iter()
        .map(|m| MessageView::new(m, self_id, time_format))
        .collect()
}

/// One rendered directory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    /// Peer display name.
    pub title: String,
    /// Preview text; empty for prospective contacts.
    pub subtitle: String,
    /// Last activity time; empty for prospective contacts.
    pub time: String,
    /// Unread badge; zero for prospective contacts.
    pub unread: u32,
    /// Whether this row starts a new conversation.
    pub prospective: bool,
}

impl DirectoryRow {
    /// Render a directory entry.
    #[must_use]
    pub fn new(entry: &DirectoryEntry, time_format: &str) -> Self {
        match entry {
            DirectoryEntry::Conversation {
                peer,
                preview,
                last_message_at,
                unread_count,
                ..
            } => Self {
                title: peer.display_name(),
                subtitle: preview.clone(),
                time: format_timestamp(*last_message_at, time_format),
                unread: *unread_count,
                prospective: false,
            },
            DirectoryEntry::ProspectiveContact { peer, .. } => Self {
                title: peer.display_name(),
                subtitle: String::new(),
                time: String::new(),
                unread: 0,
                prospective: true,
            },
        }
    }
}

/// Format a timestamp in local time.
///
/// Falls back to `??:??` for out-of-range timestamps and format strings
/// chrono cannot render.
#[must_use]
pub fn format_timestamp(ts: Timestamp, format: &str) -> String {
    let ms = ts.as_millis();
    let Ok(secs) = i64::try_from(ms / 1000) else {
        return UNKNOWN_TIME.to_string();
    };
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => {
            let mut out = String::new();
            if write!(out, "{}", dt.format(format)).is_err() {
                return UNKNOWN_TIME.to_string();
            }
            out
        }
        _ => UNKNOWN_TIME.to_string(),
    }
}
