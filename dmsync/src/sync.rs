//! Sync controller: the single owner of the message store and directory.
//!
//! Drives initial loads and backfill through a [`HistoryFetcher`], routes
//! push events into the [`MessageStore`], and keeps the
//! [`ConversationDirectory`] current. Callers only get snapshots; every
//! mutation goes through a controller method.
//!
//! # Per-conversation state machine
//!
//! ```text
//! Initial ──load──▶ LoadingInitial ──ok──▶ Ready ◀──ok/err── LoadingMore
//!    ▲                    │                  │                    ▲
//!    └────────err─────────┘                  └───near top─────────┘
//! ```
//!
//! Live events are written into the store in every state. At most one
//! fetch is outstanding per conversation: a trigger that finds the
//! conversation loading is ignored, and `page + 1` is only requested after
//! `page` has been merged. A failed fetch puts the state machine back where
//! it was and leaves the cursor alone.
//!
//! # Locking
//!
//! State sits behind one `parking_lot::Mutex` that is never held across an
//! `.await`: each operation locks, decides, unlocks, awaits the network,
//! then locks again to apply the result.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use dmsync_proto::conversation::{Conversation, Peer};
use dmsync_proto::event::PushEvent;
use dmsync_proto::message::{ConversationId, Message, OriginSource, UserId, WireMessage};

use crate::api::{ApiError, HistoryFetcher, SentMessage};
use crate::directory::{ConversationDirectory, DirectoryEntry, DirectoryUpdate};
use crate::store::{LiveInsert, MergeMode, MessageStore};

/// Errors surfaced by the controller.
///
/// Internal state is unchanged when one is returned, so the same call can
/// simply be retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A collaborator request failed.
    #[error("fetch failed: {0}")]
    Network(#[from] ApiError),

    /// The peer is neither in the directory nor in the search results.
    #[error("unknown peer {0}")]
    UnknownPeer(UserId),
}

impl SyncError {
    /// Whether retrying may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(err) => err.is_retryable(),
            Self::UnknownPeer(_) => false,
        }
    }
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages per history page.
    pub page_size: u32,
    /// A scroll offset at or below this many pixels counts as near the top.
    pub near_top_threshold_px: f64,
    /// Capacity of the notification broadcast channel.
    pub notification_buffer: usize,
    /// Shorter search queries clear the search instead.
    pub min_search_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            near_top_threshold_px: 80.0,
            notification_buffer: 64,
            min_search_len: 2,
        }
    }
}

/// Change notifications for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    /// The directory's entries changed (order, previews, unread, search).
    DirectoryChanged,
    /// A conversation's message log changed.
    MessagesChanged {
        /// The affected conversation.
        conversation_id: ConversationId,
    },
    /// A message arrived for a conversation the directory does not know.
    DirectoryStale {
        /// The unknown conversation.
        conversation_id: ConversationId,
    },
    /// A backfill completed.
    BackfillFinished {
        /// The backfilled conversation.
        conversation_id: ConversationId,
        /// Number of messages added.
        inserted: usize,
    },
    /// An initial load or backfill failed.
    LoadFailed {
        /// The conversation that failed to load.
        conversation_id: ConversationId,
        /// What went wrong.
        error: SyncError,
    },
}

/// Load state of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing fetched yet.
    Initial,
    /// Page 1 is being fetched.
    LoadingInitial,
    /// At least page 1 is merged.
    Ready,
    /// An older page is being fetched.
    LoadingMore,
}

/// Pagination position of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Last page merged (0 before the initial load).
    pub page: u32,
    /// Page size used for every request of this conversation.
    pub page_size: u32,
    /// Whether the server reported older pages.
    pub has_more: bool,
}

#[derive(Debug, Clone)]
struct ConversationSync {
    phase: SyncPhase,
    cursor: PaginationCursor,
}

impl ConversationSync {
    const fn new(page_size: u32) -> Self {
        Self {
            phase: SyncPhase::Initial,
            cursor: PaginationCursor {
                page: 0,
                page_size,
                has_more: true,
            },
        }
    }
}

/// What the user has open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Nothing selected.
    #[default]
    None,
    /// An existing conversation.
    Conversation(ConversationId),
    /// A draft with a peer that has no conversation yet.
    Draft(Peer),
}

impl Selection {
    /// The selected conversation, if it exists server-side.
    #[must_use]
    pub const fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::Conversation(id) => Some(id),
            Self::None | Self::Draft(_) => None,
        }
    }
}

/// Scroll geometry reported by the message list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Distance in pixels from the top of the content.
    pub scroll_top: f64,
    /// Total height of the rendered content.
    pub content_height: f64,
}

/// Scroll position captured when a backfill starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollAnchor {
    /// Conversation the anchor belongs to.
    pub conversation_id: ConversationId,
    /// Scroll offset when the backfill was triggered.
    pub scroll_top: f64,
    /// Content height when the backfill was triggered.
    pub content_height: f64,
}

impl ScrollAnchor {
    /// Scroll offset that keeps the same message under the viewport after
    /// older content grew the list to `new_content_height`.
    #[must_use]
    pub fn restore(&self, new_content_height: f64) -> f64 {
        (self.scroll_top + (new_content_height - self.content_height)).max(0.0)
    }
}

/// Why a backfill trigger did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No conversation is active.
    NoActiveConversation,
    /// The viewport is not close enough to the top.
    NotNearTop,
    /// The initial page has not been merged yet.
    NotLoaded,
    /// A backfill for this conversation is already outstanding.
    AlreadyLoading,
    /// The server reported no older pages.
    NoMoreHistory,
}

/// Result of [`SyncController::on_scroll_near_top`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    /// No fetch was issued.
    Ignored(IgnoreReason),
    /// An older page was fetched and merged.
    Merged {
        /// The backfilled conversation.
        conversation_id: ConversationId,
        /// Messages added.
        inserted: usize,
        /// Present if the conversation is still active; apply
        /// [`ScrollAnchor::restore`] after re-rendering.
        anchor: Option<ScrollAnchor>,
    },
}

/// Result of routing one live message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Stored and reflected in the directory.
    Applied {
        /// Conversation the message went to.
        conversation_id: ConversationId,
        /// Whether the unread counter went up.
        unread_incremented: bool,
    },
    /// Stored, but the directory has no such conversation and must be
    /// refetched.
    NeedsDirectoryRefresh {
        /// The unknown conversation.
        conversation_id: ConversationId,
    },
    /// Already present; nothing changed.
    Duplicate,
    /// Not applicable to this session (a send confirmation for another user).
    Ignored,
    /// The payload was malformed and was dropped.
    Dropped,
}

/// Outcome of selecting a prospective contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProspectResolution {
    /// The peer turned out to have a conversation already; it is now selected.
    ExistingConversation(ConversationId),
    /// A draft with the peer is open; the first send creates the conversation.
    Draft(Peer),
}

#[derive(Debug)]
struct SyncState {
    store: MessageStore,
    directory: ConversationDirectory,
    conversations: HashMap<ConversationId, ConversationSync>,
    selection: Selection,
    anchor: Option<ScrollAnchor>,
    search_generation: u64,
}

impl SyncState {
    fn sync_mut(&mut self, conversation: &ConversationId, page_size: u32) -> &mut ConversationSync {
        self.conversations
            .entry(conversation.clone())
            .or_insert_with(|| ConversationSync::new(page_size))
    }
}

/// Orchestrates fetches and push events into the store and directory.
pub struct SyncController<F> {
    fetcher: F,
    self_id: UserId,
    config: SyncConfig,
    state: Mutex<SyncState>,
    notify: broadcast::Sender<SyncNotification>,
}

impl<F: HistoryFetcher> SyncController<F> {
    /// Create a controller for the user `self_id`.
    pub fn new(fetcher: F, self_id: UserId, config: SyncConfig) -> Self {
        let (notify, _) = broadcast::channel(config.notification_buffer.max(1));
        Self {
            fetcher,
            state: Mutex::new(SyncState {
                store: MessageStore::new(),
                directory: ConversationDirectory::new(self_id.clone()),
                conversations: HashMap::new(),
                selection: Selection::None,
                anchor: None,
                search_generation: 0,
            }),
            self_id,
            config,
            notify,
        }
    }

    /// The local user.
    #[must_use]
    pub const fn self_id(&self) -> &UserId {
        &self.self_id
    }

    /// The controller's configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receive change notifications from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notify.subscribe()
    }

    fn emit(&self, notification: SyncNotification) {
        // No receivers is fine.
        let _ = self.notify.send(notification);
    }

    // --- Directory ---

    /// Refetch the conversation list.
    ///
    /// If a draft is open and the peer now has a conversation, returns
    /// that conversation's id; the caller should select it.
    ///
    /// # Errors
    ///
    /// [`SyncError::Network`] if the fetch fails; the directory is unchanged.
    pub async fn refresh_directory(&self) -> Result<Option<ConversationId>, SyncError> {
        let list = self.fetcher.fetch_conversation_list().await.map_err(|e| {
            tracing::warn!(error = %e, "directory fetch failed");
            SyncError::from(e)
        })?;

        let (count, resolved) = {
            let mut state = self.state.lock();
            state.directory.merge_fetched(list);
            let resolved = match &state.selection {
                Selection::Draft(peer) => state.directory.conversation_for_peer(&peer.id).cloned(),
                Selection::None | Selection::Conversation(_) => None,
            };
            (state.directory.conversation_count(), resolved)
        };

        tracing::info!(conversations = count, "directory refreshed");
        if let Some(id) = &resolved {
            tracing::debug!(conversation_id = %id, "draft peer now has a conversation");
        }
        self.emit(SyncNotification::DirectoryChanged);
        Ok(resolved)
    }

    /// Run a peer search and merge the results into the directory.
    ///
    /// Queries shorter than the configured minimum clear the search.
    /// Results of a search that was superseded by a newer call are
    /// discarded.
    ///
    /// # Errors
    ///
    /// [`SyncError::Network`] if the search fails; current results stay.
    pub async fn search(&self, query: &str) -> Result<(), SyncError> {
        let query = query.trim();
        if query.chars().count() < self.config.min_search_len {
            self.clear_search();
            return Ok(());
        }

        let generation = {
            let mut state = self.state.lock();
            state.search_generation += 1;
            state.search_generation
        };

        let peers = self.fetcher.search_peers(query).await.map_err(|e| {
            tracing::warn!(query, error = %e, "peer search failed");
            SyncError::from(e)
        })?;

        {
            let mut state = self.state.lock();
            if state.search_generation != generation {
                tracing::debug!(query, "stale search result discarded");
                return Ok(());
            }
            state.directory.set_search(query, peers);
        }
        self.emit(SyncNotification::DirectoryChanged);
        Ok(())
    }

    /// Drop search results.
    pub fn clear_search(&self) {
        let changed = {
            let mut state = self.state.lock();
            state.search_generation += 1;
            let changed = state.directory.search_query().is_some();
            state.directory.clear_search();
            changed
        };
        if changed {
            self.emit(SyncNotification::DirectoryChanged);
        }
    }

    // --- Selection and loading ---

    /// Make `conversation` the active one.
    ///
    /// Resets the scroll anchor and the unread counter, tells the server
    /// (best-effort), and loads page 1 if nothing was loaded yet. The logs
    /// of other conversations are kept, and their outstanding backfills
    /// still complete.
    ///
    /// # Errors
    ///
    /// [`SyncError::Network`] if the initial load fails. The conversation
    /// stays selected and a later call retries the load.
    pub async fn select_conversation(&self, conversation: &ConversationId) -> Result<(), SyncError> {
        let needs_load = {
            let mut state = self.state.lock();
            state.anchor = None;
            state.selection = Selection::Conversation(conversation.clone());
            state.directory.set_active(Some(conversation.clone()));
            state.sync_mut(conversation, self.config.page_size).phase == SyncPhase::Initial
        };
        tracing::debug!(conversation_id = %conversation, "conversation selected");
        self.emit(SyncNotification::DirectoryChanged);

        if let Err(e) = self.fetcher.mark_read(conversation).await {
            tracing::warn!(conversation_id = %conversation, error = %e, "mark read failed");
        }

        if needs_load {
            self.load_initial(conversation).await?;
        }
        Ok(())
    }

    /// Fetch and merge page 1 of a conversation.
    ///
    /// Does nothing unless the conversation is in [`SyncPhase::Initial`].
    /// Live messages that arrive while the fetch is outstanding are kept;
    /// the page is merged as a union with them. Returns the number of
    /// messages added.
    ///
    /// # Errors
    ///
    /// [`SyncError::Network`] if the fetch fails; the conversation goes
    /// back to [`SyncPhase::Initial`].
    pub async fn load_initial(&self, conversation: &ConversationId) -> Result<usize, SyncError> {
        let page_size = {
            let mut state = self.state.lock();
            let sync = state.sync_mut(conversation, self.config.page_size);
            if sync.phase != SyncPhase::Initial {
                tracing::debug!(conversation_id = %conversation, phase = ?sync.phase, "initial load skipped");
                return Ok(0);
            }
            sync.phase = SyncPhase::LoadingInitial;
            sync.cursor.page_size
        };

        let page = match self.fetcher.fetch_messages(conversation, 1, page_size).await {
            Ok(page) => page,
            Err(e) => {
                self.state.lock().sync_mut(conversation, page_size).phase = SyncPhase::Initial;
                return Err(self.load_failed(conversation, e));
            }
        };

        let batch = decode_batch(conversation, page.messages, OriginSource::HistoryFetch);
        let inserted = {
            let mut state = self.state.lock();
            let inserted = state
                .store
                .merge_batch(conversation, batch, MergeMode::AppendInitial);
            let sync = state.sync_mut(conversation, page_size);
            sync.phase = SyncPhase::Ready;
            sync.cursor.page = 1;
            sync.cursor.has_more = page.has_more;
            inserted
        };

        tracing::info!(conversation_id = %conversation, inserted, has_more = page.has_more, "initial page loaded");
        self.emit(SyncNotification::MessagesChanged {
            conversation_id: conversation.clone(),
        });
        Ok(inserted)
    }

    /// Backfill trigger from the message list.
    ///
    /// Fetches the next older page of the active conversation when the
    /// viewport is near the top, the conversation is [`SyncPhase::Ready`]
    /// and the server has more. Anything else is ignored, including
    /// triggers while a backfill is already outstanding.
    ///
    /// # Errors
    ///
    /// [`SyncError::Network`] if the fetch fails; the conversation goes
    /// back to [`SyncPhase::Ready`] with its cursor untouched.
    pub async fn on_scroll_near_top(&self, viewport: Viewport) -> Result<BackfillOutcome, SyncError> {
        let (conversation, next_page, page_size) = {
            let mut state = self.state.lock();
            let Some(conversation) = state.selection.conversation_id().cloned() else {
                return Ok(BackfillOutcome::Ignored(IgnoreReason::NoActiveConversation));
            };
            if viewport.scroll_top > self.config.near_top_threshold_px {
                return Ok(BackfillOutcome::Ignored(IgnoreReason::NotNearTop));
            }

            let sync = state.sync_mut(&conversation, self.config.page_size);
            let reason = match sync.phase {
                SyncPhase::Initial | SyncPhase::LoadingInitial => Some(IgnoreReason::NotLoaded),
                SyncPhase::LoadingMore => Some(IgnoreReason::AlreadyLoading),
                SyncPhase::Ready if !sync.cursor.has_more => Some(IgnoreReason::NoMoreHistory),
                SyncPhase::Ready => None,
            };
            if let Some(reason) = reason {
                tracing::debug!(conversation_id = %conversation, ?reason, "backfill trigger ignored");
                return Ok(BackfillOutcome::Ignored(reason));
            }

            sync.phase = SyncPhase::LoadingMore;
            let next_page = sync.cursor.page + 1;
            let page_size = sync.cursor.page_size;
            state.anchor = Some(ScrollAnchor {
                conversation_id: conversation.clone(),
                scroll_top: viewport.scroll_top,
                content_height: viewport.content_height,
            });
            (conversation, next_page, page_size)
        };

        tracing::debug!(conversation_id = %conversation, page = next_page, "backfill started");
        let page = match self
            .fetcher
            .fetch_messages(&conversation, next_page, page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.sync_mut(&conversation, page_size).phase = SyncPhase::Ready;
                    if state
                        .anchor
                        .as_ref()
                        .is_some_and(|a| a.conversation_id == conversation)
                    {
                        state.anchor = None;
                    }
                }
                return Err(self.load_failed(&conversation, e));
            }
        };

        let batch = decode_batch(&conversation, page.messages, OriginSource::HistoryFetch);
        let (inserted, anchor) = {
            let mut state = self.state.lock();
            let inserted = state
                .store
                .merge_batch(&conversation, batch, MergeMode::PrependOlder);
            let sync = state.sync_mut(&conversation, page_size);
            sync.phase = SyncPhase::Ready;
            sync.cursor.page = next_page;
            sync.cursor.has_more = page.has_more;

            let still_active = state.selection.conversation_id() == Some(&conversation);
            let anchor = if still_active
                && state
                    .anchor
                    .as_ref()
                    .is_some_and(|a| a.conversation_id == conversation)
            {
                state.anchor.take()
            } else {
                None
            };
            (inserted, anchor)
        };

        tracing::info!(
            conversation_id = %conversation,
            page = next_page,
            inserted,
            has_more = page.has_more,
            "backfill merged"
        );
        self.emit(SyncNotification::BackfillFinished {
            conversation_id: conversation.clone(),
            inserted,
        });
        if inserted > 0 {
            self.emit(SyncNotification::MessagesChanged {
                conversation_id: conversation.clone(),
            });
        }
        Ok(BackfillOutcome::Merged {
            conversation_id: conversation,
            inserted,
            anchor,
        })
    }

    /// Open a searched peer.
    ///
    /// Resolves to the existing conversation if there is one, checking the
    /// local directory first and then a fresh copy from the server. A
    /// failed refresh is logged and treated as "no conversation". Otherwise
    /// a draft is opened.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownPeer`] if the peer is in neither the
    ///   directory nor the search results.
    /// - [`SyncError::Network`] if the peer resolved to an existing
    ///   conversation whose initial load failed.
    pub async fn select_prospective_contact(
        &self,
        peer_id: &UserId,
    ) -> Result<ProspectResolution, SyncError> {
        let (existing, searched) = {
            let state = self.state.lock();
            (
                state.directory.conversation_for_peer(peer_id).cloned(),
                state.directory.searched_peer(peer_id).cloned(),
            )
        };

        let existing = match existing {
            Some(id) => Some(id),
            None => {
                if let Err(e) = self.refresh_directory().await {
                    tracing::warn!(peer = %peer_id, error = %e, "directory recheck failed, opening draft");
                }
                self.state
                    .lock()
                    .directory
                    .conversation_for_peer(peer_id)
                    .cloned()
            }
        };

        if let Some(id) = existing {
            tracing::debug!(peer = %peer_id, conversation_id = %id, "prospective contact already has a conversation");
            self.select_conversation(&id).await?;
            return Ok(ProspectResolution::ExistingConversation(id));
        }

        let peer = searched.ok_or_else(|| SyncError::UnknownPeer(peer_id.clone()))?;
        {
            let mut state = self.state.lock();
            state.anchor = None;
            state.selection = Selection::Draft(peer.clone());
            state.directory.set_active(None);
        }
        tracing::debug!(peer = %peer_id, "draft opened");
        self.emit(SyncNotification::DirectoryChanged);
        Ok(ProspectResolution::Draft(peer))
    }

    // --- Live events ---

    /// Route one push event.
    ///
    /// Never awaits. The message is written into the store even when its
    /// conversation is unknown to the directory; the outcome then asks the
    /// caller for a directory refresh.
    pub fn handle_push_event(&self, event: PushEvent) -> RouteOutcome {
        let kind = event.kind();
        let (conversation_id, wire, origin) = match event {
            PushEvent::MessageReceived {
                conversation_id,
                message,
            } => (conversation_id, message, OriginSource::PushReceived),
            PushEvent::MessageSendConfirmed {
                conversation_id,
                message,
            } => (conversation_id, message, OriginSource::PushSendConfirmed),
        };

        let message = match Message::from_wire(wire, origin) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(kind, conversation_id = %conversation_id, error = %e, "malformed message dropped");
                return RouteOutcome::Dropped;
            }
        };
        if message.conversation_id != conversation_id {
            tracing::warn!(
                kind,
                conversation_id = %conversation_id,
                message_conversation = %message.conversation_id,
                "event and message disagree on conversation, dropped"
            );
            return RouteOutcome::Dropped;
        }
        if origin == OriginSource::PushSendConfirmed && message.sender_id != self.self_id {
            tracing::debug!(message_id = %message.id, "send confirmation for another sender ignored");
            return RouteOutcome::Ignored;
        }

        self.apply_live(message)
    }

    /// Route the response of a successful send through the confirmation
    /// path, so a later push confirmation of the same message is a no-op.
    pub fn apply_send_confirmed(&self, sent: SentMessage) -> RouteOutcome {
        self.handle_push_event(PushEvent::MessageSendConfirmed {
            conversation_id: sent.conversation_id,
            message: sent.message,
        })
    }

    fn apply_live(&self, message: Message) -> RouteOutcome {
        let conversation_id = message.conversation_id.clone();
        let message_id = message.id;
        let update = {
            let mut state = self.state.lock();
            let insert = state.store.insert_live(message.clone());
            if insert == LiveInsert::Duplicate {
                None
            } else {
                Some(state.directory.apply_message(&message))
            }
        };

        let Some(update) = update else {
            return RouteOutcome::Duplicate;
        };
        self.emit(SyncNotification::MessagesChanged {
            conversation_id: conversation_id.clone(),
        });

        match update {
            DirectoryUpdate::Updated { unread_incremented } => {
                tracing::debug!(conversation_id = %conversation_id, message_id = %message_id, "live message applied");
                self.emit(SyncNotification::DirectoryChanged);
                RouteOutcome::Applied {
                    conversation_id,
                    unread_incremented,
                }
            }
            DirectoryUpdate::UnknownConversation => {
                tracing::info!(conversation_id = %conversation_id, "message for unknown conversation, directory stale");
                self.emit(SyncNotification::DirectoryStale {
                    conversation_id: conversation_id.clone(),
                });
                RouteOutcome::NeedsDirectoryRefresh { conversation_id }
            }
        }
    }

    fn load_failed(&self, conversation: &ConversationId, error: ApiError) -> SyncError {
        tracing::warn!(conversation_id = %conversation, error = %error, "message fetch failed");
        let error = SyncError::from(error);
        self.emit(SyncNotification::LoadFailed {
            conversation_id: conversation.clone(),
            error: error.clone(),
        });
        error
    }

    // --- Snapshots ---

    /// The merged directory.
    #[must_use]
    pub fn directory_entries(&self) -> Vec<DirectoryEntry> {
        self.state.lock().directory.entries()
    }

    /// A conversation's directory row.
    #[must_use]
    pub fn conversation(&self, conversation: &ConversationId) -> Option<Conversation> {
        self.state.lock().directory.get(conversation).cloned()
    }

    /// Sum of unread counters.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.state.lock().directory.total_unread()
    }

    /// A conversation's ordered messages.
    #[must_use]
    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.state.lock().store.messages(conversation).to_vec()
    }

    /// Messages of the selected conversation (empty for a draft or no selection).
    #[must_use]
    pub fn active_messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        state
            .selection
            .conversation_id()
            .map(|id| state.store.messages(id).to_vec())
            .unwrap_or_default()
    }

    /// The current selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.state.lock().selection.clone()
    }

    /// A conversation's load phase.
    #[must_use]
    pub fn phase(&self, conversation: &ConversationId) -> SyncPhase {
        self.state
            .lock()
            .conversations
            .get(conversation)
            .map_or(SyncPhase::Initial, |s| s.phase)
    }

    /// A conversation's pagination cursor, once it has been touched.
    #[must_use]
    pub fn cursor(&self, conversation: &ConversationId) -> Option<PaginationCursor> {
        self.state
            .lock()
            .conversations
            .get(conversation)
            .map(|s| s.cursor)
    }
}

/// Convert fetched wire messages, dropping malformed ones and ones that
/// belong to another conversation.
fn decode_batch(
    conversation: &ConversationId,
    wire: Vec<WireMessage>,
    origin: OriginSource,
) -> Vec<Message> {
    wire.into_iter()
        .filter_map(|w| match Message::from_wire(w, origin) {
            Ok(m) if m.conversation_id == *conversation => Some(m),
            Ok(m) => {
                tracing::warn!(
                    conversation_id = %conversation,
                    message_id = %m.id,
                    "fetched message belongs to another conversation, dropped"
                );
                None
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation, error = %e, "malformed fetched message dropped");
                None
            }
        })
        .collect()
}
