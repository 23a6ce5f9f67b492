//! A signed-in session: push channel, controller and outbound pipeline.
//!
//! [`Session::start`] resolves the user, joins the injected push channel,
//! loads the directory and spawns two tasks:
//!
//! - **dispatch** pulls events off the push channel and hands them to the
//!   controller. Routing never awaits the network; when an event names a
//!   conversation the directory does not know, the dispatcher only queues a
//!   refresh request and moves on.
//! - **refresher** performs those directory refreshes. Its queue holds a
//!   single request, so a burst of unknown-conversation events collapses
//!   into one or two refetches.
//!
//! Dropping the session or calling [`Session::shutdown`] stops both tasks.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use dmsync_proto::message::{ConversationId, Message, UserId};

use crate::api::{HistoryFetcher, MessageApi, SendTarget};
use crate::config::ClientConfig;
use crate::directory::DirectoryEntry;
use crate::identity::{IdentityError, IdentityResolver};
use crate::outbound::{OutboundPipeline, SendError};
use crate::push::{PushChannel, PushError};
use crate::sync::{
    BackfillOutcome, ProspectResolution, RouteOutcome, Selection, SyncController, SyncError,
    SyncNotification, Viewport,
};
use crate::view::{DirectoryRow, MessageView, message_views};

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Nobody is signed in.
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    /// Joining the push channel failed.
    #[error("push channel: {0}")]
    Push(#[from] PushError),
}

/// A running session.
pub struct Session<F, A, P> {
    user: UserId,
    controller: Arc<SyncController<F>>,
    outbound: OutboundPipeline<A>,
    push: Arc<P>,
    time_format: String,
    startup_error: Option<SyncError>,
    dispatch: JoinHandle<()>,
    refresher: JoinHandle<()>,
}

impl<F, A, P> Session<F, A, P>
where
    F: HistoryFetcher + 'static,
    A: MessageApi,
    P: PushChannel + 'static,
{
    /// Start a session.
    ///
    /// The push channel is joined before the directory is fetched, so
    /// nothing sent in between is missed. A failed directory fetch leaves
    /// the directory empty and is reported through
    /// [`startup_error`](Self::startup_error); the session still starts.
    ///
    /// # Errors
    ///
    /// [`SessionError`] if the identity cannot be resolved or the push
    /// channel join fails.
    pub async fn start<I: IdentityResolver>(
        identity: &I,
        fetcher: F,
        api: A,
        push: P,
        config: &ClientConfig,
    ) -> Result<Self, SessionError> {
        let user = identity.current_user()?;
        push.join(&user).await?;
        tracing::info!(user = %user, "push channel joined");

        let controller = Arc::new(SyncController::new(fetcher, user.clone(), config.sync.clone()));
        let startup_error = controller.refresh_directory().await.err();
        if let Some(e) = &startup_error {
            tracing::warn!(error = %e, "initial directory load failed, starting empty");
        }

        let push = Arc::new(push);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let refresher = tokio::spawn(refresh_loop(Arc::clone(&controller), refresh_rx));
        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&push),
            Arc::clone(&controller),
            refresh_tx,
        ));

        tracing::info!(user = %user, "session started");
        Ok(Self {
            user,
            controller,
            outbound: OutboundPipeline::with_max_len(api, config.max_content_len),
            push,
            time_format: config.timestamp_format.clone(),
            startup_error,
            dispatch,
            refresher,
        })
    }

    /// The signed-in user.
    #[must_use]
    pub const fn user(&self) -> &UserId {
        &self.user
    }

    /// The directory load error from startup, if there was one.
    #[must_use]
    pub const fn startup_error(&self) -> Option<&SyncError> {
        self.startup_error.as_ref()
    }

    /// The underlying controller, for snapshots.
    #[must_use]
    pub fn controller(&self) -> &SyncController<F> {
        &self.controller
    }

    /// Whether push events are still being consumed.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        !self.dispatch.is_finished()
    }

    /// Receive change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.controller.subscribe()
    }

    // --- Requests ---

    /// See [`SyncController::select_conversation`].
    ///
    /// # Errors
    ///
    /// [`SyncError`] if the initial load fails.
    pub async fn select_conversation(&self, conversation: &ConversationId) -> Result<(), SyncError> {
        self.controller.select_conversation(conversation).await
    }

    /// See [`SyncController::select_prospective_contact`].
    ///
    /// # Errors
    ///
    /// [`SyncError`] if the peer is unknown or loading its conversation fails.
    pub async fn select_prospective_contact(
        &self,
        peer: &UserId,
    ) -> Result<ProspectResolution, SyncError> {
        self.controller.select_prospective_contact(peer).await
    }

    /// See [`SyncController::on_scroll_near_top`].
    ///
    /// # Errors
    ///
    /// [`SyncError`] if the backfill fetch fails.
    pub async fn on_scroll_near_top(&self, viewport: Viewport) -> Result<BackfillOutcome, SyncError> {
        self.controller.on_scroll_near_top(viewport).await
    }

    /// See [`SyncController::search`].
    ///
    /// # Errors
    ///
    /// [`SyncError`] if the search request fails.
    pub async fn search(&self, query: &str) -> Result<(), SyncError> {
        self.controller.search(query).await
    }

    /// Drop search results.
    pub fn clear_search(&self) {
        self.controller.clear_search();
    }

    /// Refetch the directory now.
    ///
    /// # Errors
    ///
    /// [`SyncError`] if the fetch fails.
    pub async fn refresh_directory(&self) -> Result<(), SyncError> {
        if let Some(id) = self.controller.refresh_directory().await? {
            self.controller.select_conversation(&id).await?;
        }
        Ok(())
    }

    /// Send `text` to the selection.
    ///
    /// The message shows up once the server has confirmed it. Sending to a
    /// draft mints the conversation server-side; the directory is then
    /// refreshed and the new conversation selected in place of the draft.
    /// Returns the conversation the message landed in.
    ///
    /// # Errors
    ///
    /// [`SendError`]; on [`SendError::Network`] the draft text is returned
    /// for the input field and nothing was stored.
    pub async fn send(&self, text: &str) -> Result<ConversationId, SendError> {
        let selection = self.controller.selection();
        let target = match &selection {
            Selection::None => return Err(SendError::NoTarget),
            Selection::Conversation(id) => SendTarget::Conversation(id.clone()),
            Selection::Draft(peer) => SendTarget::Peer(peer.id.clone()),
        };

        let sent = self.outbound.send(&target, text).await?;
        let conversation_id = sent.conversation_id.clone();
        let outcome = self.controller.apply_send_confirmed(sent);
        tracing::debug!(conversation_id = %conversation_id, ?outcome, "send confirmed");

        if let Selection::Draft(peer) = selection {
            if let Err(e) = self.controller.refresh_directory().await {
                tracing::warn!(peer = %peer.id, error = %e, "directory refresh after first send failed");
            }
            if let Err(e) = self.controller.select_conversation(&conversation_id).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "loading new conversation failed");
            }
        }
        Ok(conversation_id)
    }

    // --- Snapshots ---

    /// The merged directory.
    #[must_use]
    pub fn directory(&self) -> Vec<DirectoryEntry> {
        self.controller.directory_entries()
    }

    /// Messages of the selected conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.controller.active_messages()
    }

    /// The current selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.controller.selection()
    }

    /// Rendered directory rows.
    #[must_use]
    pub fn directory_rows(&self) -> Vec<DirectoryRow> {
        self.directory()
            .iter()
            .map(|e| DirectoryRow::new(e, &self.time_format))
            .collect()
    }

    /// Rendered messages of the selected conversation.
    #[must_use]
    pub fn message_views(&self) -> Vec<MessageView> {
        message_views(&self.messages(), &self.user, &self.time_format)
    }

    /// Leave the push channel and stop the background tasks.
    pub async fn shutdown(&self) {
        self.push.leave().await;
        self.dispatch.abort();
        self.refresher.abort();
        tracing::info!(user = %self.user, "session shut down");
    }
}

impl<F, A, P> Drop for Session<F, A, P> {
    fn drop(&mut self) {
        self.dispatch.abort();
        self.refresher.abort();
    }
}

/// Forward push events to the controller until the channel ends.
async fn dispatch_loop<F, P>(
    push: Arc<P>,
    controller: Arc<SyncController<F>>,
    refresh_tx: mpsc::Sender<()>,
) where
    F: HistoryFetcher,
    P: PushChannel,
{
    loop {
        match push.next_event().await {
            Ok(event) => {
                if let RouteOutcome::NeedsDirectoryRefresh { conversation_id } =
                    controller.handle_push_event(event)
                {
                    match refresh_tx.try_send(()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(())) => {
                            tracing::debug!(conversation_id = %conversation_id, "directory refresh already queued");
                        }
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    }
                }
            }
            Err(e) if e.is_terminal() => {
                tracing::info!(reason = %e, "push channel ended");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "push channel error");
            }
        }
    }
}

/// Perform queued directory refreshes.
async fn refresh_loop<F: HistoryFetcher>(
    controller: Arc<SyncController<F>>,
    mut requests: mpsc::Receiver<()>,
) {
    while requests.recv().await.is_some() {
        match controller.refresh_directory().await {
            Ok(Some(resolved)) => {
                if let Err(e) = controller.select_conversation(&resolved).await {
                    tracing::warn!(conversation_id = %resolved, error = %e, "loading resolved draft failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "background directory refresh failed");
            }
        }
    }
}
