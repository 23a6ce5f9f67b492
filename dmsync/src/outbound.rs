//! Outbound pipeline: validated, serialized message sends.
//!
//! One send may be outstanding per pipeline; a second call while the
//! first is unresolved fails with [`SendError::AlreadyInFlight`] without
//! touching the network. Nothing is written to the message store here.
//! The confirmed message comes back as a [`SentMessage`] (and again as a
//! push confirmation), and the caller routes it through the sync
//! controller so a single row appears once the server has assigned its id.
//! A failed send hands the draft text back so the input can be restored.

use std::sync::atomic::{AtomicBool, Ordering};

use dmsync_proto::message::MAX_CONTENT_LEN;

use crate::api::{ApiError, MessageApi, SendTarget, SentMessage};

/// Errors returned by [`OutboundPipeline::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The text is empty after trimming; no request was made.
    #[error("message is empty")]
    EmptyContent,

    /// The text exceeds the content limit; no request was made.
    #[error("message too long: {len} bytes (max {max})")]
    ContentTooLong {
        /// Length of the rejected text in bytes.
        len: usize,
        /// The configured maximum.
        max: usize,
    },

    /// A previous send has not resolved yet.
    #[error("a send is already in flight")]
    AlreadyInFlight,

    /// Nothing is selected to send to.
    #[error("no conversation or draft selected")]
    NoTarget,

    /// The request failed. `draft` is the text to put back in the input.
    #[error("send failed: {source}")]
    Network {
        /// The text the user tried to send, unchanged.
        draft: String,
        /// The collaborator error.
        source: ApiError,
    },
}

impl SendError {
    /// The text to restore into the input field, if the send got that far.
    #[must_use]
    pub fn draft(&self) -> Option<&str> {
        match self {
            Self::Network { draft, .. } => Some(draft),
            _ => None,
        }
    }
}

/// Clears the in-flight flag when the send resolves or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serializes sends from one session.
pub struct OutboundPipeline<A> {
    api: A,
    max_content_len: usize,
    in_flight: AtomicBool,
}

impl<A: MessageApi> OutboundPipeline<A> {
    /// Create a pipeline with the default content limit.
    pub const fn new(api: A) -> Self {
        Self::with_max_len(api, MAX_CONTENT_LEN)
    }

    /// Create a pipeline with a custom content limit in bytes.
    pub const fn with_max_len(api: A, max_content_len: usize) -> Self {
        Self {
            api,
            max_content_len,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a send is outstanding.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `text` to `target`.
    ///
    /// The text is sent as typed; trimming only decides emptiness.
    ///
    /// # Errors
    ///
    /// - [`SendError::EmptyContent`] / [`SendError::ContentTooLong`] on
    ///   local validation failure.
    /// - [`SendError::AlreadyInFlight`] if another send is outstanding.
    /// - [`SendError::Network`] if the request failed.
    pub async fn send(&self, target: &SendTarget, text: &str) -> Result<SentMessage, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        if text.len() > self.max_content_len {
            return Err(SendError::ContentTooLong {
                len: text.len(),
                max: self.max_content_len,
            });
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%target, "send rejected, another send in flight");
            return Err(SendError::AlreadyInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        match self.api.send_message(target, text).await {
            Ok(sent) => {
                tracing::debug!(
                    %target,
                    conversation_id = %sent.conversation_id,
                    "message sent"
                );
                Ok(sent)
            }
            Err(source) => {
                tracing::warn!(%target, error = %source, "send failed");
                Err(SendError::Network {
                    draft: text.to_string(),
                    source,
                })
            }
        }
    }
}
