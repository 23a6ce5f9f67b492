//! Identity of the local session.
//!
//! Authentication happens elsewhere; the engine only needs the stable user
//! id to join the push channel and to tell own messages from the peer's.

use dmsync_proto::message::UserId;

/// Errors resolving the local identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// No user is signed in.
    #[error("no authenticated user")]
    Unauthenticated,
}

/// Maps the local session to a user id.
pub trait IdentityResolver: Send + Sync {
    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Unauthenticated`] if nobody is signed in.
    fn current_user(&self) -> Result<UserId, IdentityError>;
}

/// A fixed identity, from configuration or tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    /// Signed in as `user`.
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self(Some(UserId::new(user)))
    }

    /// Nobody signed in.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityResolver for StaticIdentity {
    fn current_user(&self) -> Result<UserId, IdentityError> {
        self.0.clone().ok_or(IdentityError::Unauthenticated)
    }
}
