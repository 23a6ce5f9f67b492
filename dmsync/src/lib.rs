//! `dmsync`: direct-message conversation synchronization engine.
//!
//! Keeps an ordered, deduplicated view of a user's conversations by
//! reconciling a push channel with a paginated history API. See
//! [`session::Session`] for the assembled engine.

pub mod api;
pub mod config;
pub mod directory;
pub mod identity;
pub mod outbound;
pub mod push;
pub mod session;
pub mod store;
pub mod sync;
pub mod view;
