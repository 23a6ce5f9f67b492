//! Shared data model and push-channel wire format for `dmsync`.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;
