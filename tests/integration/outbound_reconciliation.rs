// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for sending and reconciling outbound messages.
//!
//! The pipeline, controller and a joined loopback push channel are wired
//! by hand so each step (send response, push confirmation) can be applied
//! and inspected separately. These tests validate:
//! - A sent message appears once, under the server-assigned id
//! - Nothing is stored before the server confirms
//! - A failed send returns the draft and leaves the store untouched
//! - Confirmations from another device of the same account are applied
//!   without raising the unread counter

use dmsync::api::memory::{BackendClient, InMemoryBackend, Operation};
use dmsync::api::{ApiError, SendTarget};
use dmsync::outbound::{OutboundPipeline, SendError};
use dmsync::push::PushChannel;
use dmsync::push::loopback::LoopbackPushChannel;
use dmsync::sync::{RouteOutcome, SyncConfig, SyncController};
use dmsync_proto::conversation::Peer;
use dmsync_proto::event::PushEvent;
use dmsync_proto::message::{ConversationId, MessageId, Timestamp, UserId, WireMessage};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    backend: InMemoryBackend,
    me: UserId,
    conv: ConversationId,
    controller: SyncController<BackendClient>,
    pipeline: OutboundPipeline<BackendClient>,
    push: LoopbackPushChannel,
}

async fn harness() -> Harness {
    let backend = InMemoryBackend::with_clock(Timestamp::from_millis(5_000));
    backend.add_user(Peer::new("me", "Me", ""));
    backend.add_user(Peer::new("bob", "Bob", "Berg"));
    let me = UserId::new("me");
    let bob = UserId::new("bob");
    backend.insert_history(&bob, &me, "hello");
    let conv = backend.conversation_between(&me, &bob);

    let push = backend.push_channel(16);
    push.join(&me).await.unwrap();

    let controller = SyncController::new(backend.client(&me), me.clone(), SyncConfig::default());
    controller.select_conversation(&conv).await.unwrap();
    let pipeline = OutboundPipeline::new(backend.client(&me));

    Harness {
        backend,
        me,
        conv,
        controller,
        pipeline,
        push,
    }
}

fn count_content(controller: &SyncController<BackendClient>, conv: &ConversationId, text: &str) -> usize {
    controller
        .messages(conv)
        .iter()
        .filter(|m| m.content == text)
        .count()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn confirmed_send_appears_once_with_server_id() {
    let h = harness().await;
    h.backend.set_next_message_id(77);

    let sent = h
        .pipeline
        .send(&SendTarget::Conversation(h.conv.clone()), "hi")
        .await
        .unwrap();
    assert_eq!(sent.message.id, Some(MessageId::new(77)));
    // No speculative row before the confirmation is routed.
    assert_eq!(count_content(&h.controller, &h.conv, "hi"), 0);

    let outcome = h.controller.apply_send_confirmed(sent);
    assert_eq!(
        outcome,
        RouteOutcome::Applied {
            conversation_id: h.conv.clone(),
            unread_incremented: false,
        }
    );

    // The push channel delivers the same confirmation again.
    let event = h.push.next_event().await.unwrap();
    assert!(matches!(event, PushEvent::MessageSendConfirmed { .. }));
    assert_eq!(h.controller.handle_push_event(event), RouteOutcome::Duplicate);

    let messages = h.controller.messages(&h.conv);
    let his: Vec<_> = messages.iter().filter(|m| m.content == "hi").collect();
    assert_eq!(his.len(), 1);
    assert_eq!(his[0].id, MessageId::new(77));
    assert_eq!(messages.last().map(|m| m.id), Some(MessageId::new(77)));

    let row = h.controller.conversation(&h.conv).unwrap();
    assert_eq!(row.last_message_preview, "hi");
    assert_eq!(row.unread_count, 0);
}

#[tokio::test]
async fn push_confirmation_before_response_is_not_duplicated() {
    let h = harness().await;
    let sent = h
        .pipeline
        .send(&SendTarget::Conversation(h.conv.clone()), "race")
        .await
        .unwrap();

    let event = h.push.next_event().await.unwrap();
    assert!(matches!(
        h.controller.handle_push_event(event),
        RouteOutcome::Applied { .. }
    ));
    assert_eq!(h.controller.apply_send_confirmed(sent), RouteOutcome::Duplicate);
    assert_eq!(count_content(&h.controller, &h.conv, "race"), 1);
}

#[tokio::test]
async fn failed_send_restores_draft_and_stores_nothing() {
    let h = harness().await;
    let before = h.controller.messages(&h.conv);
    h.backend.fail_next(
        Operation::SendMessage,
        ApiError::Server {
            status: 503,
            message: "unavailable".into(),
        },
    );

    let err = h
        .pipeline
        .send(&SendTarget::Conversation(h.conv.clone()), "lost words")
        .await
        .unwrap_err();
    match &err {
        SendError::Network { draft, source } => {
            assert_eq!(draft, "lost words");
            assert!(source.is_retryable());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.controller.messages(&h.conv), before);
    assert!(!h.pipeline.is_in_flight());

    let sent = h
        .pipeline
        .send(
            &SendTarget::Conversation(h.conv.clone()),
            err.draft().unwrap(),
        )
        .await
        .unwrap();
    h.controller.apply_send_confirmed(sent);
    assert_eq!(count_content(&h.controller, &h.conv, "lost words"), 1);
}

#[tokio::test]
async fn empty_send_makes_no_request() {
    let h = harness().await;
    let err = h
        .pipeline
        .send(&SendTarget::Conversation(h.conv.clone()), "   ")
        .await
        .unwrap_err();
    assert_eq!(err, SendError::EmptyContent);
    assert_eq!(h.backend.request_count(Operation::SendMessage), 0);
}

#[tokio::test]
async fn confirmation_from_other_device_is_applied() {
    let h = harness().await;
    h.controller.select_conversation(&ConversationId::new("elsewhere")).await.ok();

    let event = PushEvent::MessageSendConfirmed {
        conversation_id: h.conv.clone(),
        message: WireMessage {
            id: Some(MessageId::new(4_242)),
            conversation_id: Some(h.conv.clone()),
            sender_id: Some(h.me.clone()),
            content: Some("sent from my phone".into()),
            created_at: Some(Timestamp::from_millis(9_000)),
        },
    };
    assert_eq!(
        h.controller.handle_push_event(event),
        RouteOutcome::Applied {
            conversation_id: h.conv.clone(),
            unread_incremented: false,
        }
    );
    assert_eq!(h.controller.conversation(&h.conv).unwrap().unread_count, 0);
    assert_eq!(count_content(&h.controller, &h.conv, "sent from my phone"), 1);
}
