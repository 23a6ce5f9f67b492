// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the conversation directory and search merge.
//!
//! These tests validate:
//! - A peer with a conversation never shows up as a prospective contact
//! - Peers with colliding names are still told apart by id
//! - N received messages raise the unread counter by exactly N, and
//!   activating the conversation resets it
//! - Recency ordering follows new messages
//! - A stale prospective contact resolves to its existing conversation
//! - A superseded search does not overwrite newer results
//! - Refetching the list does not bring back counts already read

use std::sync::Arc;
use std::time::Duration;

use dmsync::api::memory::{BackendClient, InMemoryBackend, Operation};
use dmsync::api::{ApiError, MessageApi, SendTarget};
use dmsync::config::ClientConfig;
use dmsync::directory::DirectoryEntry;
use dmsync::identity::StaticIdentity;
use dmsync::push::loopback::LoopbackPushChannel;
use dmsync::session::Session;
use dmsync::sync::{ProspectResolution, Selection, SyncConfig, SyncController};
use dmsync_proto::conversation::Peer;
use dmsync_proto::message::{ConversationId, Timestamp, UserId};

// =============================================================================
// Helpers
// =============================================================================

fn backend() -> InMemoryBackend {
    let backend = InMemoryBackend::with_clock(Timestamp::from_millis(50_000));
    backend.add_user(Peer::new("me", "Me", ""));
    backend.add_user(Peer::new("bob", "Bob", "Berg"));
    backend.add_user(Peer::new("bobby", "Bobby", "Tables"));
    backend.add_user(Peer::new("sam-1", "Sam", "Lee"));
    backend.add_user(Peer::new("sam-2", "Sam", "Lee"));
    backend
}

fn me() -> UserId {
    UserId::new("me")
}

fn controller(backend: &InMemoryBackend) -> SyncController<BackendClient> {
    SyncController::new(backend.client(&me()), me(), SyncConfig::default())
}

fn prospect_ids(entries: &[DirectoryEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| match e {
            DirectoryEntry::ProspectiveContact { peer_id, .. } => Some(peer_id.to_string()),
            DirectoryEntry::Conversation { .. } => None,
        })
        .collect()
}

fn conversation_ids(entries: &[DirectoryEntry]) -> Vec<ConversationId> {
    entries
        .iter()
        .filter_map(|e| match e {
            DirectoryEntry::Conversation {
                conversation_id, ..
            } => Some(conversation_id.clone()),
            DirectoryEntry::ProspectiveContact { .. } => None,
        })
        .collect()
}

fn unread(entries: &[DirectoryEntry], conv: &ConversationId) -> u32 {
    entries
        .iter()
        .find_map(|e| match e {
            DirectoryEntry::Conversation {
                conversation_id,
                unread_count,
                ..
            } if conversation_id == conv => Some(*unread_count),
            _ => None,
        })
        .expect("conversation not in directory")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// =============================================================================
// Search merge
// =============================================================================

#[tokio::test]
async fn peer_with_conversation_is_never_a_prospect() {
    let backend = backend();
    backend.insert_history(&UserId::new("bob"), &me(), "yo");
    let controller = controller(&backend);
    controller.refresh_directory().await.unwrap();

    controller.search("bob").await.unwrap();
    let entries = controller.directory_entries();
    assert_eq!(prospect_ids(&entries), vec!["bobby"]);
    assert_eq!(conversation_ids(&entries).len(), 1);
    // Prospects come after every real conversation.
    assert!(matches!(entries[0], DirectoryEntry::Conversation { .. }));
    assert!(entries[1].is_prospective());
}

#[tokio::test]
async fn same_name_peers_are_kept_apart_by_id() {
    let backend = backend();
    backend.insert_history(&UserId::new("sam-1"), &me(), "hi, it's Sam");
    let controller = controller(&backend);
    controller.refresh_directory().await.unwrap();

    controller.search("sam lee").await.unwrap();
    assert_eq!(prospect_ids(&controller.directory_entries()), vec!["sam-2"]);
}

#[tokio::test]
async fn prospect_disappears_once_conversation_exists() {
    let backend = backend();
    let controller = controller(&backend);
    controller.search("bobby").await.unwrap();
    assert_eq!(prospect_ids(&controller.directory_entries()), vec!["bobby"]);

    backend.insert_history(&UserId::new("bobby"), &me(), "found you");
    controller.refresh_directory().await.unwrap();
    let entries = controller.directory_entries();
    assert!(prospect_ids(&entries).is_empty());
    assert_eq!(conversation_ids(&entries).len(), 1);
}

#[tokio::test]
async fn stale_prospect_resolves_to_existing_conversation() {
    let backend = backend();
    let controller = controller(&backend);
    controller.search("bobby").await.unwrap();

    let bobby = UserId::new("bobby");
    backend.insert_history(&bobby, &me(), "beat you to it");
    let conv = backend.conversation_between(&me(), &bobby);

    let resolution = controller.select_prospective_contact(&bobby).await.unwrap();
    assert_eq!(resolution, ProspectResolution::ExistingConversation(conv.clone()));
    assert_eq!(controller.selection(), Selection::Conversation(conv.clone()));
    assert_eq!(controller.messages(&conv).len(), 1);
}

#[tokio::test]
async fn recheck_failure_falls_back_to_draft() {
    let backend = backend();
    let controller = controller(&backend);
    controller.search("bobby").await.unwrap();
    backend.fail_next(Operation::ListConversations, ApiError::Network("flaky".into()));

    let resolution = controller
        .select_prospective_contact(&UserId::new("bobby"))
        .await
        .unwrap();
    assert!(matches!(resolution, ProspectResolution::Draft(ref p) if p.id.as_str() == "bobby"));
}

#[tokio::test]
async fn failed_search_keeps_previous_results() {
    let backend = backend();
    let controller = controller(&backend);
    controller.search("bobby").await.unwrap();
    backend.fail_next(Operation::SearchPeers, ApiError::Network("timeout".into()));

    assert!(controller.search("sam").await.is_err());
    assert_eq!(prospect_ids(&controller.directory_entries()), vec!["bobby"]);
}

#[tokio::test]
async fn superseded_search_is_discarded() {
    let backend = backend();
    let controller = Arc::new(controller(&backend));

    backend.hold_fetches();
    let slow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.search("bobby").await })
    };
    eventually(|| backend.request_count(Operation::SearchPeers) == 1).await;
    let fast = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.search("sam").await })
    };
    eventually(|| backend.request_count(Operation::SearchPeers) == 2).await;
    backend.release_fetches();
    slow.await.unwrap().unwrap();
    fast.await.unwrap().unwrap();

    let mut prospects = prospect_ids(&controller.directory_entries());
    prospects.sort();
    assert_eq!(prospects, vec!["sam-1", "sam-2"]);
}

// =============================================================================
// Unread counters and ordering (through a live session)
// =============================================================================

type TestSession = Session<BackendClient, BackendClient, LoopbackPushChannel>;

async fn session(backend: &InMemoryBackend) -> TestSession {
    Session::start(
        &StaticIdentity::new("me"),
        backend.client(&me()),
        backend.client(&me()),
        backend.push_channel(64),
        &ClientConfig::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn unread_counts_received_messages_and_resets_on_activation() {
    let backend = backend();
    let bob = UserId::new("bob");
    let bobby = UserId::new("bobby");
    backend.insert_history(&bob, &me(), "old");
    backend.insert_history(&bobby, &me(), "older");
    let bob_conv = backend.conversation_between(&me(), &bob);
    let bobby_conv = backend.conversation_between(&me(), &bobby);

    let session = session(&backend).await;
    session.select_conversation(&bobby_conv).await.unwrap();

    let bob_client = backend.client(&bob);
    for i in 0..5 {
        bob_client
            .send_message(&SendTarget::Conversation(bob_conv.clone()), &format!("n{i}"))
            .await
            .unwrap();
    }
    eventually(|| session.controller().messages(&bob_conv).len() == 6).await;
    assert_eq!(unread(&session.directory(), &bob_conv), 5);
    assert_eq!(unread(&session.directory(), &bobby_conv), 0);

    session.select_conversation(&bob_conv).await.unwrap();
    assert_eq!(unread(&session.directory(), &bob_conv), 0);

    // Messages into the active conversation are read on arrival.
    bob_client
        .send_message(&SendTarget::Conversation(bob_conv.clone()), "while open")
        .await
        .unwrap();
    eventually(|| session.messages().iter().any(|m| m.content == "while open")).await;
    assert_eq!(unread(&session.directory(), &bob_conv), 0);
}

#[tokio::test]
async fn new_message_moves_conversation_to_the_top() {
    let backend = backend();
    let bob = UserId::new("bob");
    let bobby = UserId::new("bobby");
    backend.insert_history(&bob, &me(), "first");
    backend.insert_history(&bobby, &me(), "second");
    let bob_conv = backend.conversation_between(&me(), &bob);
    let bobby_conv = backend.conversation_between(&me(), &bobby);

    let session = session(&backend).await;
    assert_eq!(
        conversation_ids(&session.directory()),
        vec![bobby_conv.clone(), bob_conv.clone()]
    );

    backend
        .client(&bob)
        .send_message(&SendTarget::Conversation(bob_conv.clone()), "bump")
        .await
        .unwrap();
    eventually(|| conversation_ids(&session.directory()).first() == Some(&bob_conv)).await;
    assert_eq!(
        conversation_ids(&session.directory()),
        vec![bob_conv, bobby_conv]
    );
}

#[tokio::test]
async fn read_while_open_stays_read_after_switching_and_refreshing() {
    let backend = backend();
    let bob = UserId::new("bob");
    let bobby = UserId::new("bobby");
    backend.insert_history(&bob, &me(), "old");
    backend.insert_history(&bobby, &me(), "older");
    let bob_conv = backend.conversation_between(&me(), &bob);
    let bobby_conv = backend.conversation_between(&me(), &bobby);

    let session = session(&backend).await;
    session.select_conversation(&bob_conv).await.unwrap();

    let bob_client = backend.client(&bob);
    for i in 0..3 {
        bob_client
            .send_message(&SendTarget::Conversation(bob_conv.clone()), &format!("seen {i}"))
            .await
            .unwrap();
    }
    eventually(|| session.controller().messages(&bob_conv).len() == 4).await;

    session.select_conversation(&bobby_conv).await.unwrap();
    session.refresh_directory().await.unwrap();
    assert_eq!(unread(&session.directory(), &bob_conv), 0);
    assert_eq!(session.controller().total_unread(), 0);
}
