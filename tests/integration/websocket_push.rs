// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the WebSocket push channel.
//!
//! Each test runs a one-connection push server on an ephemeral port that
//! speaks the `ChannelFrame` protocol. These tests validate:
//! - The join handshake, including rejected and mismatched joins
//! - Events arrive in server order, and malformed frames are skipped
//! - A server close ends the subscription
//! - A session consumes a WebSocket channel end to end

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use dmsync::api::memory::{BackendClient, InMemoryBackend};
use dmsync::config::ClientConfig;
use dmsync::identity::StaticIdentity;
use dmsync::push::websocket::{PushConfig, WebSocketPushChannel};
use dmsync::push::{PushChannel, PushError};
use dmsync::session::Session;
use dmsync_proto::codec;
use dmsync_proto::conversation::Peer;
use dmsync_proto::event::{ChannelFrame, PushEvent};
use dmsync_proto::message::{ConversationId, MessageId, Timestamp, UserId, WireMessage};

// =============================================================================
// Helpers
// =============================================================================

type ServerStream = WebSocketStream<TcpStream>;

/// Accept one connection, read its `Join` frame and hand the stream and
/// the joining user to `handler`.
async fn serve_once<H, Fut>(handler: H) -> (String, JoinHandle<()>)
where
    H: FnOnce(ServerStream, UserId) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}/push");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let user = match ws.next().await {
            Some(Ok(WsMessage::Binary(data))) => match codec::decode(&data).unwrap() {
                ChannelFrame::Join { user_id } => user_id,
                other => panic!("expected Join, got {other:?}"),
            },
            other => panic!("expected a binary Join frame, got {other:?}"),
        };
        handler(ws, user).await;
    });
    (url, server)
}

async fn send_frame(ws: &mut ServerStream, frame: &ChannelFrame) {
    let bytes = codec::encode(frame).unwrap();
    ws.send(WsMessage::Binary(bytes.into())).await.unwrap();
}

/// Read until the client closes.
async fn drain(ws: &mut ServerStream) {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_close() {
            break;
        }
    }
}

fn config() -> PushConfig {
    PushConfig {
        connect_timeout: Duration::from_secs(2),
        join_timeout: Duration::from_secs(2),
        event_buffer: 8,
    }
}

fn event(id: i64) -> PushEvent {
    PushEvent::MessageReceived {
        conversation_id: ConversationId::new("c1"),
        message: WireMessage {
            id: Some(MessageId::new(id)),
            conversation_id: Some(ConversationId::new("c1")),
            sender_id: Some(UserId::new("bob")),
            content: Some(format!("event {id}")),
            created_at: Some(Timestamp::from_millis(u64::try_from(id).unwrap())),
        },
    }
}

async fn next(channel: &WebSocketPushChannel) -> Result<PushEvent, PushError> {
    tokio::time::timeout(Duration::from_secs(2), channel.next_event())
        .await
        .expect("no event in time")
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn join_is_acknowledged() {
    let (url, server) = serve_once(|mut ws, user| async move {
        send_frame(&mut ws, &ChannelFrame::Joined { user_id: user }).await;
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    assert_eq!(channel.url(), url);
    channel.join(&UserId::new("me")).await.unwrap();
    assert!(channel.is_connected());

    channel.leave().await;
    assert!(!channel.is_connected());
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not see the close")
        .unwrap();
}

#[tokio::test]
async fn join_error_frame_is_a_rejection() {
    let (url, _server) = serve_once(|mut ws, _user| async move {
        send_frame(
            &mut ws,
            &ChannelFrame::Error {
                reason: "unknown user".into(),
            },
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    let err = channel.join(&UserId::new("ghost")).await.unwrap_err();
    assert!(matches!(err, PushError::JoinRejected(ref reason) if reason == "unknown user"));
}

#[tokio::test]
async fn join_ack_for_another_user_is_a_rejection() {
    let (url, _server) = serve_once(|mut ws, _user| async move {
        send_frame(
            &mut ws,
            &ChannelFrame::Joined {
                user_id: UserId::new("someone-else"),
            },
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    let err = channel.join(&UserId::new("me")).await.unwrap_err();
    assert!(matches!(err, PushError::JoinRejected(_)));
}

#[tokio::test]
async fn second_join_is_rejected() {
    let (url, _server) = serve_once(|mut ws, user| async move {
        send_frame(&mut ws, &ChannelFrame::Joined { user_id: user }).await;
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    channel.join(&UserId::new("me")).await.unwrap();
    assert!(matches!(
        channel.join(&UserId::new("me")).await,
        Err(PushError::JoinRejected(_))
    ));
}

// =============================================================================
// Event delivery
// =============================================================================

#[tokio::test]
async fn events_arrive_in_order_and_garbage_is_skipped() {
    let (url, _server) = serve_once(|mut ws, user| async move {
        send_frame(&mut ws, &ChannelFrame::Joined { user_id: user }).await;
        send_frame(&mut ws, &ChannelFrame::Event(event(1))).await;
        send_frame(&mut ws, &ChannelFrame::Event(event(2))).await;
        ws.send(WsMessage::Binary(vec![0xff, 0xff, 0xff].into()))
            .await
            .unwrap();
        send_frame(
            &mut ws,
            &ChannelFrame::Error {
                reason: "hiccup".into(),
            },
        )
        .await;
        ws.send(WsMessage::Text("not a frame".into())).await.unwrap();
        send_frame(&mut ws, &ChannelFrame::Event(event(3))).await;
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    channel.join(&UserId::new("me")).await.unwrap();

    for id in 1..=3 {
        assert_eq!(next(&channel).await.unwrap(), event(id));
    }
    assert!(channel.is_connected());
}

#[tokio::test]
async fn server_close_ends_the_subscription() {
    let (url, _server) = serve_once(|mut ws, user| async move {
        send_frame(&mut ws, &ChannelFrame::Joined { user_id: user }).await;
        send_frame(&mut ws, &ChannelFrame::Event(event(7))).await;
        ws.close(None).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let channel = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    channel.join(&UserId::new("me")).await.unwrap();

    assert_eq!(next(&channel).await.unwrap(), event(7));
    let err = next(&channel).await.unwrap_err();
    assert!(matches!(err, PushError::ConnectionClosed));
    assert!(err.is_terminal());
    assert!(!channel.is_connected());
}

// =============================================================================
// Session over WebSocket
// =============================================================================

#[tokio::test]
async fn session_applies_events_from_websocket() {
    let backend = InMemoryBackend::with_clock(Timestamp::from_millis(1_000));
    backend.add_user(Peer::new("me", "Me", ""));
    backend.add_user(Peer::new("bob", "Bob", "Berg"));
    let me = UserId::new("me");
    let bob = UserId::new("bob");
    backend.insert_history(&bob, &me, "before");
    let conv = backend.conversation_between(&me, &bob);

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let pushed = PushEvent::MessageReceived {
        conversation_id: conv.clone(),
        message: WireMessage {
            id: Some(MessageId::new(900)),
            conversation_id: Some(conv.clone()),
            sender_id: Some(bob.clone()),
            content: Some("over the wire".into()),
            created_at: Some(Timestamp::from_millis(50_000)),
        },
    };
    let frame = ChannelFrame::Event(pushed);
    let (url, _server) = serve_once(move |mut ws, user| async move {
        send_frame(&mut ws, &ChannelFrame::Joined { user_id: user }).await;
        send_frame(&mut ws, &frame).await;
        let _ = close_rx.await;
        ws.close(None).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let push = WebSocketPushChannel::connect(&url, config()).await.unwrap();
    let session: Session<BackendClient, BackendClient, WebSocketPushChannel> = Session::start(
        &StaticIdentity::new("me"),
        backend.client(&me),
        backend.client(&me),
        push,
        &ClientConfig::default(),
    )
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while session.controller().messages(&conv).len() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pushed message not applied");
    let row = session.controller().conversation(&conv).unwrap();
    assert_eq!(row.last_message_preview, "over the wire");
    assert_eq!(row.unread_count, 1);
    assert!(session.is_listening());

    close_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.is_listening() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session kept listening after the server closed");
}
