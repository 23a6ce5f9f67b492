//! `dmsync`: demo of the direct-message sync engine.
//!
//! Seeds an in-process backend with a few peers and conversations, starts
//! a session against it and walks through a scripted sequence: open a
//! conversation, backfill older history, receive messages in the
//! background, search for a new contact and start a conversation with
//! them. The directory and the open conversation are printed after each
//! step; logs go to a file.
//!
//! ```bash
//! cargo run --bin dmsync
//!
//! # Use a WebSocket push channel instead of the in-process one
//! cargo run --bin dmsync -- --push-url ws://127.0.0.1:9100/push
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use dmsync::api::memory::InMemoryBackend;
use dmsync::api::{MessageApi, SendTarget};
use dmsync::config::{CliArgs, ClientConfig};
use dmsync::identity::StaticIdentity;
use dmsync::push::PushChannel;
use dmsync::push::websocket::WebSocketPushChannel;
use dmsync::session::Session;
use dmsync::sync::{BackfillOutcome, ProspectResolution, Viewport};
use dmsync_proto::conversation::Peer;
use dmsync_proto::message::UserId;

/// Pixel height the demo pretends each message bubble takes.
const ROW_HEIGHT: f64 = 40.0;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("dmsync demo starting");

    let me = UserId::new(config.user_id.clone().unwrap_or_else(|| "me".to_string()));
    let backend = seed_backend(&me);

    let result = match config.push_url.clone() {
        Some(url) => match WebSocketPushChannel::connect(&url, config.push.clone()).await {
            Ok(push) => {
                println!("push channel: {url} (in-process events are not forwarded)");
                run(&backend, &me, push, &config).await
            }
            Err(e) => Err(format!("could not connect to {url}: {e}")),
        },
        None => {
            let push = backend.push_channel(config.push.event_buffer);
            run(&backend, &me, push, &config).await
        }
    };

    tracing::info!("dmsync demo exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Stdout carries the demo output, so logs go to a file. Returns a
/// [`WorkerGuard`] that must be held until shutdown to flush buffered
/// entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("dmsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Backend with three peers; two of them already talk to `me`.
fn seed_backend(me: &UserId) -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    backend.add_user(Peer::new(me.as_str(), "Demo", "User"));
    backend.add_user(Peer::new("ana", "Ana", "Alves"));
    backend.add_user(Peer::new("ben", "Ben", "Brandt"));
    backend.add_user(Peer::new("cleo", "Cleo", "Castro"));

    let ana = UserId::new("ana");
    let ben = UserId::new("ben");
    for i in 1..=45 {
        if i % 3 == 0 {
            backend.insert_history(me, &ana, &format!("reply #{i}"));
        } else {
            backend.insert_history(&ana, me, &format!("note #{i}"));
        }
    }
    backend.insert_history(&ben, me, "lunch tomorrow?");
    backend.insert_history(me, &ben, "sure, noon works");
    backend
}

async fn run<P: PushChannel + 'static>(
    backend: &InMemoryBackend,
    me: &UserId,
    push: P,
    config: &ClientConfig,
) -> Result<(), String> {
    let session = Session::start(
        &StaticIdentity::new(me.as_str()),
        backend.client(me),
        backend.client(me),
        push,
        config,
    )
    .await
    .map_err(|e| e.to_string())?;
    if let Some(e) = session.startup_error() {
        println!("directory unavailable: {e}");
    }
    print_state("started", &session);

    let ana_conv = backend.conversation_between(me, &UserId::new("ana"));
    session
        .select_conversation(&ana_conv)
        .await
        .map_err(|e| e.to_string())?;
    print_state("opened Ana", &session);

    let rows = session.messages().len();
    #[allow(clippy::cast_precision_loss)]
    let viewport = Viewport {
        scroll_top: 0.0,
        content_height: rows as f64 * ROW_HEIGHT,
    };
    match session.on_scroll_near_top(viewport).await {
        Ok(BackfillOutcome::Merged {
            inserted, anchor, ..
        }) => {
            #[allow(clippy::cast_precision_loss)]
            let new_height = session.messages().len() as f64 * ROW_HEIGHT;
            let offset = anchor.map_or(0.0, |a| a.restore(new_height));
            println!("\n== backfilled {inserted} older messages, scroll offset now {offset:.0}px");
        }
        Ok(BackfillOutcome::Ignored(reason)) => println!("\n== backfill ignored: {reason:?}"),
        Err(e) => println!("\n== backfill failed: {e}"),
    }

    let ben = UserId::new("ben");
    let ben_client = backend.client(&ben);
    for text in ["are you there?", "ping"] {
        ben_client
            .send_message(&SendTarget::Peer(me.clone()), text)
            .await
            .map_err(|e| e.to_string())?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    print_state("Ben wrote twice", &session);

    session.search("cl").await.map_err(|e| e.to_string())?;
    print_state("searched \"cl\"", &session);

    let resolution = session
        .select_prospective_contact(&UserId::new("cleo"))
        .await
        .map_err(|e| e.to_string())?;
    if let ProspectResolution::Draft(peer) = resolution {
        println!("\n== draft with {}", peer.display_name());
    }
    match session.send("hi Cleo!").await {
        Ok(conversation) => println!("\n== sent, conversation {conversation}"),
        Err(e) => println!("\n== send failed: {e}"),
    }
    session.clear_search();
    print_state("after first message to Cleo", &session);

    session.shutdown().await;
    Ok(())
}

fn print_state<F, A, P>(step: &str, session: &Session<F, A, P>)
where
    F: dmsync::api::HistoryFetcher + 'static,
    A: MessageApi,
    P: PushChannel + 'static,
{
    println!("\n== {step}");
    println!("-- directory");
    for row in session.directory_rows() {
        let marker = if row.prospective { "+" } else { " " };
        let badge = if row.unread > 0 {
            format!(" ({})", row.unread)
        } else {
            String::new()
        };
        println!("{marker} {:<14}{badge:<6} {:>5}  {}", row.title, row.time, row.subtitle);
    }

    let views = session.message_views();
    if views.is_empty() {
        return;
    }
    println!("-- messages ({})", views.len());
    for view in views.iter().skip(views.len().saturating_sub(5)) {
        let who = if view.is_own { "you" } else { view.sender.as_str() };
        println!("  [{}] {who}: {}", view.time, view.content);
    }
}
