//! WebSocket push channel.
//!
//! Speaks the [`ChannelFrame`] protocol over binary WebSocket frames:
//! `Join` is sent after connecting, the server must answer `Joined`, and
//! from then on a background reader forwards every `Event` frame into a
//! channel consumed by [`next_event`](PushChannel::next_event). Malformed
//! frames are logged and skipped; the reader only stops when the server
//! closes the connection or the socket errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use dmsync_proto::codec;
use dmsync_proto::event::{ChannelFrame, PushEvent};
use dmsync_proto::message::UserId;

use super::{PushChannel, PushError};

/// Write half of the WebSocket connection.
type WsSender =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WsMessage>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeouts and buffering for [`WebSocketPushChannel`].
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the server's `Joined` acknowledgment.
    pub join_timeout: Duration,
    /// Capacity of the event buffer between the reader task and the consumer.
    pub event_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
            event_buffer: 256,
        }
    }
}

/// Push channel over a WebSocket connection.
///
/// Created via [`WebSocketPushChannel::connect`]; events flow once
/// [`join`](PushChannel::join) succeeds.
pub struct WebSocketPushChannel {
    url: String,
    config: PushConfig,
    ws_sender: Arc<Mutex<WsSender>>,
    /// Read half, owned here until join hands it to the reader task.
    ws_reader: Mutex<Option<WsReader>>,
    incoming: Mutex<mpsc::Receiver<PushEvent>>,
    incoming_tx: parking_lot::Mutex<Option<mpsc::Sender<PushEvent>>>,
    connected: Arc<AtomicBool>,
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebSocketPushChannel {
    /// Open the WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// - [`PushError::Timeout`] if the connection is not established in time.
    /// - [`PushError::Io`] if the server is unreachable or the handshake fails.
    pub async fn connect(url: &str, config: PushConfig) -> Result<Self, PushError> {
        let (ws_stream, _response) = tokio::time::timeout(config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "push channel connect timed out");
                PushError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "push channel connect failed");
                map_ws_connect_error(e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));

        Ok(Self {
            url: url.to_string(),
            config,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            ws_reader: Mutex::new(Some(ws_reader)),
            incoming: Mutex::new(rx),
            incoming_tx: parking_lot::Mutex::new(Some(tx)),
            connected: Arc::new(AtomicBool::new(true)),
            reader_handle: parking_lot::Mutex::new(None),
        })
    }

    /// The server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn send_frame(&self, frame: &ChannelFrame) -> Result<(), PushError> {
        if !self.is_connected() {
            return Err(PushError::ConnectionClosed);
        }
        let bytes = codec::encode(frame)?;
        self.ws_sender
            .lock()
            .await
            .send(WsMessage::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "push channel send failed");
                self.connected.store(false, Ordering::Relaxed);
                PushError::ConnectionClosed
            })
    }
}

impl PushChannel for WebSocketPushChannel {
    async fn join(&self, user: &UserId) -> Result<(), PushError> {
        let mut reader = self
            .ws_reader
            .lock()
            .await
            .take()
            .ok_or_else(|| PushError::JoinRejected("channel already joined".into()))?;

        self.send_frame(&ChannelFrame::Join {
            user_id: user.clone(),
        })
        .await?;

        let ack = tokio::time::timeout(self.config.join_timeout, reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "push channel join acknowledgment timed out");
                PushError::Timeout
            })?;

        match ack {
            Some(Ok(WsMessage::Binary(data))) => match codec::decode(&data)? {
                ChannelFrame::Joined { user_id } if user_id == *user => {
                    tracing::info!(user = %user_id, url = %self.url, "joined push channel");
                }
                ChannelFrame::Joined { user_id } => {
                    return Err(PushError::JoinRejected(format!(
                        "server joined {user_id} instead of {user}"
                    )));
                }
                ChannelFrame::Error { reason } => {
                    tracing::warn!(reason = %reason, "push channel join rejected");
                    return Err(PushError::JoinRejected(reason));
                }
                other => {
                    tracing::warn!(?other, "unexpected frame during join");
                    return Err(PushError::JoinRejected(
                        "unexpected frame during join".into(),
                    ));
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                tracing::warn!("server closed push channel during join");
                self.connected.store(false, Ordering::Relaxed);
                return Err(PushError::ConnectionClosed);
            }
            Some(Ok(_)) => {
                return Err(PushError::JoinRejected(
                    "unexpected non-binary frame during join".into(),
                ));
            }
            Some(Err(e)) => {
                self.connected.store(false, Ordering::Relaxed);
                return Err(PushError::Io(std::io::Error::other(format!(
                    "WebSocket error during join: {e}"
                ))));
            }
        }

        let tx = self
            .incoming_tx
            .lock()
            .take()
            .ok_or(PushError::ConnectionClosed)?;
        let handle = tokio::spawn(reader_loop(reader, tx, Arc::clone(&self.connected)));
        *self.reader_handle.lock() = Some(handle);
        Ok(())
    }

    async fn next_event(&self) -> Result<PushEvent, PushError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(PushError::ConnectionClosed)
    }

    async fn leave(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            let _ = self.ws_sender.lock().await.close().await;
        }
        let handle = self.reader_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.incoming_tx.lock().take();
        self.incoming.lock().await.close();
        tracing::info!(url = %self.url, "left push channel");
    }
}

impl Drop for WebSocketPushChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Forwards decoded events until the connection ends.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<PushEvent>, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(WsMessage::Binary(data)) => match codec::decode(&data) {
                Ok(ChannelFrame::Event(event)) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(ChannelFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "push server error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "ignoring unexpected push frame");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed push frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "push channel read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("push reader task exiting");
}

/// Map a connection error to a [`PushError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> PushError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => PushError::Io(io_err),
        WsError::Http(response) => PushError::Io(std::io::Error::other(format!(
            "push server HTTP error: status {}",
            response.status()
        ))),
        other => PushError::Io(std::io::Error::other(format!(
            "push connection error: {other}"
        ))),
    }
}
