//! WebSocket transport to the chat bridge.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rosterbot_protocol::{ClientFrame, ServerFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, warn};

use super::error::{SessionError, SessionResult};
use super::{SessionActions, SessionEvent};
use crate::config::Credentials;

/// Capacity of the inbound and outbound frame queues.
const QUEUE_CAPACITY: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connected bridge client.
///
/// Owns a reader task decoding server frames into [`SessionEvent`]s and a
/// writer task encoding queued [`ClientFrame`]s. Both tasks are aborted on
/// drop.
pub struct ChatClient {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ChatClient {
    /// Open the WebSocket and start the reader and writer tasks.
    pub async fn connect(endpoint: &str) -> SessionResult<Self> {
        debug!(endpoint, "Connecting to chat bridge");
        let (ws_stream, _) =
            connect_async(endpoint)
                .await
                .map_err(|source| SessionError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

        let (sink, stream) = ws_stream.split();
        let (evt_tx, evt_rx) = mpsc::channel::<SessionEvent>(QUEUE_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel::<ClientFrame>(QUEUE_CAPACITY);

        let reader = tokio::spawn(read_frames(stream, evt_tx));
        let writer = tokio::spawn(write_frames(sink, cmd_rx));

        Ok(Self {
            handle: SessionHandle { commands: cmd_tx },
            events: evt_rx,
            reader,
            writer,
        })
    }

    /// Handle for sending frames to the bridge.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Wait for the next inbound event.
    ///
    /// Returns `None` once the reader task has stopped and every queued
    /// event was consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Cloneable sender of outbound frames.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<ClientFrame>,
}

impl SessionHandle {
    /// Create a handle over an existing frame queue.
    pub fn new(commands: mpsc::Sender<ClientFrame>) -> Self {
        Self { commands }
    }

    /// Send the login frame.
    pub async fn authenticate(&self, credentials: &Credentials) -> SessionResult<()> {
        let frame = ClientFrame::Authenticate {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            device_id: credentials.device_id.clone(),
        };
        self.commands
            .send(frame)
            .await
            .map_err(|_| SessionError::Disconnected("outbound queue closed".to_string()))
    }

    fn enqueue(&self, frame: ClientFrame) -> SessionResult<()> {
        self.commands.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SessionError::QueueFull,
            TrySendError::Closed(_) => {
                SessionError::Disconnected("outbound queue closed".to_string())
            }
        })
    }
}

impl SessionActions for SessionHandle {
    fn request_info(&self, jids: &[String]) -> SessionResult<()> {
        self.enqueue(ClientFrame::RequestInfo {
            jids: jids.to_vec(),
        })
    }

    fn leave_group(&self, group_jid: &str) -> SessionResult<()> {
        self.enqueue(ClientFrame::LeaveGroup {
            group_jid: group_jid.to_string(),
        })
    }
}

async fn read_frames(mut stream: SplitStream<WsStream>, events: mpsc::Sender<SessionEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse frame from bridge");
                        continue;
                    }
                };
                let Some(event) = SessionEvent::from_frame(frame) else {
                    debug!("Ignoring unknown frame type");
                    continue;
                };
                if events.send(event).await.is_err() {
                    debug!("Event channel closed");
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "closed by bridge".to_string());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e.to_string(),
            None => break "connection closed".to_string(),
        }
    };

    debug!(reason = %reason, "Bridge connection ended");
    let _ = events.send(SessionEvent::Disconnected { reason }).await;
}

async fn write_frames(mut sink: SplitSink<WsStream, Message>, mut commands: mpsc::Receiver<ClientFrame>) {
    while let Some(frame) = commands.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            error!(error = %e, "Failed to write to bridge");
            break;
        }
    }

    let _ = sink.close().await;
    debug!("Writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_actions_enqueue_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx);

        handle
            .request_info(&["u1".to_string(), "u2".to_string()])
            .unwrap();
        handle.leave_group("g1").unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ClientFrame::RequestInfo {
                jids: vec!["u1".to_string(), "u2".to_string()]
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ClientFrame::LeaveGroup {
                group_jid: "g1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx);

        handle.leave_group("g1").unwrap();
        assert!(matches!(
            handle.leave_group("g2"),
            Err(SessionError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_closed_queue_is_a_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SessionHandle::new(tx);

        assert!(matches!(
            handle.request_info(&["u1".to_string()]),
            Err(SessionError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = ChatClient::connect(&format!("ws://{addr}/bridge")).await;
        assert!(matches!(
            result,
            Err(SessionError::ConnectionFailed { .. })
        ));
    }
}
