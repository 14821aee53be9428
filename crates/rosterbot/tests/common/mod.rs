//! Test utilities and common setup.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use rosterbot::db::Database;
use rosterbot::roster::RosterCollector;
use rosterbot::session::{SessionActions, SessionResult};
use rosterbot::user::UserRepository;
use rosterbot_protocol::{ClientFrame, ServerFrame};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Outbound actions captured in call order.
#[derive(Debug, Default)]
pub struct RecordingActions {
    pub calls: Mutex<Vec<ClientFrame>>,
}

impl RecordingActions {
    pub fn calls(&self) -> Vec<ClientFrame> {
        self.calls.lock().unwrap().clone()
    }
}

impl SessionActions for RecordingActions {
    fn request_info(&self, jids: &[String]) -> SessionResult<()> {
        self.calls.lock().unwrap().push(ClientFrame::RequestInfo {
            jids: jids.to_vec(),
        });
        Ok(())
    }

    fn leave_group(&self, group_jid: &str) -> SessionResult<()> {
        self.calls.lock().unwrap().push(ClientFrame::LeaveGroup {
            group_jid: group_jid.to_string(),
        });
        Ok(())
    }
}

/// Collector wired to an in-memory database and recorded actions.
pub struct TestCollector {
    pub collector: RosterCollector,
    pub repository: UserRepository,
    pub actions: Arc<RecordingActions>,
    pub database: Database,
}

pub async fn test_collector() -> TestCollector {
    let database = Database::in_memory().await.unwrap();
    let repository = UserRepository::new(database.pool().clone());
    let actions = Arc::new(RecordingActions::default());
    let collector = RosterCollector::new(Arc::new(repository.clone()), actions.clone());

    TestCollector {
        collector,
        repository,
        actions,
        database,
    }
}

/// Bind a bridge listener on an ephemeral port and return its endpoint.
pub async fn bind_bridge() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/bridge", listener.local_addr().unwrap());
    (listener, endpoint)
}

/// Server side of one bridge connection.
pub struct ScriptedBridge {
    ws: WebSocketStream<TcpStream>,
}

impl ScriptedBridge {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        Self { ws }
    }

    /// Next client frame, skipping control messages.
    pub async fn recv(&mut self) -> ClientFrame {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("bridge stream ended: {other:?}"),
            }
        }
    }

    pub async fn send(&mut self, frame: &ServerFrame) {
        let json = serde_json::to_string(frame).unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    pub async fn send_raw(&mut self, json: &str) {
        self.ws
            .send(Message::Text(json.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
