//! WebSocket bridge to the browser extension.
//!
//! The extension connects to a local socket and evaluates the scripts it receives
//! in the active tab. Replies are matched to requests by id.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::HarvestError;

pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:17373";

const CLIENT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ERROR_PREVIEW_CHARS: usize = 400;

type EvalOutcome = Result<Value, String>;

/// Request sent to the extension
#[derive(Debug, Serialize, Deserialize)]
pub struct EvalRequest {
    pub id: String,
    pub action: String,
    pub code: String,
    #[serde(default)]
    pub await_promise: bool,
}

/// Frames the extension sends: eval replies, or typed control messages
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Reply {
        id: String,
        ok: bool,
        result: Option<Value>,
        error: Option<String>,
    },
    Control(Control),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Control {
    Hello { from: Option<String> },
    Pong,
    ConsoleEvent {
        level: Option<String>,
        args: Option<Value>,
    },
}

struct Connection {
    id: Uuid,
    outbox: mpsc::UnboundedSender<Message>,
}

/// In-flight eval, remembered with the connection it was sent on
struct PendingEval {
    connection: Uuid,
    reply: oneshot::Sender<EvalOutcome>,
}

#[derive(Default)]
struct Shared {
    connections: Mutex<Vec<Connection>>,
    pending: Mutex<HashMap<String, PendingEval>>,
}

impl Shared {
    async fn settle(&self, id: &str, outcome: EvalOutcome) {
        if let Some(eval) = self.pending.lock().await.remove(id) {
            let _ = eval.reply.send(outcome);
        } else {
            debug!(%id, "Reply for an eval nobody is waiting on");
        }
    }

    /// Forget a closed connection. Its in-flight evals are dropped, so their
    /// callers see the disconnect right away.
    async fn disconnect(&self, connection: Uuid) {
        self.connections.lock().await.retain(|c| c.id != connection);
        self.pending
            .lock()
            .await
            .retain(|_, eval| eval.connection != connection);
    }
}

/// Local WebSocket server the browser extension connects to
pub struct ExtensionBridge {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ExtensionBridge {
    /// Bind the listener and start accepting extension connections
    pub async fn bind(addr: &str) -> Result<Arc<ExtensionBridge>, HarvestError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            HarvestError::PlatformError(format!("failed to bind extension bridge on {addr}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;
        info!("🔌 Extension bridge listening on {}", local_addr);

        let shared = Arc::new(Shared::default());
        let accept_task = tokio::spawn(accept_loop(listener, shared.clone()));
        Ok(Arc::new(ExtensionBridge {
            shared,
            local_addr,
            accept_task,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn is_client_connected(&self) -> bool {
        !self.shared.connections.lock().await.is_empty()
    }

    /// Wait until an extension client is connected, up to `timeout`
    pub async fn wait_for_client(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_client_connected().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(CLIENT_POLL_INTERVAL).await;
        }
    }

    /// Evaluate `code` in the active tab of the first connected client
    pub async fn eval_in_active_tab(&self, code: &str, timeout: Duration) -> Result<Value, HarvestError> {
        let request = EvalRequest {
            id: Uuid::new_v4().to_string(),
            action: "eval".to_string(),
            code: code.to_string(),
            await_promise: true,
        };
        let frame = serde_json::to_string(&request)?;
        let (reply, outcome) = oneshot::channel::<EvalOutcome>();

        {
            let connections = self.shared.connections.lock().await;
            let Some(target) = connections.first() else {
                return Err(HarvestError::NotConnected(
                    "no extension client is connected".to_string(),
                ));
            };
            self.shared.pending.lock().await.insert(
                request.id.clone(),
                PendingEval {
                    connection: target.id,
                    reply,
                },
            );
            debug!(id = %request.id, bytes = frame.len(), "Sending eval to extension");
            if target.outbox.send(Message::Text(frame)).is_err() {
                self.shared.pending.lock().await.remove(&request.id);
                return Err(HarvestError::NotConnected(
                    "extension connection is closing".to_string(),
                ));
            }
        }

        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(HarvestError::PlatformError(format!(
                "script evaluation failed: {message}"
            ))),
            Ok(Err(_dropped)) => Err(HarvestError::NotConnected(
                "extension disconnected before replying".to_string(),
            )),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request.id);
                warn!(id = %request.id, "Timed out waiting for eval result");
                Err(HarvestError::Timeout(format!(
                    "no eval result within {timeout:?}"
                )))
            }
        }
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "Incoming extension connection");
                tokio::spawn(serve_connection(stream, shared.clone()));
            }
            Err(e) => warn!("ws accept error: {}", e),
        }
    }
}

async fn serve_connection(stream: TcpStream, shared: Arc<Shared>) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("ws handshake error: {}", e);
            return;
        }
    };
    let (mut sink, mut frames) = socket.split();
    let (outbox, mut queued) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!("ws send error: {}", e);
                break;
            }
        }
    });

    let id = Uuid::new_v4();
    shared.connections.lock().await.push(Connection { id, outbox });

    while let Some(Ok(frame)) = frames.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        match serde_json::from_str::<Incoming>(&text) {
            Ok(Incoming::Reply {
                id: request,
                ok: true,
                result,
                ..
            }) => shared.settle(&request, Ok(result.unwrap_or(Value::Null))).await,
            Ok(Incoming::Reply {
                id: request, error: message, ..
            }) => {
                let message = message.unwrap_or_else(|| "unknown error".to_string());
                let preview: String = message.chars().take(ERROR_PREVIEW_CHARS).collect();
                error!(id = %request, error = %preview, "Extension reported eval error");
                shared.settle(&request, Err(message)).await;
            }
            Ok(Incoming::Control(Control::Hello { from })) => {
                info!(from = ?from, "Extension connected");
            }
            Ok(Incoming::Control(Control::Pong)) => {}
            Ok(Incoming::Control(Control::ConsoleEvent { level, args })) => {
                let args = args.map(|v| v.to_string()).unwrap_or_else(|| "[]".into());
                debug!(level = %level.as_deref().unwrap_or("log"), %args, "Page console event");
            }
            Err(e) => warn!("Invalid incoming JSON: {}", e),
        }
    }

    shared.disconnect(id).await;
    writer.abort();
    info!("Extension disconnected");
}
