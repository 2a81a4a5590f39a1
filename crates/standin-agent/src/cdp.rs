//! Minimal async DevTools protocol client.
//!
//! One WebSocket per target. Commands carry auto-incrementing ids and are
//! matched to responses by a background reader task; messages without an id
//! are forwarded as events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::AgentError;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// A DevTools event (`method` + `params`, no id).
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, PartialEq)]
enum Reply {
    Result(Value),
    Error { code: i64, message: String },
}

/// Classified inbound frame.
#[derive(Debug, PartialEq)]
enum Inbound {
    Response { id: u64, reply: Reply },
    Event(CdpEvent),
    Ignored,
}

fn classify(json: Value) -> Inbound {
    if let Some(id) = json.get("id").and_then(Value::as_u64) {
        let reply = match json.get("error") {
            Some(err) => Reply::Error {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            None => Reply::Result(json.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Inbound::Response { id, reply };
    }
    match json.get("method").and_then(Value::as_str) {
        Some(method) => Inbound::Event(CdpEvent {
            method: method.to_string(),
            params: json.get("params").cloned().unwrap_or(Value::Null),
        }),
        None => Inbound::Ignored,
    }
}

pub struct CdpClient {
    url: String,
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<SplitSink<WsStream, Message>>,
    events: mpsc::UnboundedReceiver<CdpEvent>,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self, AgentError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await.map_err(|e| {
            AgentError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let (writer, reader) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending), event_tx));

        tracing::debug!(url = ws_url, "DevTools connection established");

        Ok(Self {
            url: ws_url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            events,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        self.send_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::json!({ "id": id, "method": method, "params": params });

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::Protocol(format!("send {method}: {e}")));
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(AgentError::Protocol(format!(
                    "connection closed before {method} replied"
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(AgentError::CommandTimeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        match reply {
            Reply::Result(value) => Ok(value),
            Reply::Error { code, message } => Err(AgentError::Cdp {
                method: method.to_string(),
                code,
                message,
            }),
        }
    }

    /// Next event, or `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<CdpEvent> {
        self.events.recv().await
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    pending: PendingMap,
    events: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Binary(b)) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "DevTools read error");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable DevTools frame");
                continue;
            }
        };

        match classify(json) {
            Inbound::Response { id, reply } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(reply);
                }
            }
            Inbound::Event(event) => {
                let _ = events.send(event);
            }
            Inbound::Ignored => {}
        }
    }

    // Dropping the senders wakes every waiter with a closed-channel error.
    pending.lock().await.clear();
}
