//! DevTools protocol client over a WebSocket.
//!
//! Commands carry increasing ids; a reader task matches responses to the
//! waiting caller and fans events out on a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_logging::{agent_debug, agent_trace, agent_warn};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::BrowserError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Serialize)]
struct CdpCommand<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CdpResponseError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, PartialEq)]
struct CdpResponse {
    result: Option<Value>,
    error: Option<CdpResponseError>,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Response { id: u64, response: CdpResponse },
    Event(CdpEvent),
}

/// Messages carrying an `id` answer a command; the rest with a `method`
/// are events.
fn classify(json: &Value) -> Option<Incoming> {
    if let Some(id) = json.get("id").and_then(Value::as_u64) {
        let response = CdpResponse {
            result: json.get("result").cloned(),
            error: json
                .get("error")
                .and_then(|err| serde_json::from_value(err.clone()).ok()),
        };
        return Some(Incoming::Response { id, response });
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(Incoming::Event(CdpEvent { method, params }))
}

pub struct CdpClient {
    url: String,
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<SplitSink<WsStream, Message>>,
    events: broadcast::Receiver<CdpEvent>,
    command_timeout: Duration,
    reader: JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        agent_debug!("connecting to DevTools socket {ws_url}");
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|err| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: err.to_string(),
            })?;
        let (writer, reader) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, events) = broadcast::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending), event_tx));

        Ok(Self {
            url: ws_url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            events,
            command_timeout,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True once the socket has closed; every further command fails.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }

    /// A fresh event receiver. It yields events sent after this call and
    /// reports `Closed` when the socket goes away.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.resubscribe()
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&CdpCommand { id, method, params })
            .map_err(|err| BrowserError::protocol(format!("failed to encode {method}: {err}")))?;
        agent_trace!("cdp -> #{id} {method}");

        // Register before sending so a fast answer cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await;
        if let Err(err) = sent {
            self.pending.lock().await.remove(&id);
            return Err(BrowserError::protocol(format!(
                "failed to send {method}: {err}"
            )));
        }

        let response = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BrowserError::protocol("connection closed")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: self.command_timeout,
                });
            }
        };

        match response.error {
            Some(err) => Err(BrowserError::Cdp {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
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
    events: broadcast::Sender<CdpEvent>,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                agent_warn!("DevTools socket read failed: {err}");
                break;
            }
        };
        let json: Value = match serde_json::from_str(&text) {
            Ok(json) => json,
            Err(err) => {
                agent_debug!("ignoring non-JSON DevTools message: {err}");
                continue;
            }
        };
        match classify(&json) {
            Some(Incoming::Response { id, response }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(response);
                }
            }
            Some(Incoming::Event(event)) => {
                // No subscribers is fine.
                let _ = events.send(event);
            }
            None => {}
        }
    }
    // Dropping the senders fails every command still waiting.
    pending.lock().await.clear();
}
