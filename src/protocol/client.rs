//! The duplex connection to the browser's debug endpoint: one mutex-guarded
//! writer, one dedicated reader task, request/reply correlation by numeric
//! id, and event fan-out through [`super::subscription::SubscriptionRegistry`].
//!
//! Grounded on the forwarder's `UplinkSession` (connect/send/recv shape) and
//! the receiver's `run_session_loop` (single reader task driving both
//! incoming frames and a shutdown signal).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cdp_protocol::{CallRequest, IncomingMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::pending::PendingTable;
use super::subscription::{Event, EventStream, SessionFilter, SubscriptionRegistry};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsWriter = futures_util::stream::SplitSink<WsStream, Message>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("debug endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("handshake with debug endpoint failed: {0}")]
    HandshakeFailed(String),
    #[error("connection to browser lost")]
    Disconnected,
    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("call timed out")]
    Timeout,
}

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(200);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected protocol client. Cheap to clone: every clone shares the same
/// writer, pending table, and subscription registry.
#[derive(Clone)]
pub struct ProtocolClient {
    writer: Arc<AsyncMutex<WsWriter>>,
    next_id: Arc<AtomicU64>,
    pending: Arc<PendingTable>,
    subscriptions: Arc<SubscriptionRegistry>,
    disconnected: Arc<broadcast::Sender<()>>,
    call_timeout: Duration,
}

impl ProtocolClient {
    /// Connect to `endpoint` (a `ws://` debug endpoint URL), retrying with
    /// exponential back-off up to three attempts, re-resolving the endpoint
    /// each time (the caller passes a fresh URL; a stale target id maps to a
    /// different attempt).
    pub async fn connect(endpoint: &str, call_timeout: Duration) -> Result<Self, ClientError> {
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            match tokio_tungstenite::connect_async(endpoint).await {
                Ok((ws, _response)) => {
                    return Ok(Self::from_stream(ws, call_timeout));
                }
                Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
                    return Err(ClientError::HandshakeFailed(format!(
                        "unexpected HTTP status {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "connect attempt failed");
                    last_err = Some(e.to_string());
                    if attempt + 1 < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_BACKOFF_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        Err(ClientError::Unreachable(
            last_err.unwrap_or_else(|| "no connection attempts made".to_owned()),
        ))
    }

    fn from_stream(ws: WsStream, call_timeout: Duration) -> Self {
        let (writer, reader) = ws.split();
        let client = ProtocolClient {
            writer: Arc::new(AsyncMutex::new(writer)),
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(PendingTable::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            disconnected: Arc::new(broadcast::channel(1).0),
            call_timeout,
        };
        tokio::spawn(reader_loop(
            reader,
            Arc::clone(&client.pending),
            Arc::clone(&client.subscriptions),
            Arc::clone(&client.disconnected),
        ));
        client
    }

    /// Invoke a method call, optionally routed to an attached session.
    /// Blocks the caller until a matching reply arrives or `call_timeout`
    /// elapses.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        session_tag: Option<&str>,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id);
        let request = CallRequest {
            id,
            method: method.to_owned(),
            params,
            session_id: session_tag.map(str::to_owned),
        };
        let text = serde_json::to_string(&request)
            .expect("CallRequest always serializes")
            .into();
        {
            let mut writer = self.writer.lock().await;
            if writer.send(Message::Text(text)).await.is_err() {
                self.pending.forget(id);
                return Err(ClientError::Disconnected);
            }
        }
        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.pending.forget(id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Subscribe to an event by CDP method name, optionally scoped to one
    /// session tag. Events that arrive after subscribing are delivered in
    /// order through a bounded, drop-oldest queue.
    pub fn subscribe(&self, method: &str, filter: SessionFilter) -> EventStream {
        self.subscriptions.subscribe(method, filter)
    }

    /// Resolves once the connection is lost. Every clone of the client
    /// shares the same disconnect signal.
    pub async fn on_disconnect(&self) {
        let mut rx = self.disconnected.subscribe();
        let _ = rx.recv().await;
    }
}

async fn reader_loop(
    mut reader: futures_util::stream::SplitStream<WsStream>,
    pending: Arc<PendingTable>,
    subscriptions: Arc<SubscriptionRegistry>,
    disconnected: Arc<broadcast::Sender<()>>,
) {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => handle_incoming(&text, &pending, &subscriptions),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "protocol client read error");
                break;
            }
        }
    }
    info!("browser connection closed");
    pending.drain_disconnected();
    subscriptions.close_all();
    let _ = disconnected.send(());
}

fn handle_incoming(text: &str, pending: &PendingTable, subscriptions: &SubscriptionRegistry) {
    let msg: IncomingMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "dropping unparseable message");
            return;
        }
    };
    match msg {
        IncomingMessage::Reply(reply) => {
            let result = match reply.error {
                Some(err) => Err(ClientError::Protocol {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(reply.result.unwrap_or(serde_json::Value::Null)),
            };
            pending.complete(reply.id, result);
        }
        IncomingMessage::Event(event) => subscriptions.dispatch(Event {
            method: event.method,
            params: event.params,
            session_id: event.session_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();
                while let Some(Ok(Message::Text(text))) = read.next().await {
                    let req: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let reply = serde_json::json!({"id": req["id"], "result": {"echo": true}});
                    write
                        .send(Message::Text(reply.to_string().into()))
                        .await
                        .unwrap();
                }
            }
        });
        (format!("ws://{addr}"), handle)
    }

    #[tokio::test]
    async fn call_round_trips_a_result() {
        let (url, _server) = echo_server().await;
        let client = ProtocolClient::connect(&url, Duration::from_secs(2))
            .await
            .unwrap();
        let result = client
            .call("Target.getTargets", serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(result["echo"], true);
    }

    #[tokio::test]
    async fn connect_to_nothing_listening_is_unreachable() {
        let err = ProtocolClient::connect("ws://127.0.0.1:1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
    }
}
