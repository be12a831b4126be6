//! A stub CDP browser endpoint for integration tests.
//!
//! Grounded on `rt-test-utils::mock_ws_server::MockWsServer`: bind to
//! `127.0.0.1:0`, accept exactly the one connection the engine opens, and
//! answer every call with a canned or default result while letting the test
//! push unsolicited events (`targetCreated`, navigation, disconnect) on its
//! own schedule.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

pub struct StubBrowser {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Message>,
    responses: Arc<Mutex<HashMap<String, Value>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl StubBrowser {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let responses = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let responses_for_task = Arc::clone(&responses);
        let task = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();
                let mut outgoing_rx = outgoing_rx;

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(reply) = build_reply(&text, &responses_for_task) {
                                        if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => continue,
                                Some(Err(_)) => break,
                            }
                        }
                        out = outgoing_rx.recv() => {
                            match out {
                                Some(m) => {
                                    if write.send(m).await.is_err() { break; }
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
        });

        StubBrowser {
            addr,
            outgoing: outgoing_tx,
            responses,
            _task: task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Override the canned result returned for `method` (default: `{}`).
    pub fn set_response(&self, method: &str, result: Value) {
        self.responses.lock().unwrap().insert(method.to_owned(), result);
    }

    /// Push an unsolicited CDP event to the (sole) connected client.
    pub fn push_event(&self, method: &str, params: Value, session_id: Option<&str>) {
        let mut payload = json!({"method": method, "params": params});
        if let Some(sid) = session_id {
            payload["sessionId"] = json!(sid);
        }
        let _ = self.outgoing.send(Message::Text(payload.to_string().into()));
    }

    /// Drop the connection to simulate the browser disappearing.
    pub fn disconnect(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }
}

fn build_reply(text: &str, responses: &Mutex<HashMap<String, Value>>) -> Option<Value> {
    let req: Value = serde_json::from_str(text).ok()?;
    let id = req.get("id")?.clone();
    let method = req.get("method")?.as_str()?.to_owned();

    let result = responses
        .lock()
        .unwrap()
        .get(&method)
        .cloned()
        .unwrap_or_else(|| default_result(&method));

    Some(json!({"id": id, "result": result}))
}

fn default_result(method: &str) -> Value {
    match method {
        "Target.attachToTarget" => json!({"sessionId": format!("session-{}", uuid::Uuid::new_v4())}),
        "Target.getTargets" => json!({"targetInfos": []}),
        _ => json!({}),
    }
}
