#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use codestorm_bridge::bridge::Config;
use codestorm_bridge::retry::RetryConfig;
use codestorm_bridge::ws;
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const OPEN: &str =
    r#"0{"sid":"mock-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

#[derive(Debug, Clone)]
enum Control {
    Frame(String),
    Drop,
}

/// In-process Socket.IO server speaking Engine.IO v4 over a WebSocket.
///
/// Accepts any number of clients, records every event they emit and lets the
/// test push events to all of them.
pub struct MockSocketServer {
    addr: SocketAddr,
    control_tx: broadcast::Sender<Control>,
    events_rx: mpsc::UnboundedReceiver<(String, Value)>,
    handshakes: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl MockSocketServer {
    /// Start a server that accepts every namespace connect.
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Start a server that answers every namespace connect with `44`.
    pub async fn start_rejecting(message: &str) -> Self {
        Self::spawn(Some(message.to_owned())).await
    }

    async fn spawn(reject: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (control_tx, _) = broadcast::channel::<Control>(100);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));

        let server = (
            control_tx.clone(),
            Arc::clone(&handshakes),
            Arc::clone(&connections),
        );
        tokio::spawn(async move {
            let (control_tx, handshakes, connections) = server;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let events_tx = events_tx.clone();
                let mut control_rx = control_tx.subscribe();
                let handshakes = Arc::clone(&handshakes);
                let connections = Arc::clone(&connections);
                let reject = reject.clone();

                tokio::spawn(async move {
                    handshakes.fetch_add(1, Ordering::SeqCst);
                    if write.send(Message::Text(OPEN.into())).await.is_err() {
                        return;
                    }

                    // Namespace connect
                    match read.next().await {
                        Some(Ok(Message::Text(text))) if text.as_str().starts_with("40") => {}
                        _ => return,
                    }

                    if let Some(message) = reject {
                        let frame = format!("44{}", json!({ "message": message }));
                        _ = write.send(Message::Text(frame.into())).await;
                        _ = write.close().await;
                        return;
                    }

                    if write
                        .send(Message::Text(r#"40{"sid":"mock-socket"}"#.into()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    connections.fetch_add(1, Ordering::SeqCst);

                    loop {
                        tokio::select! {
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(event) = parse_event(text.as_str()) {
                                        drop(events_tx.send(event));
                                    } else if text.as_str() == "41" {
                                        break;
                                    }
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            control = control_rx.recv() => match control {
                                Ok(Control::Frame(frame)) => {
                                    if write.send(Message::Text(frame.into())).await.is_err() {
                                        break;
                                    }
                                }
                                // Abrupt drop: no close frame.
                                Ok(Control::Drop) | Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            control_tx,
            events_rx,
            handshakes,
            connections,
        }
    }

    /// HTTP base URL a bridge is pointed at.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Emit `name` with `data` to every connected client.
    pub fn emit(&self, name: &str, data: &Value) {
        let frame = format!("42{}", json!([name, data]));
        drop(self.control_tx.send(Control::Frame(frame)));
    }

    /// Send a raw Engine.IO frame to every connected client.
    pub fn send_raw(&self, frame: &str) {
        drop(self.control_tx.send(Control::Frame(frame.to_owned())));
    }

    /// Drop every live connection without a close handshake.
    pub fn drop_connections(&self) {
        drop(self.control_tx.send(Control::Drop));
    }

    /// Next event emitted by a client.
    pub async fn recv_event(&mut self) -> Option<(String, Value)> {
        timeout(RECV_TIMEOUT, self.events_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next event, answered with `response_event` carrying its `request_id`.
    pub async fn respond(&mut self, response_event: &str, mut payload: Value) -> (String, Value) {
        let (name, data) = self.recv_event().await.unwrap();
        if let Some(id) = data.get("request_id") {
            payload["request_id"] = id.clone();
        }
        self.emit(response_event, &payload);
        (name, data)
    }

    /// WebSocket sessions opened, including rejected ones.
    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Namespace connects accepted.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn parse_event(text: &str) -> Option<(String, Value)> {
    let body = text.strip_prefix("42")?;
    let Value::Array(mut args) = serde_json::from_str(body).ok()? else {
        return None;
    };
    if args.is_empty() {
        return None;
    }
    let name = args.remove(0).as_str()?.to_owned();
    let data = args.into_iter().next().unwrap_or(Value::Null);
    Some((name, data))
}

/// Poll `condition` until it holds or the receive timeout elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Socket config with fast reconnection for tests.
#[must_use]
pub fn fast_socket(max_attempts: u32) -> ws::Config {
    ws::Config::builder()
        .reconnect(
            RetryConfig::builder()
                .max_attempts(max_attempts)
                .delay(Duration::from_millis(20))
                .build(),
        )
        .handshake_timeout(Duration::from_secs(2))
        .build()
}

/// Bridge config that waits for an explicit `connect`.
#[must_use]
pub fn manual_config() -> Config {
    Config::builder()
        .socket(fast_socket(5))
        .auto_connect(false)
        .build()
}
