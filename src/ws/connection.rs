#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use super::codec::{Handshake, Packet};
use super::config::Config;
use super::error::WsError;
use super::traits::Transport;
use crate::error::{Error, Kind};
use crate::retry::{RetryPolicy, Schedule};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiter = oneshot::Sender<Result<()>>;

/// Broadcast channel capacity for incoming events.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, no attempt in progress
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Handshake completed
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting before the next automatic attempt
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// Automatic attempts are spent; only a manual retry reconnects
    Exhausted { attempts: u32 },
    /// Closed by the caller; terminal
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// A named event received from the server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: Value,
}

impl Event {
    #[must_use]
    pub fn new<S: Into<String>>(name: S, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Manages the Socket.IO connection lifecycle, heartbeat and reconnection.
///
/// The connection loop is started lazily by [`ConnectionManager::connect`] and runs
/// in a background task until [`ConnectionManager::disconnect`]:
/// - performs the WebSocket upgrade and the Engine.IO / Socket.IO handshakes
/// - answers server pings and drops connections that go silent past
///   `pingInterval + pingTimeout`
/// - reconnects on the schedule of the shared [`RetryPolicy`], parking in
///   [`ConnectionState::Exhausted`] once it is spent
/// - broadcasts every inbound event to all subscribers
///
/// Dropping the last handle stops the loop as if [`ConnectionManager::disconnect`]
/// had been called.
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new("http://localhost:5000", Config::default())?;
/// connection.connect().await?;
///
/// let mut events = connection.subscribe();
/// connection.emit("join_workspace", &json!({ "workspace_id": "ws-1" }))?;
/// while let Ok(event) = events.recv().await {
///     println!("{}: {}", event.name, event.data);
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    /// Cancels `inner.shutdown` when the last handle goes away
    _teardown: Arc<DropGuard>,
}

struct Inner {
    url: Url,
    config: Config,
    policy: Arc<RetryPolicy>,
    /// Reconnect delays; the attempt count comes from `policy`
    schedule: Schedule,
    state_tx: watch::Sender<ConnectionState>,
    /// Sender channel for outgoing frames
    sender_tx: mpsc::UnboundedSender<String>,
    /// Taken by the connection loop when it starts
    sender_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    broadcast_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
    /// Callers of `connect` waiting for the outcome of the next attempt
    waiters: Mutex<Vec<Waiter>>,
}

impl ConnectionManager {
    /// Create a connection manager with its own retry policy built from
    /// `config.reconnect`. Nothing is dialed until [`Self::connect`].
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let policy = Arc::new(RetryPolicy::new(config.reconnect.clone()));
        Self::with_policy(endpoint, config, policy)
    }

    /// Create a connection manager that shares `policy` with other liveness paths.
    ///
    /// Failed attempts count against `policy`; the delay between them follows
    /// `config.reconnect`.
    pub fn with_policy(endpoint: &str, config: Config, policy: Arc<RetryPolicy>) -> Result<Self> {
        let url = config.socket_url(&Url::parse(endpoint)?)?;
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let schedule = Schedule::new(&config.reconnect);
        let shutdown = CancellationToken::new();

        Ok(Self {
            _teardown: Arc::new(shutdown.clone().drop_guard()),
            inner: Arc::new(Inner {
                url,
                config,
                policy,
                schedule,
                state_tx,
                sender_tx,
                sender_rx: Mutex::new(Some(sender_rx)),
                broadcast_tx,
                shutdown,
                waiters: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Connects if not already connected and waits for the outcome of the next
    /// connection attempt.
    ///
    /// Starts the connection loop on first use. When automatic attempts are
    /// exhausted this counts as a manual retry. A failed attempt is returned as
    /// an error while the loop keeps retrying in the background.
    pub async fn connect(&self) -> Result<()> {
        let outcome = {
            let mut waiters = self.inner.waiters();
            match self.state() {
                ConnectionState::Connected { .. } => return Ok(()),
                ConnectionState::Closed => return Err(WsError::ConnectionClosed.into()),
                _ => {}
            }

            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        };

        self.start();
        if matches!(self.state(), ConnectionState::Exhausted { .. }) {
            self.inner.policy.retry();
        }

        outcome.await.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Manual retry: resets the attempt counter and reconnects immediately if the
    /// loop is waiting or exhausted.
    pub fn retry(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        self.inner.policy.retry();
        self.start();
    }

    /// Closes the connection for good. Pending [`Self::connect`] calls fail.
    pub fn disconnect(&self) {
        self.inner.shutdown.cancel();
        self.inner.state_tx.send_replace(ConnectionState::Closed);

        let waiters = std::mem::take(&mut *self.inner.waiters());
        for waiter in waiters {
            _ = waiter.send(Err(WsError::ConnectionClosed.into()));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.inner.url, "socket closed by caller");
    }

    /// Send an event to the server.
    pub fn emit(&self, event: &str, data: &Value) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::not_connected());
        }

        let frame = Packet::event(&self.inner.config.namespace, event, data.clone()).encode();
        self.inner
            .sender_tx
            .send(frame)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to incoming events.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive events concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Subscribe to connection state changes.
    ///
    /// Useful for detecting reconnections and re-sending session state.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.inner.policy
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    fn start(&self) {
        let Some(sender_rx) = self
            .inner
            .sender_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.connection_loop(sender_rx).await;
        });
    }
}

impl Inner {
    fn waiters(&self) -> MutexGuard<'_, Vec<Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        if self.shutdown.is_cancelled() {
            return;
        }

        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn connected(&self) {
        let waiters = {
            let mut waiters = self.waiters();
            self.set_state(ConnectionState::Connected {
                since: Instant::now(),
            });
            std::mem::take(&mut *waiters)
        };

        for waiter in waiters {
            _ = waiter.send(Ok(()));
        }
    }

    fn attempt_failed(&self, error: &Error) {
        let reason = match error.downcast_ref::<WsError>() {
            Some(WsError::Handshake(reason)) => reason.clone(),
            _ => error.message(),
        };

        let waiters = std::mem::take(&mut *self.waiters());
        for waiter in waiters {
            _ = waiter.send(Err(Error::with_source(
                Kind::Connection,
                WsError::Handshake(reason.clone()),
            )));
        }
    }

    /// Main connection loop with automatic reconnection.
    async fn connection_loop(self: Arc<Self>, mut sender_rx: mpsc::UnboundedReceiver<String>) {
        let mut retry_signal = self.policy.retry_signal();

        loop {
            drop(retry_signal.borrow_and_update());
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                () = self.shutdown.cancelled() => break,
                opened = self.open() => opened,
            };

            match opened {
                Ok((stream, handshake)) => {
                    self.policy.reset();
                    self.connected();

                    #[cfg(feature = "tracing")]
                    tracing::info!(url = %self.url, sid = %handshake.sid, "socket connected");

                    if let Err(e) = self
                        .handle_connection(stream, &handshake, &mut sender_rx)
                        .await
                    {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "socket connection lost");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }

                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Disconnected);

                    // A retry requested while connected must not cut the first delay short.
                    drop(retry_signal.borrow_and_update());
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, error = %e, "unable to connect");
                    self.attempt_failed(&e);
                }
            }

            if let Some(delay) = self.policy.next_delay_from(&self.schedule) {
                self.set_state(ConnectionState::Reconnecting {
                    attempt: self.policy.attempts(),
                });

                #[cfg(feature = "tracing")]
                tracing::debug!(?delay, attempt = self.policy.attempts(), "reconnecting");

                tokio::select! {
                    () = sleep(delay) => {}
                    _ = retry_signal.changed() => {}
                    () = self.shutdown.cancelled() => break,
                }
            } else {
                self.set_state(ConnectionState::Exhausted {
                    attempts: self.policy.attempts(),
                });

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = self.policy.attempts(),
                    "reconnection attempts exhausted, waiting for manual retry"
                );

                tokio::select! {
                    changed = retry_signal.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = self.shutdown.cancelled() => break,
                }
            }
        }
    }

    async fn open(&self) -> Result<(WsStream, Handshake)> {
        timeout(self.config.handshake_timeout, self.handshake())
            .await
            .map_err(|_elapsed| WsError::Timeout)?
    }

    /// WebSocket upgrade, Engine.IO `open`, then Socket.IO `CONNECT` on the namespace.
    async fn handshake(&self) -> Result<(WsStream, Handshake)> {
        let (mut stream, _) = connect_async(self.url.as_str()).await?;

        let handshake = loop {
            match next_packet(&mut stream).await? {
                Packet::Open(handshake) => break handshake,
                Packet::Noop => {}
                other => {
                    return Err(WsError::Handshake(format!(
                        "expected open packet, received {other:?}"
                    ))
                    .into());
                }
            }
        };

        let connect = Packet::Connect {
            namespace: self.config.namespace.clone(),
            data: None,
        };
        stream.send(Message::Text(connect.encode().into())).await?;

        loop {
            match next_packet(&mut stream).await? {
                Packet::Connect { namespace, .. } if namespace == self.config.namespace => {
                    return Ok((stream, handshake));
                }
                Packet::ConnectError { message, .. } => {
                    return Err(WsError::Handshake(message).into());
                }
                Packet::Ping => {
                    stream.send(Message::Text(Packet::Pong.encode().into())).await?;
                }
                _ => {}
            }
        }
    }

    /// Handle an active connection until it drops or the manager shuts down.
    async fn handle_connection(
        &self,
        stream: WsStream,
        handshake: &Handshake,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let (mut write, mut read) = stream.split();
        let deadline = handshake.ping_deadline();
        let watchdog = sleep(deadline);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let disconnect = Packet::Disconnect {
                        namespace: self.config.namespace.clone(),
                    };
                    _ = write.send(Message::Text(disconnect.encode().into())).await;
                    _ = write.close().await;
                    return Ok(());
                }

                () = &mut watchdog => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?deadline, "no frames received within ping deadline");
                    return Err(WsError::Timeout.into());
                }

                frame = read.next() => {
                    watchdog.as_mut().reset(tokio::time::Instant::now() + deadline);

                    match frame {
                        Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str()) {
                            Ok(Packet::Ping) => {
                                write.send(Message::Text(Packet::Pong.encode().into())).await?;
                            }
                            Ok(Packet::Event { namespace, name, data, .. })
                                if namespace == self.config.namespace =>
                            {
                                #[cfg(feature = "tracing")]
                                tracing::trace!(%name, "received event");
                                _ = self.broadcast_tx.send(Event { name, data });
                            }
                            Ok(Packet::Disconnect { namespace }) if namespace == self.config.namespace => {
                                return Err(WsError::ConnectionClosed.into());
                            }
                            Ok(Packet::Close) => return Err(WsError::ConnectionClosed.into()),
                            Ok(_) => {}
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(text = %text.as_str(), error = %e, "failed to decode socket frame");
                                #[cfg(not(feature = "tracing"))]
                                let _ = (&text, &e);
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(WsError::ConnectionClosed.into());
                        }
                        Some(Err(e)) => return Err(WsError::Connection(e).into()),
                        Some(Ok(_)) => {
                            // Binary frames are unsupported; transport-level pings are answered by tungstenite.
                        }
                    }
                }

                Some(frame) = sender_rx.recv() => {
                    write.send(Message::Text(frame.into())).await?;
                }
            }
        }
    }
}

async fn next_packet(stream: &mut WsStream) -> Result<Packet> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Packet::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => return Err(WsError::ConnectionClosed.into()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(_)) => {}
        }
    }
}

impl Transport for ConnectionManager {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn emit(&self, event: &str, data: &Value) -> Result<()> {
        ConnectionManager::emit(self, event, data)
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        ConnectionManager::subscribe(self)
    }

    fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        ConnectionManager::state_receiver(self)
    }
}
