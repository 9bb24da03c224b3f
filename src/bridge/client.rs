use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use bon::Builder;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::correlator::Correlator;
use super::queue::CommandQueue;
use super::types::{
    AssistantResponse, CommandRequest, CommandResult, DEFAULT_MODEL, ExecuteCommandRequest,
    JoinWorkspaceRequest, NaturalLanguageRequest, Notification, Request, RequestKind,
};
use crate::retry::RetryPolicy;
use crate::serde_helpers::deserialize_with_warnings;
use crate::ws::{self, ConnectionManager, ConnectionState, Transport, WsError};
use crate::{DEFAULT_USER_ID, Result};

/// Configuration for a [`Bridge`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct Config {
    #[builder(default)]
    pub socket: ws::Config,
    /// Start connecting as soon as the bridge is created
    #[builder(default = true)]
    pub auto_connect: bool,
    #[builder(default = DEFAULT_USER_ID.to_owned())]
    pub user_id: String,
    /// Workspace room joined on every (re)connect
    pub workspace_id: Option<String>,
    #[builder(default = DEFAULT_MODEL.to_owned())]
    pub default_model: String,
    #[builder(default = RequestKind::BashCommand.default_timeout())]
    pub command_timeout: Duration,
    #[builder(default = RequestKind::NaturalLanguage.default_timeout())]
    pub natural_language_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-call overrides of the bridge configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use codestorm_bridge::bridge::CallOptions;
///
/// let options = CallOptions::builder()
///     .timeout(Duration::from_secs(60))
///     .directory("frontend")
///     .build();
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
#[builder(on(String, into))]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub terminal_id: Option<String>,
    pub directory: Option<String>,
}

/// Reliable request/response calls over the backend's Socket.IO endpoint.
///
/// Commands submitted while disconnected are queued and sent in order once the
/// connection comes up; every request is correlated with its response and bounded
/// by a timeout. On each connect the bridge joins the configured workspace before
/// flushing the queue.
///
/// Dropping the last handle disconnects, like [`Bridge::disconnect`].
///
/// # Example
///
/// ```no_run
/// use codestorm_bridge::bridge::{Bridge, CallOptions, Config};
///
/// # async fn example() -> codestorm_bridge::Result<()> {
/// let bridge = Bridge::new("http://localhost:5000", Config::default())?;
///
/// let result = bridge.send_command("ls -la", &CallOptions::default()).await?;
/// println!("{}", result.output.unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: Config,
    connection: ConnectionManager,
    correlator: Correlator<ConnectionManager>,
    queue: CommandQueue<ConnectionManager>,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Creates a bridge whose connection owns its retry policy. Must be called
    /// from within a Tokio runtime.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let connection = ConnectionManager::new(endpoint, config.socket.clone())?;
        Ok(Self::with_connection(connection, config))
    }

    /// Creates a bridge whose reconnection follows a shared `policy`.
    pub fn with_policy(endpoint: &str, config: Config, policy: Arc<RetryPolicy>) -> Result<Self> {
        let connection = ConnectionManager::with_policy(endpoint, config.socket.clone(), policy)?;
        Ok(Self::with_connection(connection, config))
    }

    fn with_connection(connection: ConnectionManager, config: Config) -> Self {
        let correlator = Correlator::new(connection.clone());
        let queue = CommandQueue::new(correlator.clone());
        let shutdown = CancellationToken::new();

        tokio::spawn(handle_lifecycle(
            correlator.clone(),
            queue.clone(),
            config.workspace_id.clone(),
            shutdown.clone(),
        ));

        if config.auto_connect {
            let connection = connection.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.connect().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "initial connection failed, retrying in background");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            });
        }

        Self {
            inner: Arc::new(BridgeInner {
                config,
                connection,
                correlator,
                queue,
                shutdown,
            }),
        }
    }

    /// Connects and waits for the outcome of the next connection attempt.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await
    }

    /// Ends the session: closes the socket, stops reconnecting and fails every
    /// queued and in-flight request.
    pub fn disconnect(&self) {
        self.inner.close();
    }

    /// Manual retry after reconnection attempts are exhausted.
    pub fn retry(&self) {
        self.inner.connection.retry();
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        self.inner.connection.policy()
    }

    /// Runs a shell command, answered by `command_result`.
    ///
    /// Queued while disconnected; times out after `command_timeout` (10 s by
    /// default) counted from when the command is sent.
    pub async fn send_command(&self, command: &str, options: &CallOptions) -> Result<CommandResult> {
        let request = CommandRequest::builder()
            .command(command)
            .user_id(self.user_id(options))
            .maybe_terminal_id(options.terminal_id.clone())
            .maybe_directory(options.directory.clone())
            .build();
        let timeout = options.timeout.unwrap_or(self.inner.config.command_timeout);

        let payload = self.inner.queue.submit(request.into(), timeout).await?;
        parse(payload)
    }

    /// Sends a natural-language instruction to the assistant, answered by
    /// `assistant_response`. Never queued: fails immediately while disconnected.
    pub async fn process_natural_language(
        &self,
        text: &str,
        options: &CallOptions,
    ) -> Result<AssistantResponse> {
        let request = NaturalLanguageRequest::builder()
            .text(text)
            .model(
                options
                    .model
                    .clone()
                    .unwrap_or_else(|| self.inner.config.default_model.clone()),
            )
            .user_id(self.user_id(options))
            .maybe_directory(options.directory.clone())
            .build();
        let timeout = options
            .timeout
            .unwrap_or(self.inner.config.natural_language_timeout);

        let payload = self.inner.correlator.call(&request.into(), timeout).await?;
        parse(payload)
    }

    /// Types `command` into the terminal session `terminal_id`.
    pub async fn execute_command(
        &self,
        command: &str,
        terminal_id: &str,
        options: &CallOptions,
    ) -> Result<CommandResult> {
        let request = ExecuteCommandRequest::builder()
            .command(command)
            .terminal_id(terminal_id)
            .user_id(self.user_id(options))
            .build();
        let timeout = options.timeout.unwrap_or(self.inner.config.command_timeout);

        let payload = self.inner.correlator.call(&request.into(), timeout).await?;
        parse(payload)
    }

    /// Joins a workspace room so the server routes its notifications here.
    pub fn join_workspace(&self, workspace_id: &str) -> Result<()> {
        let request = JoinWorkspaceRequest::builder()
            .workspace_id(workspace_id)
            .build();

        // Fire and forget: the pending response is already settled.
        drop(self.inner.correlator.dispatch(&request.into())?);
        Ok(())
    }

    /// Sends any request, queueing it when its kind allows. Returns the raw
    /// response payload.
    pub async fn submit(&self, request: Request, timeout: Option<Duration>) -> Result<Value> {
        let timeout = timeout.unwrap_or_else(|| match request.kind() {
            RequestKind::NaturalLanguage => self.inner.config.natural_language_timeout,
            _ => self.inner.config.command_timeout,
        });

        self.inner.queue.submit(request, timeout).await
    }

    /// Stream of server notifications relevant to the configured user.
    ///
    /// `file_change` events addressed to another user are filtered out unless
    /// they are broadcast. Malformed notifications are skipped.
    pub fn notifications(&self) -> impl Stream<Item = Result<Notification>> + use<> {
        let mut events = self.inner.connection.subscribe();
        let user_id = self.inner.config.user_id.clone();

        try_stream! {
            loop {
                match events.recv().await {
                    Ok(event) => match Notification::from_event(&event) {
                        Ok(Some(notification)) if notification.is_relevant_to(&user_id) => {
                            yield notification;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(event = %event.name, error = %e, "skipping malformed notification");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    },
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("notification stream lagged, missed {count} events");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Commands waiting for the connection.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.inner.queue.len()
    }

    /// Requests sent and still waiting for a response.
    #[must_use]
    pub fn outstanding_requests(&self) -> usize {
        self.inner.correlator.outstanding_count()
    }

    fn user_id(&self, options: &CallOptions) -> String {
        options
            .user_id
            .clone()
            .unwrap_or_else(|| self.inner.config.user_id.clone())
    }
}

impl BridgeInner {
    fn close(&self) {
        self.connection.disconnect();
        self.queue.cancel_all();
        self.correlator.close();
        self.shutdown.cancel();
    }
}

impl Drop for BridgeInner {
    /// The last [`Bridge`] handle ends the session.
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.close();
        }
    }
}

/// Joins the workspace and flushes the command queue on every connect.
async fn handle_lifecycle<T: Transport>(
    correlator: Correlator<T>,
    queue: CommandQueue<T>,
    workspace_id: Option<String>,
    shutdown: CancellationToken,
) {
    let mut state_rx = correlator.transport().state_receiver();

    loop {
        let state = *state_rx.borrow_and_update();

        match state {
            ConnectionState::Connected { .. } => {
                if let Some(workspace_id) = &workspace_id {
                    let request = JoinWorkspaceRequest::builder()
                        .workspace_id(workspace_id)
                        .build();
                    if let Err(e) = correlator.dispatch(&request.into()) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%workspace_id, error = %e, "failed to join workspace");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }

                let flushed = queue.drain();
                #[cfg(feature = "tracing")]
                tracing::debug!(flushed, "connected");
                #[cfg(not(feature = "tracing"))]
                let _ = flushed;
            }
            ConnectionState::Closed => break,
            _ => {}
        }

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T> {
    deserialize_with_warnings(payload)
}
