use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bon::Builder;
use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::Result;
use crate::api::Client;
use crate::retry::{RetryConfig, RetryPolicy, Schedule, Strategy};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_STEP: Duration = Duration::from_millis(1500);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// The endpoint that answered a probe.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Endpoint {
    #[strum(serialize = "GET /api/status")]
    Status,
    #[strum(serialize = "GET /api/ping")]
    Ping,
    #[strum(serialize = "HEAD /")]
    Root,
}

/// Liveness of the backend as seen by the prober.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    /// No probe has run yet.
    Unknown,
    Checking,
    Connected {
        endpoint: Endpoint,
    },
    /// The last probe failed; another runs after `retry_in`.
    Disconnected {
        attempt: u32,
        retry_in: Duration,
        reason: String,
    },
    /// Automatic retries are exhausted; waiting for [`StatusProber::retry`].
    Failed {
        attempts: u32,
        reason: String,
    },
}

impl ProbeState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Configuration for a [`StatusProber`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ProbeConfig {
    /// Deadline for each HTTP request of a probe.
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,
    /// Re-probe periodically while connected. `None` probes again only on
    /// [`StatusProber::recheck`].
    pub recheck_interval: Option<Duration>,
    /// Retry delays. `enabled` and `max_attempts` only apply when the prober
    /// owns its policy; a shared policy sets the budget.
    #[builder(default = default_retry())]
    pub retry: RetryConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_retry() -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(DEFAULT_MAX_ATTEMPTS)
        .delay(DEFAULT_RETRY_STEP)
        .strategy(Strategy::Linear)
        .build()
}

/// Decides whether the backend is reachable before calls are attempted.
///
/// A probe tries `GET /api/status`, then `GET /api/ping`, then `HEAD /`; the
/// first success marks the backend connected. Failures are retried on the
/// [`RetryPolicy`] schedule until it is exhausted, after which the prober stays
/// [`ProbeState::Failed`] until a manual retry. Every transition is published on
/// [`StatusProber::state_receiver`].
///
/// The background loop ends with [`StatusProber::stop`] or when the last handle
/// is dropped.
///
/// # Example
///
/// ```no_run
/// use codestorm_bridge::status::{ProbeConfig, StatusProber};
///
/// # async fn example() -> codestorm_bridge::Result<()> {
/// let prober = StatusProber::new("http://localhost:5000", ProbeConfig::default())?;
/// prober.start();
///
/// let mut states = prober.state_receiver();
/// while states.changed().await.is_ok() {
///     println!("backend: {:?}", *states.borrow());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StatusProber {
    inner: Arc<Inner>,
    _teardown: Arc<DropGuard>,
}

struct Inner {
    client: Client,
    config: ProbeConfig,
    policy: Arc<RetryPolicy>,
    schedule: Schedule,
    state_tx: watch::Sender<ProbeState>,
    recheck: Notify,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl StatusProber {
    /// Creates a prober with its own retry policy built from `config.retry`.
    pub fn new(host: &str, config: ProbeConfig) -> Result<Self> {
        let policy = Arc::new(RetryPolicy::new(config.retry.clone()));
        Self::with_policy(host, config, policy)
    }

    /// Creates a prober whose failures count against a shared `policy`, waiting
    /// between probes on the `config.retry` schedule.
    pub fn with_policy(host: &str, config: ProbeConfig, policy: Arc<RetryPolicy>) -> Result<Self> {
        let client = Client::with_timeout(host, config.request_timeout)?;
        let (state_tx, _) = watch::channel(ProbeState::Unknown);
        let schedule = Schedule::new(&config.retry);
        let shutdown = CancellationToken::new();

        Ok(Self {
            _teardown: Arc::new(shutdown.clone().drop_guard()),
            inner: Arc::new(Inner {
                client,
                config,
                policy,
                schedule,
                state_tx,
                recheck: Notify::new(),
                started: AtomicBool::new(false),
                shutdown,
            }),
        })
    }

    /// Runs one probe cascade without touching the state or the policy.
    pub async fn probe(&self) -> Result<Endpoint> {
        self.inner.probe().await
    }

    /// Runs one probe and records the outcome: success resets the policy, failure
    /// consumes one attempt. Returns the new state.
    pub async fn check(&self) -> ProbeState {
        self.inner.check().await
    }

    /// Starts the background loop that probes, retries and rechecks. Calling it
    /// again has no effect.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        tokio::spawn(Arc::clone(&self.inner).run());
    }

    /// Manual retry: resets the attempt counter and probes again immediately.
    pub fn retry(&self) {
        self.inner.policy.retry();
    }

    /// Probes again now, also while connected.
    pub fn recheck(&self) {
        self.inner.recheck.notify_one();
    }

    /// Stops the background loop. The last state is kept.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    #[must_use]
    pub fn state(&self) -> ProbeState {
        self.inner.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ProbeState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.inner.policy
    }

    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.inner.config
    }
}

impl Inner {
    async fn probe(&self) -> Result<Endpoint> {
        match self.client.status().await {
            Ok(_) => return Ok(Endpoint::Status),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "status endpoint failed, trying ping");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        match self.client.ping().await {
            Ok(_) => return Ok(Endpoint::Ping),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "ping endpoint failed, trying root");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        self.client.root_alive().await?;

        #[cfg(feature = "tracing")]
        tracing::warn!("server is up but its API routes are not answering");

        Ok(Endpoint::Root)
    }

    async fn check(&self) -> ProbeState {
        self.state_tx.send_replace(ProbeState::Checking);

        let state = match self.probe().await {
            Ok(endpoint) => {
                self.policy.reset();
                ProbeState::Connected { endpoint }
            }
            Err(e) => {
                let reason = e.message();
                match self.policy.next_delay_from(&self.schedule) {
                    Some(retry_in) => ProbeState::Disconnected {
                        attempt: self.policy.attempts(),
                        retry_in,
                        reason,
                    },
                    None => ProbeState::Failed {
                        attempts: self.policy.attempts(),
                        reason,
                    },
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(?state, "probe finished");

        self.state_tx.send_replace(state.clone());
        state
    }

    async fn run(self: Arc<Self>) {
        let mut retry_signal = self.policy.retry_signal();

        loop {
            drop(retry_signal.borrow_and_update());

            let checked = tokio::select! {
                state = self.check() => state,
                () = self.shutdown.cancelled() => break,
            };

            let wait = match checked {
                ProbeState::Connected { .. } => self.config.recheck_interval,
                ProbeState::Disconnected { retry_in, .. } => Some(retry_in),
                _ => None,
            };

            let stopped = match wait {
                Some(delay) => tokio::select! {
                    () = sleep(delay) => false,
                    () = self.recheck.notified() => false,
                    changed = retry_signal.changed() => changed.is_err(),
                    () = self.shutdown.cancelled() => true,
                },
                None => tokio::select! {
                    () = self.recheck.notified() => false,
                    changed = retry_signal.changed() => changed.is_err(),
                    () = self.shutdown.cancelled() => true,
                },
            };

            if stopped {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("status prober stopped");
    }
}
