//! One connection to the backend, owned end to end.
//!
//! **Feature flags:** `ws` and `status`
//!
//! A [`Session`] builds the socket bridge and the status prober around a single
//! [`RetryPolicy`], so both liveness paths spend the same attempt budget and a
//! single [`Session::retry`] revives both after exhaustion. Each path keeps its
//! own delay schedule: the socket reconnects on `bridge.socket.reconnect` (fixed
//! by default), the prober backs off on `probe.retry` (linear by default).
//!
//! Build one when the user starts working and call [`Session::shutdown`] when
//! they are done; dropping the last handle has the same effect.

use std::sync::Arc;

use bon::Builder;

use crate::Result;
use crate::bridge::{self, Bridge};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::status::{ProbeConfig, ProbeState, StatusProber};
use crate::ws::ConnectionState;

/// Configuration for a [`Session`].
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct SessionConfig {
    #[builder(default)]
    pub bridge: bridge::Config,
    #[builder(default)]
    pub probe: ProbeConfig,
    /// Shared budget: `enabled` and `max_attempts` govern both paths.
    #[builder(default)]
    pub retry: RetryConfig,
}

/// Bridge and prober for one backend, sharing one retry policy.
///
/// # Example
///
/// ```no_run
/// use codestorm_bridge::bridge::CallOptions;
/// use codestorm_bridge::session::{Session, SessionConfig};
///
/// # async fn example() -> codestorm_bridge::Result<()> {
/// let session = Session::new("http://localhost:5000", SessionConfig::default())?;
/// session.start().await?;
///
/// let result = session.bridge().send_command("pwd", &CallOptions::default()).await?;
/// println!("{:?}", result.output);
///
/// session.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    bridge: Bridge,
    prober: StatusProber,
    policy: Arc<RetryPolicy>,
}

impl Session {
    /// Must be called from within a Tokio runtime.
    pub fn new(endpoint: &str, config: SessionConfig) -> Result<Self> {
        let policy = Arc::new(RetryPolicy::new(config.retry));
        let bridge = Bridge::with_policy(endpoint, config.bridge, Arc::clone(&policy))?;
        let prober = StatusProber::with_policy(endpoint, config.probe, Arc::clone(&policy))?;

        Ok(Self {
            bridge,
            prober,
            policy,
        })
    }

    /// Starts probing and waits for the outcome of the first connection attempt.
    ///
    /// A failed attempt is returned, but both paths keep retrying in the
    /// background.
    pub async fn start(&self) -> Result<()> {
        self.prober.start();
        self.bridge.connect().await
    }

    /// Manual retry for both paths: resets the shared attempt counter.
    pub fn retry(&self) {
        self.bridge.retry();
    }

    /// Closes the socket, fails pending calls and stops probing.
    pub fn shutdown(&self) {
        self.bridge.disconnect();
        self.prober.stop();

        #[cfg(feature = "tracing")]
        tracing::debug!("session shut down");
    }

    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    #[must_use]
    pub fn prober(&self) -> &StatusProber {
        &self.prober
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.bridge.state()
    }

    #[must_use]
    pub fn probe_state(&self) -> ProbeState {
        self.prober.state()
    }
}
