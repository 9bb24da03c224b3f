//! Seam between the socket transport and the request layer.

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use super::connection::{ConnectionState, Event};

/// An event transport the correlator and command queue can run on.
///
/// [`super::ConnectionManager`] is the production implementation; tests drive the
/// request layer through an in-memory one.
pub trait Transport: Clone + Send + Sync + 'static {
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Writes one event. Fails with [`crate::error::Kind::NotConnected`] when no
    /// connection is established.
    fn emit(&self, event: &str, data: &Value) -> crate::Result<()>;

    /// Every inbound event, in arrival order.
    fn subscribe(&self) -> broadcast::Receiver<Event>;

    fn state_receiver(&self) -> watch::Receiver<ConnectionState>;
}
