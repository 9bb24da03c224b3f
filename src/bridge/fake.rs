//! In-memory [`Transport`] for unit tests of the request layer.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::error::Error;
use crate::ws::{ConnectionState, Event, Transport};

#[derive(Clone)]
pub(crate) struct FakeTransport {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: broadcast::Sender<Event>,
    emitted: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);

        Self {
            state_tx: Arc::new(state_tx),
            events_tx,
            emitted: Arc::default(),
        }
    }

    pub(crate) fn connected() -> Self {
        let transport = Self::new();
        transport.set_connected(true);
        transport
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        let state = if connected {
            ConnectionState::Connected {
                since: Instant::now(),
            }
        } else {
            ConnectionState::Disconnected
        };
        self.state_tx.send_replace(state);
    }

    pub(crate) fn respond(&self, event: &str, data: Value) {
        _ = self.events_tx.send(Event::new(event, data));
    }

    pub(crate) fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands emitted on `bash_command`, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.emitted()
            .into_iter()
            .filter(|(event, _)| event == "bash_command")
            .filter_map(|(_, data)| data["command"].as_str().map(str::to_owned))
            .collect()
    }
}

impl Transport for FakeTransport {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn emit(&self, event: &str, data: &Value) -> crate::Result<()> {
        if !self.is_connected() {
            return Err(Error::not_connected());
        }

        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_owned(), data.clone()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
