//! Request/response correlation over the event transport.
//!
//! Every request that expects an answer is registered under its response event
//! with a fresh `request_id` before it is emitted. A single routing task reads the
//! inbound event stream and settles registrations:
//! - a response carrying a known `request_id` settles that request
//! - a response carrying an unknown `request_id` is stale and dropped
//! - a response without an id settles the oldest request waiting on that event
//!
//! A registration is removed exactly once, by whichever of response, timeout,
//! cancellation or drop comes first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{Request, RequestKind, error_message, is_success, request_id_of};
use crate::error::Error;
use crate::ws::{ConnectionState, Event, Transport, WsError};
use crate::Result;

/// Maximum requests awaiting a response before new ones are rejected.
pub const MAX_OUTSTANDING_REQUESTS: usize = 256;

type Settlement = Result<Value>;
type OutstandingMap = DashMap<&'static str, VecDeque<Outstanding>>;

struct Outstanding {
    id: String,
    tx: oneshot::Sender<Settlement>,
}

/// Matches asynchronous responses to the requests that caused them.
#[derive(Clone)]
pub struct Correlator<T: Transport> {
    transport: T,
    outstanding: Arc<OutstandingMap>,
    shutdown: CancellationToken,
}

impl<T: Transport> Correlator<T> {
    /// Creates the correlator and starts its routing task.
    pub fn new(transport: T) -> Self {
        let outstanding = Arc::new(OutstandingMap::new());
        let shutdown = CancellationToken::new();

        let events = transport.subscribe();
        tokio::spawn(route_responses(
            events,
            Arc::clone(&outstanding),
            shutdown.clone(),
        ));

        Self {
            transport,
            outstanding,
            shutdown,
        }
    }

    /// Validates, registers and emits `request` without waiting for the answer.
    ///
    /// Fails with [`crate::error::Kind::NotConnected`] without emitting anything
    /// when the transport is not connected.
    pub fn dispatch(&self, request: &Request) -> Result<PendingResponse> {
        request.validate()?;

        if !self.transport.is_connected() {
            return Err(Error::not_connected());
        }

        let kind = request.kind();
        let Some(response_event) = kind.response_event() else {
            self.transport
                .emit(kind.event_name(), &request.to_payload(None)?)?;
            return Ok(PendingResponse::settled(kind));
        };

        let outstanding = self.outstanding_count();
        if outstanding >= MAX_OUTSTANDING_REQUESTS {
            return Err(Error::validation(format!(
                "too many outstanding requests: {outstanding}/{MAX_OUTSTANDING_REQUESTS}"
            )));
        }

        let id = Uuid::new_v4().to_string();
        let payload = request.to_payload(Some(&id))?;
        let (tx, rx) = oneshot::channel();

        // Registered before emitting so a fast response cannot be missed.
        self.outstanding
            .entry(response_event)
            .or_default()
            .push_back(Outstanding { id: id.clone(), tx });

        let registration = Registration {
            outstanding: Arc::clone(&self.outstanding),
            event: response_event,
            id,
        };

        if let Err(e) = self.transport.emit(kind.event_name(), &payload) {
            registration.remove();
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%kind, request_id = %registration.id, "request emitted");

        Ok(PendingResponse {
            kind,
            rx: Some(rx),
            registration: Some(registration),
        })
    }

    /// Emits `request` and waits up to `timeout` for its settled response.
    pub async fn call(&self, request: &Request, timeout: Duration) -> Result<Value> {
        self.dispatch(request)?.wait(timeout).await
    }

    /// Fails every outstanding request with a connection-closed error.
    pub fn cancel_all(&self) {
        for mut waiting in self.outstanding.iter_mut() {
            for entry in waiting.drain(..) {
                _ = entry.tx.send(Err(WsError::ConnectionClosed.into()));
            }
        }
    }

    /// Cancels every outstanding request and stops the routing task.
    pub fn close(&self) {
        self.cancel_all();
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.iter().map(|waiting| waiting.len()).sum()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// A request that has been emitted and may still be waiting for its response.
///
/// Dropping it before completion deregisters the request.
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    kind: RequestKind,
    rx: Option<oneshot::Receiver<Settlement>>,
    registration: Option<Registration>,
}

impl PendingResponse {
    fn settled(kind: RequestKind) -> Self {
        Self {
            kind,
            rx: None,
            registration: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The correlation id sent with the request, `None` for fire-and-forget requests.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.id.as_str())
    }

    /// Waits up to `timeout` for the response.
    ///
    /// Resolves with the payload when it reports `success: true`; otherwise fails
    /// with an application error carrying the server's message or the kind's
    /// fallback. Fire-and-forget requests resolve with `Value::Null` immediately.
    pub async fn wait(mut self, timeout: Duration) -> Result<Value> {
        let Some(mut rx) = self.rx.take() else {
            return Ok(Value::Null);
        };

        let outcome = tokio::time::timeout(timeout, &mut rx).await;
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }

        let settlement = match outcome {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_closed)) => Err(WsError::ConnectionClosed.into()),
            // The routing task may have settled the request just as the timer fired.
            Err(_elapsed) => rx.try_recv().unwrap_or_else(|_empty| {
                #[cfg(feature = "tracing")]
                tracing::debug!(kind = %self.kind, ?timeout, "request timed out");
                Err(Error::timeout(self.kind.timeout_message(), timeout))
            }),
        };

        let payload = settlement?;
        if is_success(&payload) {
            Ok(payload)
        } else {
            let message = error_message(&payload, self.kind.failure_message());
            Err(Error::application(message, payload))
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }
    }
}

struct Registration {
    outstanding: Arc<OutstandingMap>,
    event: &'static str,
    id: String,
}

impl Registration {
    /// Removes the entry unless the routing task or a cancellation already took it.
    fn remove(&self) {
        let Some(mut waiting) = self.outstanding.get_mut(self.event) else {
            return;
        };

        if let Some(position) = waiting.iter().position(|entry| entry.id == self.id) {
            waiting.remove(position);
        }
    }
}

async fn route_responses(
    mut events: tokio::sync::broadcast::Receiver<Event>,
    outstanding: Arc<OutstandingMap>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => settle(&outstanding, event),
            Err(RecvError::Lagged(count)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(count, "response router lagged, events were dropped");
                #[cfg(not(feature = "tracing"))]
                let _ = count;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn settle(outstanding: &OutstandingMap, event: Event) {
    let Some(mut waiting) = outstanding.get_mut(event.name.as_str()) else {
        return;
    };

    let position = match request_id_of(&event.data) {
        Some(id) => {
            let Some(position) = waiting.iter().position(|entry| entry.id == id) else {
                #[cfg(feature = "tracing")]
                tracing::debug!(event = %event.name, request_id = %id, "dropping stale response");
                return;
            };
            position
        }
        None => 0,
    };

    if let Some(entry) = waiting.remove(position) {
        _ = entry.tx.send(Ok(event.data));
    }
}
