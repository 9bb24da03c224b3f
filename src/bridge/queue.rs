//! Buffer for commands submitted while the socket is down.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use super::correlator::{Correlator, PendingResponse};
use super::types::Request;
use crate::Result;
use crate::ws::{ConnectionState, Transport, WsError};

struct Queued {
    request: Request,
    timeout: Duration,
    tx: oneshot::Sender<Result<Value>>,
}

enum Admission {
    Direct(PendingResponse),
    Queued(oneshot::Receiver<Result<Value>>),
}

/// Holds queueable requests until the connection is established, then hands
/// them to the correlator in submission order.
///
/// The queue never drains itself: whoever observes the connection coming up
/// calls [`CommandQueue::drain`] once per connect.
#[derive(Clone)]
pub struct CommandQueue<T: Transport> {
    correlator: Correlator<T>,
    pending: Arc<Mutex<VecDeque<Queued>>>,
}

impl<T: Transport> CommandQueue<T> {
    #[must_use]
    pub fn new(correlator: Correlator<T>) -> Self {
        Self {
            correlator,
            pending: Arc::default(),
        }
    }

    /// Sends `request` now if connected and nothing is queued ahead of it,
    /// otherwise queues it. Either way the result is the request's settled
    /// response; the timeout starts when the request is emitted.
    ///
    /// Requests that may not be queued are passed straight to the correlator
    /// and fail with [`crate::error::Kind::NotConnected`] while disconnected.
    pub async fn submit(&self, request: Request, timeout: Duration) -> Result<Value> {
        if !request.kind().is_queueable() {
            return self.correlator.call(&request, timeout).await;
        }

        request.validate()?;

        let admission = {
            let mut pending = self.lock();
            let state = self.correlator.state();

            if state == ConnectionState::Closed {
                return Err(WsError::ConnectionClosed.into());
            }

            if state.is_connected() && pending.is_empty() {
                Admission::Direct(self.correlator.dispatch(&request)?)
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!(kind = %request.kind(), queued = pending.len() + 1, "not connected, queueing request");

                let (tx, rx) = oneshot::channel();
                pending.push_back(Queued {
                    request,
                    timeout,
                    tx,
                });
                Admission::Queued(rx)
            }
        };

        match admission {
            Admission::Direct(response) => response.wait(timeout).await,
            Admission::Queued(rx) => rx.await.map_err(|_closed| WsError::ConnectionClosed)?,
        }
    }

    /// Hands every queued request to the correlator in FIFO order and clears the
    /// buffer. Returns how many requests were dispatched.
    ///
    /// Does nothing while disconnected. A request that fails is reported to its
    /// own caller and is not queued again; requests whose callers have gone away
    /// are skipped.
    pub fn drain(&self) -> usize {
        let mut pending = self.lock();
        if !self.correlator.transport().is_connected() || pending.is_empty() {
            return 0;
        }

        let entries = std::mem::take(&mut *pending);

        #[cfg(feature = "tracing")]
        tracing::debug!(count = entries.len(), "flushing queued requests");

        let mut dispatched = 0;
        for Queued {
            request,
            timeout,
            tx,
        } in entries
        {
            if tx.is_closed() {
                continue;
            }

            match self.correlator.dispatch(&request) {
                Ok(response) => {
                    dispatched += 1;
                    tokio::spawn(async move {
                        _ = tx.send(response.wait(timeout).await);
                    });
                }
                Err(e) => {
                    _ = tx.send(Err(e));
                }
            }
        }

        dispatched
    }

    /// Fails every queued request with a connection-closed error.
    pub fn cancel_all(&self) {
        let entries = std::mem::take(&mut *self.lock());
        for entry in entries {
            _ = entry.tx.send(Err(WsError::ConnectionClosed.into()));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::bridge::fake::FakeTransport;
    use crate::bridge::types::{CommandRequest, NaturalLanguageRequest};
    use crate::error::Kind;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn command(command: &str) -> Request {
        CommandRequest::builder().command(command).build().into()
    }

    fn queue_for(transport: &FakeTransport) -> CommandQueue<FakeTransport> {
        CommandQueue::new(Correlator::new(transport.clone()))
    }

    /// Submits in the background and waits until the request is actually queued,
    /// so submission order is deterministic.
    async fn submit_queued(
        queue: &CommandQueue<FakeTransport>,
        request: Request,
    ) -> JoinHandle<Result<Value>> {
        let before = queue.len();
        let task = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(request, TIMEOUT).await })
        };
        while queue.len() == before {
            tokio::task::yield_now().await;
        }
        task
    }

    #[tokio::test]
    async fn queued_commands_flush_in_submission_order() {
        let transport = FakeTransport::new();
        let queue = queue_for(&transport);

        let first = submit_queued(&queue, command("mkdir app")).await;
        let second = submit_queued(&queue, command("cd app")).await;
        let third = submit_queued(&queue, command("ls")).await;
        assert!(transport.emitted().is_empty(), "nothing is sent while disconnected");

        transport.set_connected(true);
        assert_eq!(queue.drain(), 3);
        assert!(queue.is_empty(), "buffer is cleared after draining");
        assert_eq!(transport.commands(), ["mkdir app", "cd app", "ls"]);

        for output in ["1", "2", "3"] {
            transport.respond("command_result", json!({ "success": true, "output": output }));
        }

        assert_eq!(first.await.unwrap().unwrap()["output"], "1");
        assert_eq!(second.await.unwrap().unwrap()["output"], "2");
        assert_eq!(third.await.unwrap().unwrap()["output"], "3");

        assert_eq!(queue.drain(), 0, "a second drain sends nothing");
        assert_eq!(transport.commands().len(), 3, "no command is delivered twice");
    }

    #[tokio::test]
    async fn connected_submit_goes_straight_to_the_wire() {
        let transport = FakeTransport::connected();
        let queue = queue_for(&transport);

        let task = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(command("pwd"), TIMEOUT).await })
        };
        while transport.commands().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(queue.is_empty(), "nothing should be queued");

        transport.respond("command_result", json!({ "success": true, "output": "/" }));
        assert_eq!(task.await.unwrap().unwrap()["output"], "/");
    }

    #[tokio::test]
    async fn failed_flush_is_reported_not_requeued() {
        let transport = FakeTransport::new();
        let queue = queue_for(&transport);

        let task = submit_queued(&queue, command("rm missing")).await;
        transport.set_connected(true);
        queue.drain();

        transport.respond(
            "command_result",
            json!({ "success": false, "error": "No such file or directory" }),
        );

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), Kind::Application);
        assert_eq!(err.message(), "No such file or directory");
        assert!(queue.is_empty(), "failed requests are not queued again");
    }

    #[tokio::test]
    async fn natural_language_is_never_queued() {
        let transport = FakeTransport::new();
        let queue = queue_for(&transport);
        let request: Request = NaturalLanguageRequest::builder()
            .text("create a flask app")
            .build()
            .into();

        let err = queue.submit(request, TIMEOUT).await.unwrap_err();

        assert_eq!(err.kind(), Kind::NotConnected);
        assert!(queue.is_empty(), "nothing should be queued");
    }

    #[tokio::test]
    async fn cancel_all_fails_queued_commands() {
        let transport = FakeTransport::new();
        let queue = queue_for(&transport);

        let task = submit_queued(&queue, command("ls")).await;
        queue.cancel_all();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), Kind::Connection);
        assert!(queue.is_empty(), "queue should be empty after cancel");
    }

    #[tokio::test]
    async fn abandoned_queued_commands_are_skipped() {
        let transport = FakeTransport::new();
        let queue = queue_for(&transport);

        let abandoned = submit_queued(&queue, command("sleep 100")).await;
        abandoned.abort();
        _ = abandoned.await;
        let kept = submit_queued(&queue, command("ls")).await;

        transport.set_connected(true);
        assert_eq!(queue.drain(), 1);
        assert_eq!(transport.commands(), ["ls"]);

        transport.respond("command_result", json!({ "success": true }));
        kept.await.unwrap().unwrap();
    }
}
