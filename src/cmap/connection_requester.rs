use tokio::sync::{mpsc, oneshot};

use super::conn::Connection;
use crate::{
    error::{Error, Result},
    runtime::WorkerHandle,
};

/// Returns a new requester/receiver pair.
pub(super) fn channel(handle: WorkerHandle) -> (ConnectionRequester, ConnectionRequestReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        ConnectionRequester {
            sender,
            _handle: handle,
        },
        ConnectionRequestReceiver { receiver },
    )
}

/// Handle for requesting Connections from the pool. This requester keeps the pool worker
/// alive: once every requester has been dropped, the worker will stop and close the pool.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionRequester {
    sender: mpsc::UnboundedSender<ConnectionRequest>,
    _handle: WorkerHandle,
}

impl ConnectionRequester {
    /// Request a connection from the pool that owns the receiver end of this requester.
    pub(super) async fn request(&self) -> ConnectionRequestResult {
        let (sender, receiver) = oneshot::channel();

        // This only errors if the worker is dropped, which means the pool was closed out from
        // under this request.
        if self.sender.send(ConnectionRequest { sender }).is_err() {
            return ConnectionRequestResult::PoolCleared(Box::new(Error::internal(
                "the connection pool is closed",
            )));
        }

        receiver
            .await
            .unwrap_or_else(|_| {
                ConnectionRequestResult::PoolCleared(Box::new(Error::internal(
                    "the connection pool worker stopped while a request was in progress",
                )))
            })
    }
}

/// The receiving end of checkout requests, polled by the pool worker.
#[derive(Debug)]
pub(super) struct ConnectionRequestReceiver {
    receiver: mpsc::UnboundedReceiver<ConnectionRequest>,
}

impl ConnectionRequestReceiver {
    pub(super) async fn recv(&mut self) -> Option<ConnectionRequest> {
        self.receiver.recv().await
    }
}

/// A request for a connection made by an operation in checkout.
#[derive(Debug)]
pub(super) struct ConnectionRequest {
    sender: oneshot::Sender<ConnectionRequestResult>,
}

impl ConnectionRequest {
    /// Respond to the connection request, either with a pooled connection or one that is
    /// still establishing. Returns the result back if the requester stopped listening (e.g.
    /// because it hit its wait-queue timeout).
    pub(super) fn fulfill(
        self,
        result: ConnectionRequestResult,
    ) -> std::result::Result<(), ConnectionRequestResult> {
        self.sender.send(result)
    }
}

/// The result of a request for a connection.
#[derive(Debug)]
pub(super) enum ConnectionRequestResult {
    /// A connection that was already established and was simply checked out of the pool.
    Pooled(Box<Connection>),

    /// A new connection in the process of being established. The returned future will resolve
    /// to the connection once establishment (including the handshake) completes.
    Establishing(tokio::task::JoinHandle<Result<Connection>>),

    /// The request was rejected because the pool was cleared before it could be fulfilled.
    /// The error that caused the pool to be cleared is returned.
    PoolCleared(Box<Error>),
}

impl ConnectionRequestResult {
    pub(super) fn unwrap_pooled_connection(self) -> Connection {
        match self {
            ConnectionRequestResult::Pooled(c) => *c,
            // Only called by the worker when recovering a fulfillment it just attempted with
            // a pooled connection.
            _ => unreachable!("attempted to recover a non-pooled connection request result"),
        }
    }
}
