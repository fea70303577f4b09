use tokio::sync::mpsc;

use super::conn::Connection;
use crate::{error::Error, runtime::AcknowledgedMessage};

/// Returns a new manager/receiver pair.
pub(super) fn channel() -> (PoolManager, ManagementRequestReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        PoolManager { sender },
        ManagementRequestReceiver { receiver },
    )
}

/// A handle used to perform management of a connection pool. Unlike checkout requests,
/// management requests do not keep the pool worker alive.
#[derive(Clone, Debug)]
pub(crate) struct PoolManager {
    sender: mpsc::UnboundedSender<PoolManagementRequest>,
}

impl PoolManager {
    /// Clear the pool, incrementing its generation. Returns once the worker has processed the
    /// clear.
    pub(crate) async fn clear(&self, cause: Error) {
        let (message, acknowledgment_receiver) = AcknowledgedMessage::package(());
        if self
            .sender
            .send(PoolManagementRequest::Clear {
                completion: message,
                cause,
            })
            .is_ok()
        {
            acknowledgment_receiver.wait_for_acknowledgment().await;
        }
    }

    /// Mark the pool as ready, allowing connections to be created and checked out.
    pub(crate) async fn mark_as_ready(&self) {
        let (message, acknowledgment_receiver) = AcknowledgedMessage::package(());
        if self
            .sender
            .send(PoolManagementRequest::MarkAsReady {
                completion: message,
            })
            .is_ok()
        {
            acknowledgment_receiver.wait_for_acknowledgment().await;
        }
    }

    /// Check in the given connection to the pool. This hands the connection to the worker
    /// without waiting for it to be processed, so it is usable from `Drop` implementations.
    /// If the worker is gone, the connection is closed by being dropped here.
    pub(crate) fn check_in(&self, connection: Connection) {
        let _ = self
            .sender
            .send(PoolManagementRequest::CheckIn(Box::new(connection)));
    }

    /// Notify the pool that establishing a connection failed.
    pub(super) fn handle_connection_failed(&self) {
        let _ = self
            .sender
            .send(PoolManagementRequest::HandleConnectionFailed);
    }

    /// Notify the pool that establishing a connection succeeded, optionally handing over the
    /// connection to be stored in the pool.
    pub(super) fn handle_connection_succeeded(&self, connection: Option<Connection>) {
        let _ = self.sender.send(
            PoolManagementRequest::HandleConnectionSucceeded(connection.map(Box::new)),
        );
    }
}

/// The receiving end of management requests, polled by the pool worker.
#[derive(Debug)]
pub(super) struct ManagementRequestReceiver {
    receiver: mpsc::UnboundedReceiver<PoolManagementRequest>,
}

impl ManagementRequestReceiver {
    pub(super) async fn recv(&mut self) -> Option<PoolManagementRequest> {
        self.receiver.recv().await
    }
}

/// Requests that a `PoolManager` can make of its worker.
#[derive(Debug)]
pub(super) enum PoolManagementRequest {
    /// Clear the pool, transitioning it to Paused.
    Clear {
        completion: AcknowledgedMessage<()>,
        cause: Error,
    },

    /// Mark the pool as Ready, allowing connections to be created and checked out.
    MarkAsReady { completion: AcknowledgedMessage<()> },

    /// Check in the given connection.
    CheckIn(Box<Connection>),

    /// Update the pool based on a failed connection establishment.
    HandleConnectionFailed,

    /// Update the pool based on a successful connection establishment.
    HandleConnectionSucceeded(Option<Box<Connection>>),
}
