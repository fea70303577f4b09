//! The connection pool: one bounded pool of handshaked connections per server, following the
//! connection-monitoring-and-pooling model of worker-owned state.

pub(crate) mod conn;
mod connection_requester;
pub(crate) mod establish;
mod manager;
pub(crate) mod options;
mod status;
#[cfg(test)]
mod test;
mod worker;

use derivative::Derivative;

use self::{
    connection_requester::{ConnectionRequestResult, ConnectionRequester},
    establish::ConnectionEstablisher,
    manager::PoolManager,
    options::ConnectionPoolOptions,
    status::PoolGenerationSubscriber,
    worker::ConnectionPoolWorker,
};
use crate::{
    bson::oid::ObjectId,
    error::{Error, ErrorKind, Result},
    event::{
        cmap::{
            CmapEvent,
            ConnectionCheckoutFailedEvent,
            ConnectionCheckoutFailedReason,
            ConnectionCheckoutStartedEvent,
            PoolCreatedEvent,
        },
        emit,
        EventHandler,
    },
    options::ServerAddress,
    sdam::TopologyUpdater,
};

pub(crate) use self::conn::{
    wire::next_request_id,
    Command,
    CommandResponse,
    Connection,
    StreamDescription,
};

pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 10;

/// A pool of connections implementing the CMAP spec.
///
/// This type is actually a handle to a worker task that manages the connections and is cheap
/// to clone and pass around.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub(crate) struct ConnectionPool {
    address: ServerAddress,
    manager: PoolManager,
    connection_requester: ConnectionRequester,
    generation_subscriber: PoolGenerationSubscriber,
    wait_queue_timeout: Option<std::time::Duration>,

    #[derivative(Debug = "ignore")]
    event_handler: Option<EventHandler<CmapEvent>>,
}

impl ConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        topology_updater: TopologyUpdater,
        _topology_id: ObjectId,
        options: ConnectionPoolOptions,
    ) -> Self {
        let event_handler = options.cmap_event_handler.clone();
        let wait_queue_timeout = options.wait_queue_timeout;

        let event_options = options.to_event_options();
        let (manager, connection_requester, generation_subscriber) = ConnectionPoolWorker::start(
            address.clone(),
            establisher,
            topology_updater,
            options,
        );

        emit(&event_handler, || {
            CmapEvent::PoolCreated(PoolCreatedEvent {
                address: address.clone(),
                options: Some(event_options),
            })
        });

        Self {
            address,
            manager,
            connection_requester,
            generation_subscriber,
            wait_queue_timeout,
            event_handler,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mocked(address: ServerAddress) -> Self {
        let (manager, _) = manager::channel();
        let handle = crate::runtime::WorkerHandle::new_mocked();
        let (connection_requester, _) = connection_requester::channel(handle);
        let (_, generation_subscriber) = status::channel(0);

        Self {
            address,
            manager,
            connection_requester,
            generation_subscriber,
            wait_queue_timeout: None,
            event_handler: None,
        }
    }

    /// Checks out a connection from the pool. This method will yield until this request is at
    /// the front of the wait queue and a connection is available or can be established; if a
    /// wait queue timeout is configured, the checkout fails once it expires.
    pub(crate) async fn check_out(&self) -> Result<Connection> {
        emit(&self.event_handler, || {
            CmapEvent::ConnectionCheckoutStarted(ConnectionCheckoutStartedEvent {
                address: self.address.clone(),
            })
        });

        let response = match self.wait_queue_timeout {
            Some(timeout) => {
                match crate::runtime::timeout(timeout, self.connection_requester.request()).await {
                    Ok(response) => response,
                    Err(_) => {
                        emit(&self.event_handler, || {
                            CmapEvent::ConnectionCheckoutFailed(ConnectionCheckoutFailedEvent {
                                address: self.address.clone(),
                                reason: ConnectionCheckoutFailedReason::Timeout,
                                error: None,
                            })
                        });
                        return Err(ErrorKind::WaitQueueTimeout {
                            address: self.address.clone(),
                        }
                        .into());
                    }
                }
            }
            None => self.connection_requester.request().await,
        };

        let conn = match response {
            ConnectionRequestResult::Pooled(c) => Ok(*c),
            ConnectionRequestResult::Establishing(task) => match task.await {
                Ok(result) => result,
                Err(join_error) => Err(Error::internal(format!(
                    "connection establishment task failed: {}",
                    join_error
                ))),
            },
            ConnectionRequestResult::PoolCleared(e) => {
                Err(Error::pool_cleared_error(&self.address, &e))
            }
        };

        match conn {
            Ok(ref conn) => {
                emit(&self.event_handler, || {
                    CmapEvent::ConnectionCheckedOut(conn.checked_out_event())
                });
            }
            Err(ref err) => {
                let err = err.clone();
                emit(&self.event_handler, || {
                    CmapEvent::ConnectionCheckoutFailed(ConnectionCheckoutFailedEvent {
                        address: self.address.clone(),
                        reason: ConnectionCheckoutFailedReason::ConnectionError,
                        error: Some(err),
                    })
                });
            }
        }

        conn
    }

    /// Increments the generation of the pool. Rather than eagerly removing stale connections
    /// from the pool, they are left for the worker to clean up.
    pub(crate) async fn clear(&self, cause: Error) {
        self.manager.clear(cause).await
    }

    /// Mark the pool as "ready", allowing checkouts to proceed and background connection
    /// creation to start.
    pub(crate) async fn mark_as_ready(&self) {
        self.manager.mark_as_ready().await
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation_subscriber.generation()
    }
}
