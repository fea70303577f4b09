use std::{collections::VecDeque, time::Duration};

use super::{
    conn::{Connection, PendingConnection},
    connection_requester,
    connection_requester::{
        ConnectionRequest,
        ConnectionRequestReceiver,
        ConnectionRequestResult,
        ConnectionRequester,
    },
    establish::ConnectionEstablisher,
    manager,
    manager::{ManagementRequestReceiver, PoolManagementRequest, PoolManager},
    options::ConnectionPoolOptions,
    status,
    status::{PoolGenerationPublisher, PoolGenerationSubscriber},
    DEFAULT_MAX_POOL_SIZE,
};
use crate::{
    error::{Error, Result},
    event::{
        cmap::{CmapEvent, ConnectionClosedReason, PoolClearedEvent, PoolClosedEvent, PoolReadyEvent},
        emit,
        EventHandler,
    },
    options::ServerAddress,
    runtime,
    runtime::WorkerHandleListener,
    sdam::TopologyUpdater,
};

/// The maximum number of connections a pool establishes concurrently.
const MAX_CONNECTING: u32 = 2;
const MAINTENANCE_FREQUENCY: Duration = Duration::from_millis(500);

/// A worker task that owns and manages the state of a connection pool.
pub(super) struct ConnectionPoolWorker {
    /// The address the pool's connections will connect to.
    address: ServerAddress,

    /// Current state of the pool. Determines whether connections may be checked out and
    /// whether min_pool_size connection creation should continue.
    state: PoolState,

    /// The total number of connections managed by the pool, including connections which are
    /// currently checked out of the pool or have yet to be established.
    total_connection_count: u32,

    /// The number of connections currently being established by this pool.
    pending_connection_count: u32,

    /// The ID of the next connection created by the pool.
    next_connection_id: u32,

    /// The current generation of the pool. The generation is incremented whenever the pool is
    /// cleared. Connections belonging to a previous generation are considered stale and will
    /// be closed when checked back in or when popped off of the set of available connections.
    generation: u32,

    /// The established connections currently checked into the pool and awaiting usage in
    /// future operations.
    available_connections: VecDeque<Connection>,

    /// Contains the logic for establishing a connection, including its handshake.
    establisher: ConnectionEstablisher,

    /// The event handler specified by the user to process CMAP events.
    event_handler: Option<EventHandler<CmapEvent>>,

    /// Connections ready for usage in the pool for longer than this are closed rather than
    /// handed out. `None` means connections are never closed due to idleness.
    max_idle_time: Option<Duration>,

    min_pool_size: Option<u32>,
    max_pool_size: u32,
    socket_timeout: Option<Duration>,

    /// Receiver used to determine if any requesters hold references to this pool. If all the
    /// requesters drop, this worker stops too.
    handle_listener: WorkerHandleListener,

    /// Receiver for incoming connection checkout requests.
    request_receiver: ConnectionRequestReceiver,

    /// Ordered queue of incoming requests waiting for connections.
    wait_queue: VecDeque<ConnectionRequest>,

    /// Receiver for incoming pool management requests (e.g. checking in a connection).
    management_receiver: ManagementRequestReceiver,

    /// Sender used to publish the latest generation.
    generation_publisher: PoolGenerationPublisher,

    /// A pool manager that can be cloned and attached to connections checked out of the pool.
    manager: PoolManager,

    /// Used to notify the topology that a connection establishment error happened, allowing
    /// the server to transition to Unknown and the pool to clear.
    topology_updater: TopologyUpdater,
}

impl ConnectionPoolWorker {
    /// Starts a worker and returns a manager and connection requester.
    /// Once all connection requesters are dropped, the worker will stop executing and close
    /// the pool.
    pub(super) fn start(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        topology_updater: TopologyUpdater,
        options: ConnectionPoolOptions,
    ) -> (PoolManager, ConnectionRequester, PoolGenerationSubscriber) {
        // A max idle time of zero means connections are never closed due to idleness.
        let mut max_idle_time = options.max_idle_time;
        if max_idle_time == Some(Duration::from_millis(0)) {
            max_idle_time = None;
        }

        let max_pool_size = options.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE);

        let (handle, handle_listener) = WorkerHandleListener::channel();
        let (connection_requester, request_receiver) = connection_requester::channel(handle);
        let (manager, management_receiver) = manager::channel();
        let (generation_publisher, generation_subscriber) = status::channel(0);

        let worker = ConnectionPoolWorker {
            address,
            event_handler: options.cmap_event_handler,
            max_idle_time,
            min_pool_size: options.min_pool_size,
            socket_timeout: options.socket_timeout,
            establisher,
            next_connection_id: 1,
            total_connection_count: 0,
            pending_connection_count: 0,
            generation: 0,
            available_connections: VecDeque::new(),
            max_pool_size,
            request_receiver,
            wait_queue: Default::default(),
            management_receiver,
            manager: manager.clone(),
            handle_listener,
            state: PoolState::default(),
            generation_publisher,
            topology_updater,
        };

        runtime::spawn(async move {
            worker.execute().await;
        });

        (manager, connection_requester, generation_subscriber)
    }

    /// Run the worker, listening on the various receivers until all requester handles have
    /// been dropped. Once that happens, the pool closes any available connections and emits a
    /// pool-closed event.
    async fn execute(mut self) {
        let mut maintenance_interval = runtime::interval(MAINTENANCE_FREQUENCY);

        loop {
            let task = tokio::select! {
                Some(request) = self.request_receiver.recv() => {
                    PoolTask::CheckOut(request)
                },
                Some(request) = self.management_receiver.recv() => request.into(),
                _ = self.handle_listener.wait_for_all_handle_drops() => {
                    // All requester handles have been dropped, meaning this pool has no more
                    // users and can be closed.
                    break
                },
                _ = maintenance_interval.tick() => {
                    PoolTask::Maintenance
                },
                else => {
                    break
                }
            };

            match task {
                PoolTask::CheckOut(request) => match self.state {
                    PoolState::Ready => {
                        self.wait_queue.push_back(request);
                    }
                    PoolState::Paused(ref cause) => {
                        // If the receiver doesn't listen to the error that's ok.
                        let _ = request.fulfill(ConnectionRequestResult::PoolCleared(Box::new(
                            cause.clone(),
                        )));
                    }
                },
                PoolTask::HandleManagementRequest(PoolManagementRequest::CheckIn(connection)) => {
                    self.check_in(*connection);
                }
                PoolTask::HandleManagementRequest(PoolManagementRequest::Clear {
                    completion,
                    cause,
                }) => {
                    self.clear(cause);
                    completion.acknowledge(());
                }
                PoolTask::HandleManagementRequest(PoolManagementRequest::MarkAsReady {
                    completion,
                }) => {
                    self.mark_as_ready();
                    completion.acknowledge(());
                }
                PoolTask::HandleManagementRequest(
                    PoolManagementRequest::HandleConnectionSucceeded(conn),
                ) => self.handle_connection_succeeded(conn.map(|b| *b)),
                PoolTask::HandleManagementRequest(
                    PoolManagementRequest::HandleConnectionFailed,
                ) => self.handle_connection_failed(),
                PoolTask::Maintenance => self.perform_maintenance(),
            }

            while self.can_service_connection_request() {
                match self.wait_queue.pop_front() {
                    Some(request) => self.check_out(request),
                    None => break,
                }
            }
        }

        while let Some(connection) = self.available_connections.pop_front() {
            self.close_connection(connection, ConnectionClosedReason::PoolClosed);
        }

        emit(&self.event_handler, || {
            CmapEvent::PoolClosed(PoolClosedEvent {
                address: self.address.clone(),
            })
        });
    }

    fn can_service_connection_request(&self) -> bool {
        if !matches!(self.state, PoolState::Ready) {
            return false;
        }

        if self.wait_queue.is_empty() {
            return false;
        }

        if !self.available_connections.is_empty() {
            return true;
        }

        self.total_connection_count < self.max_pool_size
            && self.pending_connection_count < MAX_CONNECTING
    }

    fn check_out(&mut self, request: ConnectionRequest) {
        // First attempt to check out an available connection.
        while let Some(mut conn) = self.available_connections.pop_back() {
            // Close the connection if it's stale.
            if conn.is_stale(self.generation) {
                self.close_connection(conn, ConnectionClosedReason::Stale);
                continue;
            }

            // Close the connection if it's idle.
            if conn.is_idle(self.max_idle_time) {
                self.close_connection(conn, ConnectionClosedReason::Idle);
                continue;
            }

            conn.mark_as_in_use(self.manager.clone());
            if let Err(result) = request.fulfill(ConnectionRequestResult::Pooled(Box::new(conn))) {
                // The checking-out task stopped listening, e.g. because it hit its wait
                // queue timeout, so the connection goes back into the pool.
                let mut connection = result.unwrap_pooled_connection();
                connection.mark_as_available();
                self.available_connections.push_back(connection);
            }

            return;
        }

        // Otherwise, establish a new connection.
        let pending_connection = self.create_pending_connection();
        let event_handler = self.event_handler.clone();
        let establisher = self.establisher.clone();
        let manager = self.manager.clone();
        let topology_updater = self.topology_updater.clone();

        let handle = runtime::spawn(async move {
            let mut establish_result = establish_connection(
                &establisher,
                pending_connection,
                &topology_updater,
                &manager,
                event_handler.as_ref(),
            )
            .await;

            if let Ok(ref mut connection) = establish_result {
                connection.mark_as_in_use(manager.clone());
                manager.handle_connection_succeeded(None);
            }

            establish_result
        });

        // This only fails if the other end stopped listening (e.g. due to a timeout), in
        // which case the connection just finishes establishing in the background and is
        // checked in by its Drop.
        let _: std::result::Result<_, _> =
            request.fulfill(ConnectionRequestResult::Establishing(handle));
    }

    fn create_pending_connection(&mut self) -> PendingConnection {
        self.total_connection_count += 1;
        self.pending_connection_count += 1;

        let pending_connection = PendingConnection {
            id: self.next_connection_id,
            address: self.address.clone(),
            generation: self.generation,
            socket_timeout: self.socket_timeout,
        };
        self.next_connection_id += 1;
        emit(&self.event_handler, || pending_connection.created_event());

        pending_connection
    }

    fn handle_connection_failed(&mut self) {
        // Establishing a pending connection failed, so that must be reflected in the total
        // connection count.
        self.total_connection_count -= 1;
        self.pending_connection_count -= 1;
    }

    fn handle_connection_succeeded(&mut self, connection: Option<Connection>) {
        self.pending_connection_count -= 1;
        if let Some(mut connection) = connection {
            connection.mark_as_available();
            self.available_connections.push_back(connection);
        }
    }

    fn check_in(&mut self, mut conn: Connection) {
        emit(&self.event_handler, || {
            CmapEvent::ConnectionCheckedIn(conn.checked_in_event())
        });

        // A pinned connection that is still usable goes back to its pinner rather than the
        // pool.
        if let Some(sender) = conn.pinned_sender.clone() {
            if !conn.has_errored() && !conn.is_stale(self.generation) {
                match sender.try_send(conn) {
                    Ok(()) => return,
                    Err(e) => {
                        // The pinner stopped listening; unpin and pool normally.
                        conn = match e {
                            tokio::sync::mpsc::error::TrySendError::Full(c)
                            | tokio::sync::mpsc::error::TrySendError::Closed(c) => c,
                        };
                        conn.pinned_sender = None;
                    }
                }
            } else {
                conn.pinned_sender = None;
            }
        }

        conn.mark_as_available();

        if conn.has_errored() {
            self.close_connection(conn, ConnectionClosedReason::Error);
        } else if conn.is_stale(self.generation) {
            self.close_connection(conn, ConnectionClosedReason::Stale);
        } else {
            self.available_connections.push_back(conn);
        }
    }

    fn clear(&mut self, cause: Error) {
        self.generation += 1;
        let previous_state = std::mem::replace(&mut self.state, PoolState::Paused(cause.clone()));
        self.generation_publisher.publish(self.generation);

        if !matches!(previous_state, PoolState::Paused(_)) {
            emit(&self.event_handler, || {
                CmapEvent::PoolCleared(PoolClearedEvent {
                    address: self.address.clone(),
                })
            });

            for request in self.wait_queue.drain(..) {
                // An error here means the other end hung up already, which is fine, because
                // an error was on the way anyways.
                let _: std::result::Result<_, _> = request.fulfill(
                    ConnectionRequestResult::PoolCleared(Box::new(cause.clone())),
                );
            }
        }
    }

    fn mark_as_ready(&mut self) {
        if matches!(self.state, PoolState::Ready) {
            return;
        }

        self.state = PoolState::Ready;
        emit(&self.event_handler, || {
            CmapEvent::PoolReady(PoolReadyEvent {
                address: self.address.clone(),
            })
        });
    }

    /// Close a connection, emit the event for it being closed, and decrement the total
    /// connection count.
    fn close_connection(&mut self, connection: Connection, reason: ConnectionClosedReason) {
        emit(&self.event_handler, || {
            CmapEvent::ConnectionClosed(connection.closed_event(reason))
        });
        self.total_connection_count -= 1;
    }

    /// Ensure all connections in the pool are valid and that the pool holds at least
    /// min_pool_size connections.
    fn perform_maintenance(&mut self) {
        self.remove_perished_connections();
        if matches!(self.state, PoolState::Ready) {
            self.ensure_min_connections();
        }
    }

    /// Iterate over the connections and remove any that are stale or idle.
    fn remove_perished_connections(&mut self) {
        while let Some(connection) = self.available_connections.pop_front() {
            if connection.is_stale(self.generation) {
                self.close_connection(connection, ConnectionClosedReason::Stale);
            } else if connection.is_idle(self.max_idle_time) {
                self.close_connection(connection, ConnectionClosedReason::Idle);
            } else {
                self.available_connections.push_front(connection);
                // All subsequent connections were checked in later, so they are neither
                // staler nor idler than this one.
                break;
            };
        }
    }

    /// Populate the pool with enough connections to meet the min_pool_size requirement.
    fn ensure_min_connections(&mut self) {
        if let Some(min_pool_size) = self.min_pool_size {
            while self.total_connection_count < min_pool_size
                && self.pending_connection_count < MAX_CONNECTING
            {
                let pending_connection = self.create_pending_connection();
                let event_handler = self.event_handler.clone();
                let manager = self.manager.clone();
                let establisher = self.establisher.clone();
                let topology_updater = self.topology_updater.clone();
                runtime::spawn(async move {
                    let connection = establish_connection(
                        &establisher,
                        pending_connection,
                        &topology_updater,
                        &manager,
                        event_handler.as_ref(),
                    )
                    .await;

                    if let Ok(connection) = connection {
                        manager.handle_connection_succeeded(Some(connection))
                    }
                });
            }
        }
    }
}

/// Helper covering the common connection establishment behavior between connections
/// established in check_out and those established to satisfy min_pool_size.
async fn establish_connection(
    establisher: &ConnectionEstablisher,
    pending_connection: PendingConnection,
    topology_updater: &TopologyUpdater,
    manager: &PoolManager,
    event_handler: Option<&EventHandler<CmapEvent>>,
) -> Result<Connection> {
    let address = pending_connection.address.clone();
    let generation = pending_connection.generation;
    let connection_id = pending_connection.id;

    let establish_result = establisher.establish_connection(pending_connection).await;

    match establish_result {
        Err(e) => {
            if let Some(handler) = event_handler {
                handler.handle(CmapEvent::ConnectionClosed(
                    crate::event::cmap::ConnectionClosedEvent {
                        address: address.clone(),
                        connection_id,
                        reason: ConnectionClosedReason::Error,
                    },
                ));
            }
            manager.handle_connection_failed();
            topology_updater
                .handle_pre_handshake_error(address, generation, e.clone())
                .await;
            Err(e)
        }
        Ok((connection, _reply)) => {
            if let Some(handler) = event_handler {
                handler.handle(CmapEvent::ConnectionReady(connection.ready_event()));
            }
            Ok(connection)
        }
    }
}

/// The possible pool states.
///
/// The "closed" state is omitted here because the pool is considered closed only once it goes
/// out of scope and cannot be manually closed before then.
#[derive(Debug)]
enum PoolState {
    /// Connections may not be checked out nor created in the background to satisfy
    /// minPoolSize. The error that caused the pause is returned to checkouts.
    Paused(Error),

    /// Pool is operational.
    Ready,
}

impl Default for PoolState {
    fn default() -> Self {
        PoolState::Paused(crate::error::ErrorKind::ConnectionPoolCleared {
            message: "the pool is paused until its server is discovered".to_string(),
        }
        .into())
    }
}

/// Task for the worker to process.
#[derive(Debug)]
enum PoolTask {
    /// Handle a management request from a `PoolManager`.
    HandleManagementRequest(PoolManagementRequest),

    /// Fulfill the given connection request.
    CheckOut(ConnectionRequest),

    /// Perform pool maintenance (ensure min connections, remove stale or idle connections).
    Maintenance,
}

impl From<PoolManagementRequest> for PoolTask {
    fn from(request: PoolManagementRequest) -> Self {
        PoolTask::HandleManagementRequest(request)
    }
}
