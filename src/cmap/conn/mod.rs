mod command;
mod stream_description;
pub(crate) mod wire;

use std::time::{Duration, Instant};

use derivative::Derivative;
use tokio::sync::mpsc;

use self::wire::{next_request_id, Message};
use super::manager::PoolManager;
use crate::{
    error::{Error, ErrorKind, Result},
    event::cmap::{
        CmapEvent,
        ConnectionCheckedInEvent,
        ConnectionCheckedOutEvent,
        ConnectionClosedEvent,
        ConnectionClosedReason,
        ConnectionCreatedEvent,
        ConnectionReadyEvent,
    },
    event::command::ConnectionInfo,
    options::ServerAddress,
    runtime::AsyncStream,
};

pub(crate) use self::{
    command::{Command, CommandResponse},
    stream_description::StreamDescription,
};

/// A wrapper around an established stream that implements the wire protocol and tracks all the
/// pool bookkeeping the connection participates in.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Connection {
    /// Driver-generated id, unique within the owning pool.
    pub(super) id: u32,

    pub(super) address: ServerAddress,

    /// The pool generation this connection was established under. A connection whose
    /// generation trails its pool's is stale and is destroyed rather than reused.
    pub(super) generation: u32,

    /// The cached StreamDescription from the connection's handshake.
    pub(super) stream_description: Option<StreamDescription>,

    /// Marks the time when the connection was last checked into the pool, used to detect
    /// idleness.
    ready_and_available_time: Option<Instant>,

    /// The time the connection was last used for an operation.
    pub(super) last_used: Instant,

    /// Whether an error was encountered while the connection was in use.
    error: bool,

    /// Maximum time to wait for a single send or receive.
    socket_timeout: Option<Duration>,

    /// When the connection is checked out, a handle to its pool's manager so the connection
    /// can check itself back in on drop.
    pub(super) pool_manager: Option<PoolManager>,

    /// If the connection is pinned (bound to a cursor), the channel that checked-in state
    /// should be routed through instead of the pool's available queue.
    pub(super) pinned_sender: Option<mpsc::Sender<Connection>>,

    #[derivative(Debug = "ignore")]
    stream: AsyncStream,
}

impl Connection {
    pub(super) fn new(pending: PendingConnection, stream: AsyncStream) -> Self {
        Self {
            id: pending.id,
            address: pending.address,
            generation: pending.generation,
            stream_description: None,
            ready_and_available_time: None,
            last_used: Instant::now(),
            error: false,
            socket_timeout: pending.socket_timeout,
            pool_manager: None,
            pinned_sender: None,
            stream,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The pool generation this connection belongs to.
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Helper to mark the time that the connection was checked into the pool for the purpose
    /// of detecting when it becomes idle.
    pub(super) fn mark_as_available(&mut self) {
        self.pool_manager.take();
        self.ready_and_available_time = Some(Instant::now());
    }

    /// Helper to mark that the connection has been checked out of the pool, attaching the
    /// manager used to check it back in on drop.
    pub(super) fn mark_as_in_use(&mut self, manager: PoolManager) {
        self.pool_manager = Some(manager);
        self.ready_and_available_time.take();
    }

    /// Checks if the connection is idle.
    pub(super) fn is_idle(&self, max_idle_time: Option<Duration>) -> bool {
        self.ready_and_available_time
            .and_then(|ready_and_available_time| {
                max_idle_time.map(|max_idle_time| {
                    Instant::now().duration_since(ready_and_available_time) >= max_idle_time
                })
            })
            .unwrap_or(false)
    }

    /// Checks if the connection is stale.
    pub(super) fn is_stale(&self, current_generation: u32) -> bool {
        self.generation != current_generation
    }

    pub(super) fn has_errored(&self) -> bool {
        self.error
    }

    /// Pin the connection, returning a handle that future operations can retrieve it through.
    /// While pinned, checkins route the connection to the handle instead of the pool.
    pub(crate) fn pin(&mut self) -> Result<PinnedConnectionHandle> {
        if self.pinned_sender.is_some() {
            return Err(Error::internal(format!(
                "cannot pin an already-pinned connection (id = {})",
                self.id
            )));
        }
        if self.pool_manager.is_none() {
            return Err(Error::internal(format!(
                "cannot pin a connection not checked out of a pool (id = {})",
                self.id
            )));
        }
        let (tx, rx) = mpsc::channel(1);
        self.pinned_sender = Some(tx);
        Ok(PinnedConnectionHandle {
            id: self.id,
            receiver: rx,
        })
    }

    /// Executes a `Command` and returns a `CommandResponse` containing the result from the
    /// server.
    ///
    /// An `Ok(..)` result simply means the server received the command and the driver received
    /// the response; it does not imply anything about the success of the command itself.
    pub(crate) async fn send_command(
        &mut self,
        command: Command,
        request_id: impl Into<Option<i32>>,
    ) -> Result<CommandResponse> {
        self.last_used = Instant::now();

        let max_message_size = self
            .stream_description
            .as_ref()
            .and_then(|sd| sd.max_message_size_bytes);

        let message = Message::new(
            command.into_wire_document(),
            Some(request_id.into().unwrap_or_else(next_request_id)),
        );

        let result = match self.socket_timeout {
            Some(timeout) => {
                crate::runtime::timeout(timeout, self.round_trip(message, max_message_size))
                    .await
                    .and_then(std::convert::identity)
            }
            None => self.round_trip(message, max_message_size).await,
        };

        if let Err(ref err) = result {
            if err.is_network_error() {
                self.error = true;
            }
        }

        result
    }

    async fn round_trip(
        &mut self,
        message: Message,
        max_message_size: Option<i32>,
    ) -> Result<CommandResponse> {
        message.write_to(&mut self.stream).await?;
        let response = Message::read_from(&mut self.stream, max_message_size).await?;
        Ok(CommandResponse::new(
            self.address.clone(),
            response.single_document(),
        ))
    }

    /// Gets the connection's StreamDescription.
    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description.as_ref().ok_or_else(|| {
            ErrorKind::Internal {
                message: "stream checked out but not handshaked".to_string(),
            }
            .into()
        })
    }

    /// Nullify the inner state and return it in a new `Connection` for checking back in to
    /// the pool from a `Drop` implementation.
    fn take(&mut self) -> Connection {
        Connection {
            id: self.id,
            address: self.address.clone(),
            generation: self.generation,
            stream_description: self.stream_description.take(),
            ready_and_available_time: None,
            last_used: self.last_used,
            error: self.error,
            socket_timeout: self.socket_timeout,
            pool_manager: None,
            pinned_sender: self.pinned_sender.take(),
            stream: std::mem::replace(&mut self.stream, AsyncStream::Null),
        }
    }

    pub(super) fn created_event(&self) -> ConnectionCreatedEvent {
        ConnectionCreatedEvent {
            address: self.address.clone(),
            connection_id: self.id,
        }
    }

    pub(super) fn ready_event(&self) -> ConnectionReadyEvent {
        ConnectionReadyEvent {
            address: self.address.clone(),
            connection_id: self.id,
        }
    }

    pub(super) fn checked_out_event(&self) -> ConnectionCheckedOutEvent {
        ConnectionCheckedOutEvent {
            address: self.address.clone(),
            connection_id: self.id,
        }
    }

    pub(super) fn checked_in_event(&self) -> ConnectionCheckedInEvent {
        ConnectionCheckedInEvent {
            address: self.address.clone(),
            connection_id: self.id,
        }
    }

    pub(super) fn closed_event(&self, reason: ConnectionClosedReason) -> ConnectionClosedEvent {
        ConnectionClosedEvent {
            address: self.address.clone(),
            connection_id: self.id,
            reason,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A connection that still holds a pool manager is being dropped while checked out:
        // hand it back to the pool worker, which will route it to its pinner, its idle queue,
        // or closure as appropriate. Connections without a manager are owned by the worker
        // itself and are closed explicitly there.
        if let Some(pool_manager) = self.pool_manager.take() {
            let dropped_connection = self.take();
            pool_manager.check_in(dropped_connection);
        }
    }
}

/// Tracks the state needed to establish a connection: the identity it will assume in its pool
/// plus the configuration for the stream.
#[derive(Debug)]
pub(crate) struct PendingConnection {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,
    pub(crate) generation: u32,
    pub(crate) socket_timeout: Option<Duration>,
}

impl PendingConnection {
    pub(super) fn created_event(&self) -> CmapEvent {
        CmapEvent::ConnectionCreated(ConnectionCreatedEvent {
            address: self.address.clone(),
            connection_id: self.id,
        })
    }
}

/// A handle to a pinned connection, held by the cursor (or other consumer) the connection is
/// bound to. Retrieval yields the same underlying connection each time, once it has been
/// returned by the previous user.
#[derive(Debug)]
pub(crate) struct PinnedConnectionHandle {
    id: u32,
    receiver: mpsc::Receiver<Connection>,
}

impl PinnedConnectionHandle {
    /// Retrieve the pinned connection. Will fail if the connection was closed or the previous
    /// user never returned it.
    pub(crate) async fn take_connection(&mut self) -> Result<Connection> {
        self.receiver.recv().await.ok_or_else(|| {
            Error::internal(format!(
                "cannot take connection after it was closed (id = {})",
                self.id
            ))
        })
    }
}
