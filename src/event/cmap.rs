//! Contains the events and functionality for monitoring the behavior of the connection pools.

use std::time::Duration;

use serde::Serialize;

use crate::{options::ServerAddress, serde_util};

/// Event emitted when a connection pool is created.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PoolCreatedEvent {
    /// The address of the server that the pool's connections will connect to.
    pub address: ServerAddress,

    /// The options used for the pool.
    pub options: Option<ConnectionPoolOptions>,
}

/// The pool configuration carried on a [`PoolCreatedEvent`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionPoolOptions {
    /// The maximum number of connections that the pool can manage, including connections
    /// checked out of the pool.
    pub max_pool_size: Option<u32>,

    /// The minimum number of connections that the pool keeps established.
    pub min_pool_size: Option<u32>,

    /// Connections idle longer than this are closed.
    pub max_idle_time: Option<Duration>,
}

/// Event emitted when a connection pool becomes ready.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PoolReadyEvent {
    /// The address of the server that the pool's connections connect to.
    pub address: ServerAddress,
}

/// Event emitted when a connection pool is cleared.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PoolClearedEvent {
    /// The address of the server that the pool's connections connect to.
    pub address: ServerAddress,
}

/// Event emitted when a connection pool is closed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PoolClosedEvent {
    /// The address of the server that the pool's connections connected to.
    pub address: ServerAddress,
}

/// Event emitted when a connection is created.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionCreatedEvent {
    /// The address of the server that the connection will connect to.
    pub address: ServerAddress,

    /// The unique ID of the connection within its pool.
    pub connection_id: u32,
}

/// Event emitted when a connection finishes its handshake and is ready for use.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionReadyEvent {
    /// The address of the server that the connection is connected to.
    pub address: ServerAddress,

    /// The unique ID of the connection within its pool.
    pub connection_id: u32,
}

/// Event emitted when a connection is closed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionClosedEvent {
    /// The address of the server that the connection was connected to.
    pub address: ServerAddress,

    /// The unique ID of the connection within its pool.
    pub connection_id: u32,

    /// The reason that the connection was closed.
    pub reason: ConnectionClosedReason,
}

/// The reasons that a connection may be closed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ConnectionClosedReason {
    /// The connection was idle for too long.
    Idle,

    /// The connection's generation no longer matches its pool's.
    Stale,

    /// An error occurred while using the connection.
    Error,

    /// The connection was dropped while still in use.
    Dropped,

    /// The pool that the connection belongs to was closed.
    PoolClosed,
}

/// Event emitted when an operation begins waiting to check a connection out of a pool.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionCheckoutStartedEvent {
    /// The address of the pool being checked out of.
    pub address: ServerAddress,
}

/// Event emitted when a connection checkout fails.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionCheckoutFailedEvent {
    /// The address of the pool that the checkout was attempted against.
    pub address: ServerAddress,

    /// The reason that the checkout failed.
    pub reason: ConnectionCheckoutFailedReason,

    /// The error the checkout failed with, if any.
    #[serde(serialize_with = "serialize_error_option_as_string")]
    pub error: Option<crate::error::Error>,
}

fn serialize_error_option_as_string<S: serde::Serializer>(
    val: &Option<crate::error::Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(e) => serde_util::serialize_error_as_string(e, serializer),
        None => serializer.serialize_none(),
    }
}

/// The reasons that a connection checkout may fail.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum ConnectionCheckoutFailedReason {
    /// No connection became available before the wait queue timeout elapsed.
    Timeout,

    /// An error occurred while establishing a connection.
    ConnectionError,
}

/// Event emitted when a connection is successfully checked out of a pool.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionCheckedOutEvent {
    /// The address of the server that the connection is connected to.
    pub address: ServerAddress,

    /// The unique ID of the connection within its pool.
    pub connection_id: u32,
}

/// Event emitted when a connection is checked back into a pool.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionCheckedInEvent {
    /// The address of the server that the connection is connected to.
    pub address: ServerAddress,

    /// The unique ID of the connection within its pool.
    pub connection_id: u32,
}

/// The set of connection-pool-monitoring events.
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
#[serde(untagged)]
#[non_exhaustive]
pub enum CmapEvent {
    PoolCreated(PoolCreatedEvent),
    PoolReady(PoolReadyEvent),
    PoolCleared(PoolClearedEvent),
    PoolClosed(PoolClosedEvent),
    ConnectionCreated(ConnectionCreatedEvent),
    ConnectionReady(ConnectionReadyEvent),
    ConnectionClosed(ConnectionClosedEvent),
    ConnectionCheckoutStarted(ConnectionCheckoutStartedEvent),
    ConnectionCheckoutFailed(ConnectionCheckoutFailedEvent),
    ConnectionCheckedOut(ConnectionCheckedOutEvent),
    ConnectionCheckedIn(ConnectionCheckedInEvent),
}

macro_rules! impl_from_for_cmap_event {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for CmapEvent {
            fn from(event: $ty) -> Self {
                CmapEvent::$variant(event)
            }
        }
    };
}

impl_from_for_cmap_event!(PoolCreatedEvent, PoolCreated);
impl_from_for_cmap_event!(PoolReadyEvent, PoolReady);
impl_from_for_cmap_event!(PoolClearedEvent, PoolCleared);
impl_from_for_cmap_event!(PoolClosedEvent, PoolClosed);
impl_from_for_cmap_event!(ConnectionCreatedEvent, ConnectionCreated);
impl_from_for_cmap_event!(ConnectionReadyEvent, ConnectionReady);
impl_from_for_cmap_event!(ConnectionClosedEvent, ConnectionClosed);
impl_from_for_cmap_event!(ConnectionCheckoutStartedEvent, ConnectionCheckoutStarted);
impl_from_for_cmap_event!(ConnectionCheckoutFailedEvent, ConnectionCheckoutFailed);
impl_from_for_cmap_event!(ConnectionCheckedOutEvent, ConnectionCheckedOut);
impl_from_for_cmap_event!(ConnectionCheckedInEvent, ConnectionCheckedIn);
