use std::time::Duration;

use crate::{
    event::{cmap::CmapEvent, EventHandler},
    options::ClientOptions,
};

/// The configuration a connection pool runs under, derived from the client options.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConnectionPoolOptions {
    /// The maximum number of connections that the pool can manage, including connections
    /// currently checked out of the pool.
    pub(crate) max_pool_size: Option<u32>,

    /// The minimum number of connections the pool keeps established in the background.
    pub(crate) min_pool_size: Option<u32>,

    /// Connections that have been ready for usage in the pool for longer than this are closed
    /// rather than handed out.
    pub(crate) max_idle_time: Option<Duration>,

    /// The maximum time a checkout waits for a connection to become available before failing.
    pub(crate) wait_queue_timeout: Option<Duration>,

    /// Timeout applied to opening the TCP stream of a new connection.
    pub(crate) connect_timeout: Option<Duration>,

    /// Timeout applied to each send or receive on an established connection.
    pub(crate) socket_timeout: Option<Duration>,

    /// The handler that processes CMAP events emitted by the pool.
    pub(crate) cmap_event_handler: Option<EventHandler<CmapEvent>>,
}

impl ConnectionPoolOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            max_pool_size: options.max_pool_size,
            min_pool_size: options.min_pool_size,
            max_idle_time: options.max_idle_time,
            wait_queue_timeout: options.wait_queue_timeout,
            connect_timeout: options.connect_timeout,
            socket_timeout: options.socket_timeout,
            cmap_event_handler: options.cmap_event_handler.clone(),
        }
    }

    pub(crate) fn to_event_options(&self) -> crate::event::cmap::ConnectionPoolOptions {
        crate::event::cmap::ConnectionPoolOptions {
            max_pool_size: self.max_pool_size,
            min_pool_size: self.min_pool_size,
            max_idle_time: self.max_idle_time,
        }
    }
}
