pub(crate) mod handshake;

use std::time::Duration;

use self::handshake::{Handshaker, HandshakerOptions};
use super::conn::{Connection, PendingConnection};
use crate::{
    error::Result,
    hello::HelloReply,
    options::ClientOptions,
    runtime::AsyncStream,
};

/// Contains the logic to establish a connection: opening the stream and handshaking it. A
/// connection is not available to its pool until establishment completes.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionEstablisher {
    handshaker: Handshaker,
    connect_timeout: Option<Duration>,
}

impl ConnectionEstablisher {
    /// Creates a new ConnectionEstablisher from the given options.
    pub(crate) fn new(options: &ClientOptions) -> Self {
        Self {
            handshaker: Handshaker::new(HandshakerOptions {
                app_name: options.app_name.clone(),
                compressors: options.compressors.clone().unwrap_or_default(),
                load_balanced: options.load_balanced.unwrap_or(false),
            }),
            connect_timeout: options.connect_timeout,
        }
    }

    /// Establishes a connection and performs the handshake on it, returning the handshaked
    /// connection along with the hello reply it produced.
    pub(crate) async fn establish_connection(
        &self,
        pending_connection: PendingConnection,
    ) -> Result<(Connection, HelloReply)> {
        let stream =
            AsyncStream::connect(&pending_connection.address, self.connect_timeout).await?;
        let mut connection = Connection::new(pending_connection, stream);
        let reply = self.handshaker.handshake(&mut connection).await?;
        Ok((connection, reply))
    }
}
