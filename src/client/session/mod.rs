//! Logical sessions: identity, causal-consistency bookkeeping, and server-session reuse.

mod cluster_time;
mod pool;
#[cfg(test)]
mod test;

use std::time::{Duration, Instant};

use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    bson::{Binary, Bson, Document, Timestamp},
    doc,
    Client,
};

pub use cluster_time::ClusterTime;
pub(crate) use pool::ServerSessionPool;

/// Session to be used with client operations. This acts as a handle to a server session.
/// This keeps the details of how server sessions are pooled opaque to users.
///
/// `ClientSession`s are not thread safe or fork safe; they can only be used by one thread or
/// process at a time, which Rust's borrow rules enforce: every operation that uses a session
/// takes it `&mut`.
#[derive(Debug)]
pub struct ClientSession {
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    server_session: ServerSession,
    client: Client,
    is_implicit: bool,
    options: Option<SessionOptions>,
}

/// The options to configure a [`ClientSession`].
#[derive(Clone, Debug, Default, TypedBuilder, PartialEq)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct SessionOptions {
    /// Whether reads in the session observe the session's own preceding writes. Defaults to
    /// true for explicitly-started sessions.
    pub causal_consistency: Option<bool>,
}

impl ClientSession {
    /// Creates a new explicit `ClientSession` wrapping the provided server session.
    pub(crate) fn new(
        server_session: ServerSession,
        client: Client,
        options: Option<SessionOptions>,
    ) -> Self {
        Self {
            client,
            server_session,
            cluster_time: None,
            operation_time: None,
            is_implicit: false,
            options,
        }
    }

    /// Creates a new implicit session, used internally when the user provides none.
    pub(crate) fn new_implicit(server_session: ServerSession, client: Client) -> Self {
        Self {
            client,
            server_session,
            cluster_time: None,
            operation_time: None,
            is_implicit: true,
            options: None,
        }
    }

    /// The id of this session.
    pub fn id(&self) -> &Document {
        &self.server_session.id
    }

    /// Whether this session was created implicitly by the driver or explicitly by the user.
    pub(crate) fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    /// Whether operations in this session observe the session's own preceding writes.
    pub(crate) fn causal_consistency(&self) -> bool {
        // Implicit sessions carry no causal-consistency state; explicit ones default to it.
        self.options
            .as_ref()
            .and_then(|options| options.causal_consistency)
            .unwrap_or(!self.is_implicit)
    }

    /// The client this session was started from.
    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// The highest cluster time this session has seen so far, if any.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The logical time of the last operation observed in this session, if any.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// Set the cluster time to the provided one if it is greater than this session's highest
    /// seen cluster time or if this session's cluster time is `None`.
    pub(crate) fn advance_cluster_time(&mut self, to: &ClusterTime) {
        if self.cluster_time().map(|ct| ct < to).unwrap_or(true) {
            self.cluster_time = Some(to.clone());
        }
    }

    /// Advance the session's operation time to the provided one if it is newer, compared
    /// lexicographically on `(time, increment)`.
    pub(crate) fn advance_operation_time(&mut self, to: Timestamp) {
        if self.operation_time.map(|current| current < to).unwrap_or(true) {
            self.operation_time = Some(to);
        }
    }

    /// Mark this session (and the underlying server session) as dirty: a network error was
    /// seen while it was in use, so its server session is discarded rather than reused.
    pub(crate) fn mark_dirty(&mut self) {
        self.server_session.dirty = true;
    }

    /// Updates the date that the underlying server session was last used as part of an
    /// operation sent to the server.
    pub(crate) fn update_last_use(&mut self) {
        self.server_session.last_use = Instant::now();
    }

    /// Allocates the next transaction number for a retryable write run under this session.
    pub(crate) fn get_and_increment_txn_number(&mut self) -> i64 {
        self.server_session.txn_number += 1;
        self.server_session.txn_number
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        let client = self.client.clone();
        let server_session = ServerSession {
            id: self.server_session.id.clone(),
            last_use: self.server_session.last_use,
            dirty: self.server_session.dirty,
            txn_number: self.server_session.txn_number,
        };

        crate::runtime::spawn(async move {
            client.check_in_server_session(server_session).await;
        });
    }
}

/// Client side abstraction of a server session. These are pooled and may be associated with
/// multiple `ClientSession`s over the course of their lifetime.
#[derive(Debug)]
pub(crate) struct ServerSession {
    /// The id of the server session to which this corresponds.
    pub(crate) id: Document,

    /// The last time an operation was executed with this session.
    last_use: Instant,

    /// Whether a network error was encountered while using this session.
    dirty: bool,

    /// A monotonically increasing transaction number for this session.
    txn_number: i64,
}

impl ServerSession {
    /// Creates a new session, generating the id client side.
    fn new() -> Self {
        let binary = Bson::Binary(Binary::from_uuid(Uuid::new_v4()));

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Determines if this server session is about to expire within the next minute, after
    /// which the server may discard it at any time. When the deployment has not advertised a
    /// timeout, sessions are assumed fresh.
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        match logical_session_timeout {
            Some(timeout) => {
                let expiration_date = self.last_use + timeout;
                expiration_date < Instant::now() + Duration::from_secs(60)
            }
            None => false,
        }
    }
}
