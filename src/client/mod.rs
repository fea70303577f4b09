mod executor;
pub mod options;
pub mod session;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use derivative::Derivative;

use self::session::{ClientSession, ServerSession, ServerSessionPool, SessionOptions};
use crate::{
    bson::oid::ObjectId,
    concern::{ReadConcern, WriteConcern},
    db::Database,
    error::{ErrorKind, Result},
    operation::EndSessions,
    options::ClientOptions,
    sdam::{server_selection, SelectedServer, Topology},
    selection_criteria::{ReadPreference, SelectionCriteria},
};

const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// This is the main entry point for the API. A `Client` is used to connect to a deployment
/// and, from there, to obtain [`Database`] handles, run commands, and start sessions.
///
/// By default, the client monitors the topology of the deployment it is connected to,
/// keeping track of any changes, such as servers being added or removed.
///
/// `Client` uses [`std::sync::Arc`] internally, so it can be shared across tasks or threads
/// cheaply by cloning.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ClientInner {
    /// A process-unique identity for this client, used to reject sessions that were started
    /// by a different client.
    id: ObjectId,

    topology: Topology,
    options: ClientOptions,
    session_pool: ServerSessionPool,
}

impl Client {
    /// Creates a new `Client` connected to the deployment specified by `uri`. `uri` must be a
    /// valid connection string.
    pub async fn with_uri_str(uri: impl AsRef<str>) -> Result<Self> {
        let options = ClientOptions::parse(uri.as_ref()).await?;

        Client::with_options(options)
    }

    /// Creates a new `Client` connected to the deployment specified by `options`.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let inner = Arc::new(ClientInner {
            id: ObjectId::new(),
            topology: Topology::new(options.clone())?,
            session_pool: ServerSessionPool::new(),
            options,
        });

        Ok(Self { inner })
    }

    /// Gets the default selection criteria the `Client` uses for operations.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.options.selection_criteria.as_ref()
    }

    /// Gets the default read concern the `Client` uses for operations.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.options.read_concern.as_ref()
    }

    /// Gets the default write concern the `Client` uses for operations.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.options.write_concern.as_ref()
    }

    /// Gets a handle to a database specified by `name` in the deployment the `Client` is
    /// connected to.
    ///
    /// This method does not send or receive anything across the wire to the database, so it
    /// can be used repeatedly without incurring any costs from I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// Gets a handle to the default database specified in the `Client`'s connection string,
    /// if one was provided.
    pub fn default_database(&self) -> Option<Database> {
        self.inner
            .options
            .default_database
            .as_ref()
            .map(|name| Database::new(self.clone(), name))
    }

    /// Starts a new [`ClientSession`].
    pub async fn start_session(
        &self,
        options: impl Into<Option<SessionOptions>>,
    ) -> ClientSession {
        let server_session = self
            .inner
            .session_pool
            .check_out(self.inner.topology.logical_session_timeout())
            .await;
        ClientSession::new(server_session, self.clone(), options.into())
    }

    pub(crate) async fn start_session_internal(
        &self,
        options: Option<SessionOptions>,
        implicit: bool,
    ) -> ClientSession {
        let server_session = self
            .inner
            .session_pool
            .check_out(self.inner.topology.logical_session_timeout())
            .await;
        if implicit {
            ClientSession::new_implicit(server_session, self.clone())
        } else {
            ClientSession::new(server_session, self.clone(), options)
        }
    }

    /// Shut the client down: end its pooled server sessions on the deployment (in batches)
    /// and stop its monitors and connection pools.
    ///
    /// Sessions and cursors in use are invalidated. Dropping the last clone of a `Client`
    /// performs the same cleanup implicitly, minus the `endSessions` notification.
    pub async fn shutdown(self) {
        let session_ids = self.inner.session_pool.drain().await;
        let batches = session_ids
            .chunks(EndSessions::MAX_BATCH_SIZE)
            .map(|batch| self.execute_operation(EndSessions::new(batch.to_vec()), None));
        // Best effort: abandoned sessions expire server-side on their own.
        let _ = futures_util::future::join_all(batches).await;
        self.inner.topology.shutdown().await;
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub(crate) async fn check_in_server_session(&self, session: ServerSession) {
        let timeout = self.inner.topology.logical_session_timeout();
        self.inner.session_pool.check_in(session, timeout).await;
    }

    /// Select a server matching the criteria, retrying on topology changes until the server
    /// selection timeout elapses.
    pub(crate) async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer> {
        let default_criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        let criteria = criteria
            .or(self.inner.options.selection_criteria.as_ref())
            .unwrap_or(&default_criteria);

        let start_time = Instant::now();
        let timeout = self
            .inner
            .options
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);

        let mut watcher = self.inner.topology.watch();
        loop {
            let state = watcher.observe_latest();

            if let Some(server) = server_selection::attempt_to_select_server(
                criteria,
                &state.description,
                &state.servers(),
            )? {
                return Ok(server);
            }

            // No server matched this snapshot: ask the monitors to check now, then wait for
            // the topology to change, bounded by the remaining time budget.
            watcher.request_immediate_check();

            let remaining = match timeout.checked_sub(start_time.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    return Err(ErrorKind::ServerSelection {
                        message: state
                            .description
                            .server_selection_timeout_error_message(criteria),
                    }
                    .into())
                }
            };

            watcher.wait_for_update(remaining).await;
        }
    }
}
