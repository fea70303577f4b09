//! Cursors over command result batches.

use std::collections::VecDeque;

use serde::de::DeserializeOwned;

use crate::{
    bson::Document,
    client::session::ClientSession,
    cmap::conn::PinnedConnectionHandle,
    doc,
    error::Result,
    operation::{GetMore, Namespace, RunCommand},
    options::ServerAddress,
    Client,
};

/// The driver-side state needed to iterate a server-side cursor, produced by a
/// cursor-returning operation's reply.
#[derive(Debug)]
pub(crate) struct CursorSpecification {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) initial_buffer: Vec<Document>,
}

impl CursorSpecification {
    pub(crate) fn new(
        ns: Namespace,
        address: ServerAddress,
        id: i64,
        batch_size: Option<u32>,
        initial_buffer: Vec<Document>,
    ) -> Self {
        Self {
            ns,
            address,
            id,
            batch_size,
            initial_buffer,
        }
    }
}

/// A cursor over the result set of an operation.
///
/// A `Cursor` streams the result of a query in batches: iterating it yields documents from
/// the current batch until it is empty, then fetches the next batch from the server the
/// cursor originated on (`getMore` is bound to that server — and, on load-balanced
/// deployments, to the originating connection itself).
///
/// ```no_run
/// # use mongolite::{error::Result, Client};
/// # async fn iterate(client: Client) -> Result<()> {
/// let db = client.database("app");
/// let mut cursor = db.find("items", mongolite::doc! { "live": true }, None).await?;
/// while cursor.advance().await? {
///     println!("item: {}", cursor.current());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cursor {
    client: Client,
    ns: Namespace,
    address: ServerAddress,
    id: i64,
    batch_size: Option<u32>,
    buffer: VecDeque<Document>,
    current: Option<Document>,
    exhausted: bool,
    session: Option<ClientSession>,
    pinned_connection: Option<PinnedConnectionHandle>,
}

impl Cursor {
    pub(crate) fn new(
        client: Client,
        spec: CursorSpecification,
        session: Option<ClientSession>,
        pinned_connection: Option<PinnedConnectionHandle>,
    ) -> Self {
        Self {
            client,
            ns: spec.ns,
            address: spec.address,
            id: spec.id,
            batch_size: spec.batch_size,
            buffer: spec.initial_buffer.into(),
            current: None,
            exhausted: spec.id == 0,
            session,
            pinned_connection,
        }
    }

    /// Move the cursor forward, potentially triggering a getMore against the server. Returns
    /// whether a new document is available via [`Cursor::current`].
    pub async fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                self.current = Some(doc);
                return Ok(true);
            }

            if self.exhausted {
                self.current = None;
                return Ok(false);
            }

            self.fetch_next_batch().await?;
        }
    }

    /// The document the cursor is currently pointing at.
    ///
    /// This will panic if the cursor was never advanced or its last advance returned `false`
    /// or errored.
    pub fn current(&self) -> &Document {
        self.current.as_ref().expect("no current document")
    }

    /// Deserialize the current document into a `T`.
    pub fn deserialize_current<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_document(self.current().clone())
    }

    async fn fetch_next_batch(&mut self) -> Result<()> {
        let get_more = GetMore::new(
            self.ns.clone(),
            self.id,
            self.address.clone(),
            self.batch_size,
        );

        let result = match self.pinned_connection {
            Some(ref mut handle) => {
                let mut connection = handle.take_connection().await?;
                let result = self
                    .client
                    .execute_operation_on_pinned_connection(
                        get_more,
                        &mut connection,
                        self.session.as_mut(),
                    )
                    .await;
                // Dropping the connection routes it back to the pin for the next batch.
                drop(connection);
                result
            }
            None => {
                self.client
                    .execute_operation(get_more, self.session.as_mut())
                    .await
            }
        };

        match result {
            Ok(get_more_result) => {
                self.buffer = get_more_result.batch.into();
                self.exhausted = get_more_result.exhausted;
                if self.exhausted {
                    self.id = 0;
                }
                Ok(())
            }
            Err(e) => {
                // Cursor errors are terminal; the server reaps the cursor if it is gone.
                self.exhausted = true;
                self.id = 0;
                Err(e)
            }
        }
    }

    fn kill_server_side_cursor(&mut self) {
        if self.id == 0 {
            return;
        }
        let client = self.client.clone();
        let ns = self.ns.clone();
        let id = self.id;
        let spec = RunCommand::new(
            ns.db.clone(),
            doc! { "killCursors": ns.coll.clone(), "cursors": [id] },
            Some(crate::selection_criteria::SelectionCriteria::from_address(
                self.address.clone(),
            )),
        );
        crate::runtime::spawn(async move {
            // Best effort: an unreachable server reaps its own cursors on timeout.
            let op = match spec {
                Ok(op) => op,
                Err(_) => return,
            };
            let _: Result<Document> = client.execute_operation(op, None).await;
        });
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.kill_server_side_cursor();
    }
}

impl Cursor {
    /// Collect the remaining documents into a vector, deserializing each into a `T`.
    pub async fn try_collect<T: DeserializeOwned>(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while self.advance().await? {
            out.push(self.deserialize_current()?);
        }
        Ok(out)
    }
}
