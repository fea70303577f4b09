//! The `Database` handle and its operation options.

use serde::Serialize;
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    client::session::ClientSession,
    concern::ReadConcern,
    cursor::Cursor,
    error::Result,
    operation::{Count, Find, Namespace, RunCommand, Update},
    results::UpdateResult,
    selection_criteria::SelectionCriteria,
    Client,
};

/// A handle to a database in the deployment a [`Client`] is connected to.
///
/// `Database` is the thinnest surface over the executor: arbitrary commands, queries that
/// produce cursors, counting, and single-document updates — enough to drive every subsystem
/// of the driver. It can be created from a `Client` with [`Client::database`] and used
/// concurrently from multiple tasks.
#[derive(Clone, Debug)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    /// The name of the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client this database handle was created from.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Runs a database-level command.
    ///
    /// Note that no inspection is done on the document, so the command will be sent as-is and
    /// could fail on the server if it is malformed.
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        let operation = RunCommand::new(self.name.clone(), command, None)?;
        self.client.execute_operation(operation, None).await
    }

    /// Runs a database-level command using the provided session.
    pub async fn run_command_with_session(
        &self,
        command: Document,
        session: &mut ClientSession,
    ) -> Result<Document> {
        let operation = RunCommand::new(self.name.clone(), command, None)?;
        self.client.execute_operation(operation, session).await
    }

    /// Counts the documents in `coll` matching `filter`.
    pub async fn count_documents(
        &self,
        coll: &str,
        filter: impl Into<Option<Document>>,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<u64> {
        let operation = Count::new(
            Namespace::new(self.name.clone(), coll),
            filter.into(),
            self.client.read_concern().cloned(),
            self.client.selection_criteria().cloned(),
        );
        self.client.execute_operation(operation, session).await
    }

    /// Runs a query against `coll`, returning a [`Cursor`] over the matching documents.
    pub async fn find(
        &self,
        coll: &str,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor> {
        let operation = Find::new(
            Namespace::new(self.name.clone(), coll),
            filter.into(),
            options.into(),
        );
        let (spec, pinned_connection, session) =
            self.client.execute_cursor_operation(operation).await?;
        Ok(Cursor::new(
            self.client.clone(),
            spec,
            session,
            pinned_connection,
        ))
    }

    /// Updates at most one document in `coll` matching `query`. This is a retryable write
    /// when the client is configured for them.
    pub async fn update_one(
        &self,
        coll: &str,
        query: Document,
        update: Document,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<UpdateResult> {
        let operation = Update::new(
            Namespace::new(self.name.clone(), coll),
            query,
            update,
            false,
            None,
            self.client.write_concern().cloned(),
        );
        self.client.execute_operation(operation, session).await
    }
}

/// Options for a [`Database::find`] query.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// The maximum number of documents to return.
    pub limit: Option<i64>,

    /// The number of documents the server returns per batch.
    pub batch_size: Option<u32>,

    /// The order of the returned documents.
    pub sort: Option<Document>,

    /// Limits the fields of the returned documents.
    pub projection: Option<Document>,

    /// The read concern for the query.
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the query.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}
