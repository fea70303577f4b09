//! Contains the events and functionality to monitor the commands and responses that a
//! [`Client`](crate::Client) sends and receives from the server.

use std::time::Duration;

use serde::Serialize;

use crate::{
    bson::Document,
    error::Error,
    options::ServerAddress,
    serde_util,
};

/// Command and reply documents larger than this many encoded bytes are elided from events
/// unless the client is configured otherwise.
pub(crate) const DEFAULT_MAX_EVENT_DOCUMENT_LENGTH_BYTES: usize = 10_000;

/// Returns the document to embed in an event: the original if it is within the configured
/// bound, or a stand-in noting the elision otherwise.
pub(crate) fn bounded_document(doc: &Document, max_length_bytes: usize) -> Document {
    match doc.to_vec() {
        Ok(bytes) if bytes.len() > max_length_bytes => {
            crate::doc! { "elided": format!("{} byte document", bytes.len()) }
        }
        _ => doc.clone(),
    }
}

/// An event that triggers when a database command is initiated.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command being run. Elided if larger than the configured maximum event document
    /// length.
    pub command: Document,

    /// The name of the database the command is being run against.
    pub db: String,

    /// The type of command being run, e.g. "find" or "hello".
    pub command_name: String,

    /// The driver-generated identifier for the request. Applications can use this to identify
    /// the corresponding [`CommandSucceededEvent`] or [`CommandFailedEvent`].
    pub request_id: i32,

    /// Information about the connection the command will be run on.
    pub connection: ConnectionInfo,
}

/// An event that triggers when a database command completes without an error.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The server's reply to the command. Elided if larger than the configured maximum event
    /// document length.
    pub reply: Document,

    /// The type of command that was run, e.g. "find" or "hello".
    pub command_name: String,

    /// The driver-generated identifier for the request.
    pub request_id: i32,

    /// Information about the connection the command was run on.
    pub connection: ConnectionInfo,
}

/// An event that triggers when a command fails to complete successfully.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The type of command that was run, e.g. "find" or "hello".
    pub command_name: String,

    /// The error that the driver returned due to the event failing.
    #[serde(serialize_with = "serde_util::serialize_error_as_string")]
    pub failure: Error,

    /// The driver-generated identifier for the request.
    pub request_id: i32,

    /// Information about the connection the command was run on.
    pub connection: ConnectionInfo,
}

/// User-facing information about a connection to the database.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// A driver-generated identifier that uniquely identifies the connection within its pool.
    pub id: u32,

    /// The address that the connection is connected to.
    pub address: ServerAddress,
}

/// The set of command-monitoring events.
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
#[serde(untagged)]
#[non_exhaustive]
pub enum CommandEvent {
    /// A command was started.
    Started(CommandStartedEvent),

    /// A command succeeded.
    Succeeded(CommandSucceededEvent),

    /// A command failed.
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    /// The name of the command this event corresponds to.
    pub fn command_name(&self) -> &str {
        match self {
            CommandEvent::Started(event) => event.command_name.as_str(),
            CommandEvent::Succeeded(event) => event.command_name.as_str(),
            CommandEvent::Failed(event) => event.command_name.as_str(),
        }
    }

    /// The driver-generated identifier for the request.
    pub fn request_id(&self) -> i32 {
        match self {
            CommandEvent::Started(event) => event.request_id,
            CommandEvent::Succeeded(event) => event.request_id,
            CommandEvent::Failed(event) => event.request_id,
        }
    }
}
