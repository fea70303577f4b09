//! The `hello` command: the handshake and heartbeat probe servers reply to with a
//! self-description.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    bson::{oid::ObjectId, DateTime, Document},
    client::session::ClusterTime,
    cmap::{Command, Connection},
    doc,
    error::Result,
    options::ServerAddress,
    sdam::{ServerType, TopologyVersion},
    selection_criteria::TagSet,
};

/// The legacy version of the `hello` command which was deprecated in 5.0.
/// To limit usages of the legacy name in the codebase, this constant should be used
/// wherever possible.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";

/// Options for constructing an awaitable `hello`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AwaitableHelloOptions {
    pub(crate) topology_version: TopologyVersion,
    pub(crate) max_await_time: Duration,
}

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If `load_balanced` is true or the server previously indicated `helloOk: true`, `hello` is
/// used. Otherwise legacy hello is used, and if it's unknown whether the server supports
/// `hello`, the command also advertises `helloOk: true`.
pub(crate) fn hello_command(
    load_balanced: Option<bool>,
    hello_ok: Option<bool>,
    awaitable_options: Option<AwaitableHelloOptions>,
) -> Command {
    let (mut body, command_name) = if matches!(load_balanced, Some(true))
        || matches!(hello_ok, Some(true))
    {
        (doc! { "hello": 1 }, "hello")
    } else {
        let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
        if hello_ok.is_none() {
            body.insert("helloOk", true);
        }
        (body, LEGACY_HELLO_COMMAND_NAME)
    };

    if let Some(opts) = awaitable_options {
        body.insert(
            "topologyVersion",
            doc! {
                "processId": opts.topology_version.process_id,
                "counter": opts.topology_version.counter,
            },
        );
        body.insert(
            "maxAwaitTimeMS",
            i64::try_from(opts.max_await_time.as_millis()).unwrap_or(i64::MAX),
        );
    }

    Command::new(command_name, "admin", body)
}

/// Execute a hello or legacy hello command over the provided connection.
pub(crate) async fn run_hello(conn: &mut Connection, command: Command) -> Result<HelloReply> {
    let response = conn.send_command(command, None).await?;
    response.into_hello_reply(conn.address().clone())
}

/// A server's complete reply to a hello probe, together with the metadata extracted from it.
#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    pub(crate) raw_command_response: Document,
    pub(crate) cluster_time: Option<ClusterTime>,
}

/// The parsed body of a `hello` reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in a replica set, a
    /// mongos instance, or a standalone.
    pub is_writable_primary: Option<bool>,

    /// Legacy name for `is_writable_primary`.
    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,

    /// Whether the server supports the `hello` command for monitoring instead of the legacy
    /// hello command.
    pub hello_ok: Option<bool>,

    /// The list of all hosts.
    pub hosts: Option<Vec<String>>,

    /// The list of all passive members of the replica set.
    pub passives: Option<Vec<String>>,

    /// The list of all arbiters in the replica set.
    pub arbiters: Option<Vec<String>>,

    /// An optional message. This contains the value "isdbgrid" when returned from a mongos.
    pub msg: Option<String>,

    /// The address of the server that returned this reply, from its own point of view.
    pub me: Option<String>,

    /// The list of compatible compressors that the server returned.
    #[serde(rename = "compression")]
    pub compressors: Option<Vec<String>>,

    /// The current replica set config version.
    pub set_version: Option<i32>,

    /// The name of the current replica set.
    pub set_name: Option<String>,

    /// Whether the server is hidden.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub arbiter_only: Option<bool>,

    /// Whether the server is a replica set member that is not yet in a recognized state.
    #[serde(rename = "isreplicaset")]
    pub is_replica_set: Option<bool>,

    /// The time in minutes that a session remains active after its most recent use.
    pub logical_session_timeout_minutes: Option<i64>,

    /// Optime and date information for the server's most recent write operation.
    pub last_write: Option<LastWrite>,

    /// The minimum wire version that the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub max_wire_version: Option<i32>,

    /// User-defined tags for a replica set member.
    pub tags: Option<TagSet>,

    /// A unique identifier for each election.
    pub election_id: Option<ObjectId>,

    /// The address of the current primary member of the replica set.
    pub primary: Option<String>,

    /// If the connection is to a load balancer, the id of the selected backend.
    pub service_id: Option<ObjectId>,

    /// An opaque version tracking the server's state; monotonically increasing per process.
    pub topology_version: Option<TopologyVersion>,

    /// The maximum permitted size of a BSON object in bytes.
    pub max_bson_object_size: Option<i64>,

    /// The maximum permitted size of a wire protocol message.
    pub max_message_size_bytes: Option<i32>,

    /// The maximum number of write operations permitted in a write batch.
    pub max_write_batch_size: Option<i64>,
}

impl HelloCommandResponse {
    /// Classifies the replying server per the discovery rules.
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

/// Optime and date information for the server's most recent write operation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LastWrite {
    /// The date of the most recent write operation observed by this server.
    pub last_write_date: DateTime,
}

#[cfg(test)]
mod test {
    use super::*;

    fn response(doc: Document) -> HelloCommandResponse {
        crate::bson::from_document(doc).unwrap()
    }

    #[test]
    fn classifies_server_types() {
        assert_eq!(response(doc! {}).server_type(), ServerType::Standalone);
        assert_eq!(
            response(doc! { "msg": "isdbgrid" }).server_type(),
            ServerType::Mongos
        );
        assert_eq!(
            response(doc! { "setName": "rs", "isWritablePrimary": true }).server_type(),
            ServerType::RsPrimary
        );
        assert_eq!(
            response(doc! { "setName": "rs", "ismaster": true }).server_type(),
            ServerType::RsPrimary
        );
        assert_eq!(
            response(doc! { "setName": "rs", "secondary": true }).server_type(),
            ServerType::RsSecondary
        );
        assert_eq!(
            response(doc! { "setName": "rs", "arbiterOnly": true }).server_type(),
            ServerType::RsArbiter
        );
        assert_eq!(
            response(doc! { "setName": "rs", "hidden": true, "secondary": true }).server_type(),
            ServerType::RsOther
        );
        assert_eq!(
            response(doc! { "isreplicaset": true }).server_type(),
            ServerType::RsGhost
        );
    }

    #[test]
    fn legacy_hello_advertises_hello_ok() {
        let command = hello_command(None, None, None);
        assert_eq!(command.name, LEGACY_HELLO_COMMAND_NAME);
        assert_eq!(command.body.get_bool("helloOk"), Some(true));

        let command = hello_command(None, Some(true), None);
        assert_eq!(command.name, "hello");
        assert!(!command.body.contains_key("helloOk"));
    }
}
