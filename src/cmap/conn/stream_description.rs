use std::time::Duration;

use crate::{hello::HelloReply, options::ServerAddress, sdam::ServerType};

/// Contains the results of the handshake on a given connection: the facts about the server on
/// the other end that operation building needs.
#[derive(Debug, Default, Clone)]
pub(crate) struct StreamDescription {
    /// The address of the server.
    pub(crate) server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub(crate) initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub(crate) max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    pub(crate) min_wire_version: Option<i32>,

    /// How long sessions started on this server remain active after their last use.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The maximum size of writes (excluding command overhead) that should be sent to the
    /// server.
    pub(crate) max_bson_object_size: Option<i64>,

    /// The maximum size of BSON wire protocol messages the server accepts.
    pub(crate) max_message_size_bytes: Option<i32>,

    /// Whether the server understands the `hello` command.
    pub(crate) hello_ok: bool,

    /// The compressor negotiated during the handshake, if any. Negotiation only: the name the
    /// server picked from the advertised list is recorded here for the transport layer.
    pub(crate) negotiated_compressor: Option<String>,

    /// If the connection is to a load balancer, the id of the selected backend.
    pub(crate) service_id: Option<crate::bson::oid::ObjectId>,
}

impl StreamDescription {
    /// Constructs a new StreamDescription from a hello reply.
    pub(crate) fn from_hello_reply(reply: &HelloReply, advertised_compressors: &[String]) -> Self {
        let response = &reply.command_response;
        Self {
            server_address: reply.server_address.clone(),
            initial_server_type: response.server_type(),
            max_wire_version: response.max_wire_version,
            min_wire_version: response.min_wire_version,
            logical_session_timeout: response
                .logical_session_timeout_minutes
                .map(|mins| Duration::from_secs(mins as u64 * 60)),
            max_bson_object_size: response.max_bson_object_size,
            max_message_size_bytes: response.max_message_size_bytes,
            hello_ok: response.hello_ok.unwrap_or(false),
            // The server replies with the subset of advertised compressors it supports, in
            // its preference order; the first shared one wins.
            negotiated_compressor: response.compressors.as_ref().and_then(|supported| {
                supported
                    .iter()
                    .find(|c| advertised_compressors.contains(c))
                    .cloned()
            }),
            service_id: response.service_id,
        }
    }

    /// Whether this server supports sessions.
    pub(crate) fn supports_sessions(&self) -> bool {
        self.logical_session_timeout.is_some()
    }

    /// Whether this server supports retryable writes.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.initial_server_type != ServerType::Standalone
            && self.logical_session_timeout.is_some()
            && self.max_wire_version.map_or(false, |version| version >= 6)
    }
}
