use serde::de::DeserializeOwned;

use crate::{
    bson::{Bson, Document, Timestamp},
    bson_util,
    client::session::ClusterTime,
    error::{CommandError, Error, ErrorKind, Result},
    hello::HelloReply,
    options::ServerAddress,
    selection_criteria::ReadPreference,
};

/// Driver-side model of a database command: everything needed to serialize it into a wire
/// message.
#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
}

impl Command {
    /// Constructs a new command.
    pub(crate) fn new(
        name: impl Into<String>,
        target_db: impl Into<String>,
        body: Document,
    ) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
        }
    }

    /// Attach the session this command runs under.
    pub(crate) fn set_session_id(&mut self, lsid: &Document) {
        self.body.insert("lsid", lsid.clone());
    }

    /// Attach the highest cluster time the client has seen.
    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        if let Ok(doc) = crate::bson::to_bson(cluster_time) {
            self.body.insert("$clusterTime", doc);
        }
    }

    /// Attach the transaction number for a retryable write.
    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }

    /// Attach `readConcern.afterClusterTime` for a causally consistent read, preserving any
    /// read concern level the command already carries.
    pub(crate) fn set_after_cluster_time(&mut self, operation_time: Timestamp) {
        match self.body.get_mut("readConcern") {
            Some(Bson::Document(read_concern)) => {
                read_concern.insert("afterClusterTime", operation_time);
            }
            _ => {
                self.body.insert(
                    "readConcern",
                    crate::doc! { "afterClusterTime": operation_time },
                );
            }
        }
    }

    /// Attach a `$readPreference` to route this command appropriately.
    pub(crate) fn set_read_preference(&mut self, read_pref: ReadPreference) {
        if let Ok(doc) = crate::bson::to_bson(&read_pref) {
            self.body.insert("$readPreference", doc);
        }
    }

    /// The full document to put on the wire, including the target database.
    pub(crate) fn into_wire_document(mut self) -> Document {
        self.body.insert("$db", self.target_db);
        self.body
    }
}

/// A reply document received from the server, along with the connection metadata needed to
/// interpret it.
#[derive(Debug, Clone)]
pub(crate) struct CommandResponse {
    source: ServerAddress,
    pub(crate) raw_response: Document,
}

impl CommandResponse {
    pub(crate) fn new(source: ServerAddress, raw_response: Document) -> Self {
        Self {
            source,
            raw_response,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_document(doc: Document) -> Self {
        Self::new(
            ServerAddress::Tcp {
                host: "localhost".to_string(),
                port: None,
            },
            doc,
        )
    }

    /// Whether this response indicates success (i.e. `ok: 1`).
    pub(crate) fn is_success(&self) -> bool {
        match self.raw_response.get("ok") {
            Some(b) => bson_util::get_int(b) == Some(1),
            None => false,
        }
    }

    /// Returns an error if this response corresponds to a command failure, with any
    /// server-provided error labels attached.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let command_error: CommandError =
            crate::bson::from_document(self.raw_response.clone()).map_err(|_| {
                Error::invalid_response(format!(
                    "invalid server response to failed command: {}",
                    self.raw_response
                ))
            })?;

        Err(Error::new(
            ErrorKind::Command(command_error),
            Some(self.error_labels()),
        ))
    }

    fn error_labels(&self) -> Vec<String> {
        self.raw_response
            .get_array("errorLabels")
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `$clusterTime` the deployment attached to this reply, if any.
    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.raw_response
            .get("$clusterTime")
            .cloned()
            .and_then(|ct| crate::bson::from_bson(ct).ok())
    }

    /// The logical time at which this operation was observed, if the deployment reported one.
    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.raw_response.get_timestamp("operationTime")
    }

    /// Deserialize the body of the response, failing if the response indicates a command
    /// failure.
    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        self.validate()?;
        crate::bson::from_document(self.raw_response.clone()).map_err(|e| {
            Error::invalid_response(format!("failed to parse server response: {}", e))
        })
    }

    /// The address of the server that sent this response.
    pub(crate) fn source_address(&self) -> &ServerAddress {
        &self.source
    }

    /// Interpret this response as the reply to a hello command.
    pub(crate) fn into_hello_reply(self, address: ServerAddress) -> Result<HelloReply> {
        self.validate()?;
        let cluster_time = self.cluster_time();
        let command_response = crate::bson::from_document(self.raw_response.clone())
            .map_err(|e| Error::invalid_response(format!("invalid hello reply: {}", e)))?;
        Ok(HelloReply {
            server_address: address,
            command_response,
            raw_command_response: self.raw_response,
            cluster_time,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc;

    #[test]
    fn failure_carries_labels_and_code() {
        let response = CommandResponse::with_document(doc! {
            "ok": 0,
            "code": 189,
            "codeName": "PrimarySteppedDown",
            "errmsg": "primary stepped down",
            "errorLabels": ["RetryableWriteError"],
        });

        let err = response.validate().unwrap_err();
        assert_eq!(err.code(), Some(189));
        assert!(err.contains_label("RetryableWriteError"));
    }

    #[test]
    fn after_cluster_time_preserves_level() {
        let mut command = Command::new(
            "count",
            "db",
            doc! { "count": "items", "readConcern": { "level": "majority" } },
        );
        command.set_after_cluster_time(Timestamp {
            time: 42,
            increment: 7,
        });

        let read_concern = command.body.get_document("readConcern").unwrap();
        assert_eq!(read_concern.get_str("level"), Some("majority"));
        assert_eq!(
            read_concern.get_timestamp("afterClusterTime"),
            Some(Timestamp {
                time: 42,
                increment: 7
            })
        );
    }
}
