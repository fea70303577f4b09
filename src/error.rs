//! Contains the `Error` and `Result` types that `mongolite` uses.

use std::{
    collections::HashSet,
    fmt::{self, Debug},
    sync::Arc,
};

use thiserror::Error;

use crate::{bson::Document, options::ServerAddress, sdam::TopologyVersion};

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOT_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];
const RETRYABLE_READ_CODES: [i32; 11] =
    [11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001];
const RETRYABLE_WRITE_CODES: [i32; 12] =
    [11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262];

/// Retryable write error label. This label will be added to an error when the error is
/// write-retryable.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the driver.
///
/// Clones of an `Error` share the underlying [`ErrorKind`].
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Arc<ErrorKind>,

    labels: HashSet<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Arc::new(kind),
            labels,
        }
    }

    pub(crate) fn invalid_argument(message: impl AsRef<str>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.as_ref().to_string(),
        }
        .into()
    }

    pub(crate) fn invalid_bson(message: impl AsRef<str>) -> Self {
        ErrorKind::InvalidBson {
            message: message.as_ref().to_string(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl AsRef<str>) -> Self {
        ErrorKind::InvalidResponse {
            message: message.as_ref().to_string(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl AsRef<str>) -> Self {
        ErrorKind::Internal {
            message: message.as_ref().to_string(),
        }
        .into()
    }

    pub(crate) fn pool_cleared_error(address: &ServerAddress, cause: &Error) -> Self {
        ErrorKind::ConnectionPoolCleared {
            message: format!(
                "Connection pool for {} cleared because another operation failed with: {}",
                address, cause
            ),
        }
        .into()
    }

    /// The labels attached to this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        self.labels.insert(label.as_ref().to_string());
    }

    /// Returns a copy of this error with the given label added.
    pub(crate) fn with_label<T: AsRef<str>>(mut self, label: T) -> Self {
        self.add_label(label);
        self
    }

    /// Whether an error originated from the server.
    pub(crate) fn is_server_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Command(_) | ErrorKind::Write(_)
        )
    }

    /// Whether this error is a network-level error on a specific connection.
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(_))
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_non_timeout_network_error(&self) -> bool {
        self.is_network_error() && !self.is_network_timeout()
    }

    /// Whether a read operation that failed with this error should be retried.
    pub(crate) fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        match self.code() {
            Some(code) => RETRYABLE_READ_CODES.contains(&code),
            None => false,
        }
    }

    /// Whether a write operation that failed with this error should be retried. Only errors
    /// labeled `RetryableWriteError` are retried; the executor applies the label based on
    /// [`Error::should_add_retryable_write_label`].
    pub(crate) fn is_write_retryable(&self) -> bool {
        self.contains_label(RETRYABLE_WRITE_ERROR)
            || self
                .kind
                .get_write_concern_error()
                .map(|wce| wce.labels.iter().any(|l| l == RETRYABLE_WRITE_ERROR))
                .unwrap_or(false)
    }

    /// Whether the `RetryableWriteError` label should be added to this error. Servers at wire
    /// version 9+ attach the label themselves, so the driver only labels network errors there;
    /// on older servers any write-retryable error is labeled.
    pub(crate) fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if max_wire_version > 8 {
            return self.is_network_error();
        }
        if self.is_network_error() {
            return true;
        }
        match &self.code() {
            Some(code) => RETRYABLE_WRITE_CODES.contains(code),
            None => false,
        }
    }

    /// Whether this error indicates a "node is recovering" or "not writable primary" condition.
    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_not_primary()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        match self.code() {
            Some(code) => SHUTTING_DOWN_CODES.contains(&code),
            None => false,
        }
    }

    fn is_recovering(&self) -> bool {
        match (self.code(), self.message()) {
            (Some(code), _) if RECOVERING_CODES.contains(&code) => true,
            (None, Some(message)) => {
                message.contains("node is recovering")
                    || message.contains("not master or secondary")
            }
            _ => false,
        }
    }

    fn is_not_primary(&self) -> bool {
        match (self.code(), self.message()) {
            (Some(code), _) if NOT_PRIMARY_CODES.contains(&code) => true,
            (None, Some(message)) => message.contains("not master"),
            _ => false,
        }
    }

    pub(crate) fn is_incompatible_server(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::IncompatibleServer { .. })
    }

    pub(crate) fn is_pool_cleared(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ConnectionPoolCleared { .. })
    }

    pub(crate) fn is_command_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(_))
    }

    /// The server-reported error code, if this error was returned by a server.
    pub(crate) fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(wce)) => Some(wce.code),
            _ => None,
        }
    }

    fn message(&self) -> Option<&str> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.message.as_str()),
            ErrorKind::Write(WriteFailure::WriteConcernError(wce)) => Some(wce.message.as_str()),
            ErrorKind::Write(WriteFailure::WriteError(we)) => Some(we.message.as_str()),
            _ => None,
        }
    }

    /// The topology version reported alongside a server error, used to discard reactions to
    /// errors from stale server states.
    pub(crate) fn topology_version(&self) -> Option<TopologyVersion> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => command_error.topology_version,
            _ => None,
        }
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Self::new(err.into(), None::<Vec<String>>)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<hickory_resolver::error::ResolveError> for ErrorKind {
    fn from(err: hickory_resolver::error::ResolveError) -> Self {
        Self::DnsResolve {
            message: err.to_string(),
        }
    }
}

impl From<String> for ErrorKind {
    fn from(message: String) -> Self {
        Self::InvalidResponse { message }
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    InvalidArgument { message: String },

    /// Malformed BSON bytes or an unrepresentable value were encountered.
    #[error("Invalid BSON: {message}")]
    InvalidBson { message: String },

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An error occurred during DNS resolution.
    #[error("DNS resolution failed: {message}")]
    DnsResolve { message: String },

    /// A network I/O error occurred on a specific connection.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned an invalid reply to an operation.
    #[error("The server returned an invalid reply: {message}")]
    InvalidResponse { message: String },

    /// No server could be selected within the selection timeout. Carries a rendering of the
    /// topology at the time selection gave up.
    #[error("Server selection error: {message}")]
    ServerSelection { message: String },

    /// The connection pool was cleared while a checkout was in progress.
    #[error("{message}")]
    ConnectionPoolCleared { message: String },

    /// No connection became available before the wait queue timeout elapsed.
    #[error(
        "Timed out while checking out a connection from connection pool with address {address}"
    )]
    WaitQueueTimeout { address: ServerAddress },

    /// The driver and server do not share any supported wire protocol version.
    #[error("{message}")]
    IncompatibleServer { message: String },

    /// The deployment does not support sessions.
    #[error("Attempted to use a session with a deployment that does not support sessions")]
    SessionsUnsupported,

    /// A write operation failed.
    #[error("An error occurred when trying to execute a write operation: {0}")]
    Write(WriteFailure),

    /// The client has been shut down.
    #[error("The client has been shut down and can no longer execute operations")]
    Shutdown,

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ErrorKind {
    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::Write(WriteFailure::WriteConcernError(wce)) => Some(wce),
            _ => None,
        }
    }
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, serde::Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// The topology version reported by the server in the error response.
    #[serde(rename = "topologyVersion")]
    pub(crate) topology_version: Option<TopologyVersion>,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, serde::Deserialize)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,

    /// Labels categorizing the error, propagated onto the enclosing [`Error`].
    #[serde(rename = "errorLabels", default)]
    pub(crate) labels: Vec<String>,
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred during a write operation that wasn't due to being unable to satisfy a
/// write concern.
#[derive(Clone, Debug, serde::Deserialize)]
#[non_exhaustive]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code. The server omits this in some cases.
    #[serde(rename = "codeName")]
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Error code {}: {}", self.code, self.message)
    }
}

/// The set of possible write failures.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// The write concern for the operation could not be satisfied.
    WriteConcernError(WriteConcernError),

    /// The write itself failed.
    WriteError(WriteError),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::WriteConcernError(wce) => write!(fmt, "{}", wce),
            Self::WriteError(we) => write!(fmt, "{}", we),
        }
    }
}

impl serde::ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::invalid_bson(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::invalid_bson(msg.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn command_error(code: i32) -> Error {
        ErrorKind::Command(CommandError {
            code,
            code_name: Default::default(),
            message: Default::default(),
            topology_version: None,
        })
        .into()
    }

    #[test]
    fn retryable_read_codes() {
        assert!(command_error(11600).is_read_retryable());
        assert!(command_error(91).is_read_retryable());
        assert!(!command_error(262).is_read_retryable());
        assert!(!command_error(1).is_read_retryable());
    }

    #[test]
    fn retryable_write_label_wire_version() {
        // Pre-wire-version-9 servers never attach the label themselves.
        assert!(command_error(189).should_add_retryable_write_label(8));
        assert!(!command_error(189).should_add_retryable_write_label(9));

        let network: Error = ErrorKind::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
        .into();
        assert!(network.should_add_retryable_write_label(9));
    }

    #[test]
    fn state_change_predicates() {
        assert!(command_error(10107).is_state_change_error());
        assert!(command_error(11602).is_state_change_error());
        assert!(command_error(91).is_shutting_down());
        assert!(!command_error(9001).is_state_change_error());
    }

    #[test]
    fn labels_propagate_from_write_concern_errors() {
        let err: Error = ErrorKind::Write(WriteFailure::WriteConcernError(WriteConcernError {
            code: 64,
            code_name: "WriteConcernFailed".to_string(),
            message: "waiting for replication timed out".to_string(),
            details: None,
            labels: vec![RETRYABLE_WRITE_ERROR.to_string()],
        }))
        .into();
        assert!(err.contains_label(RETRYABLE_WRITE_ERROR));
        assert!(err.is_write_retryable());
    }
}
