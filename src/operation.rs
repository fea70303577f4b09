//! The `Operation` trait: one implementation per server-side command the driver issues, each
//! knowing how to build its command for a particular connection and interpret the reply.

mod count;
mod end_sessions;
mod find;
mod get_more;
mod run_command;
mod update;

use std::fmt;

use crate::{
    bson::{Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    concern::WriteConcern,
    error::{ErrorKind, Result},
    selection_criteria::SelectionCriteria,
};

pub(crate) use self::{
    count::Count,
    end_sessions::EndSessions,
    find::Find,
    get_more::GetMore,
    run_command::RunCommand,
    update::Update,
};

/// A trait modeling the behavior of a server side operation.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: CommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Criteria to use for selecting the server that this operation will be executed on.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// Whether and how this operation may be retried.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    /// Whether this operation may run under a session.
    fn supports_sessions(&self) -> bool {
        true
    }

    /// The write concern this operation carries, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// Whether the server acknowledges this operation. Unacknowledged operations get no
    /// meaningful reply and must not advance session state.
    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// Whether this operation accepts a read concern, and therefore participates in causally
    /// consistent reads via `readConcern.afterClusterTime`.
    fn supports_read_concern(&self) -> bool {
        false
    }

    /// The name of the command, for dynamic commands whose name is not known statically.
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// The retryability level of an operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Retryability {
    Write,
    Read,
    None,
}

/// The namespace of an operation: database name plus collection name.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Namespace {
    pub(crate) db: String,
    pub(crate) coll: String,
}

impl Namespace {
    pub(crate) fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    pub(crate) fn from_full_name(full_name: &str) -> Result<Self> {
        match full_name.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => {
                Ok(Self::new(db, coll))
            }
            _ => Err(ErrorKind::InvalidResponse {
                message: format!("invalid namespace: {:?}", full_name),
            }
            .into()),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Appends the entries of a serializable struct to the given command body.
/// The struct MUST serialize to a document.
pub(crate) fn append_options<T: serde::Serialize>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        match crate::bson::to_bson(options)? {
            Bson::Document(options_doc) => {
                for (key, value) in options_doc {
                    doc.insert(key, value);
                }
            }
            other => {
                return Err(ErrorKind::Internal {
                    message: format!("options serialized to non-document value {:?}", other),
                }
                .into())
            }
        }
    }
    Ok(())
}
