use serde::Deserialize;

use super::{Namespace, Operation, Retryability};
use crate::{
    bson::{Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    concern::WriteConcern,
    doc,
    error::{Error, ErrorKind, Result, WriteConcernError, WriteError, WriteFailure},
    results::UpdateResult,
};

/// Updates documents matching a query. Single-document updates are retryable writes; multi
/// updates are not.
#[derive(Debug)]
pub(crate) struct Update {
    ns: Namespace,
    filter: Document,
    update: Document,
    multi: bool,
    upsert: Option<bool>,
    write_concern: Option<WriteConcern>,
}

impl Update {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        update: Document,
        multi: bool,
        upsert: Option<bool>,
        write_concern: Option<WriteConcern>,
    ) -> Self {
        Self {
            ns,
            filter,
            update,
            multi,
            upsert,
            write_concern,
        }
    }
}

impl Operation for Update {
    type O = UpdateResult;

    const NAME: &'static str = "update";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut update = doc! {
            "q": self.filter.clone(),
            "u": self.update.clone(),
            "multi": self.multi,
        };
        if let Some(upsert) = self.upsert {
            update.insert("upsert", upsert);
        }

        let mut body = doc! {
            (Self::NAME): self.ns.coll.clone(),
            "updates": [update],
            "ordered": true,
        };

        if let Some(ref write_concern) = self.write_concern {
            body.insert("writeConcern", crate::bson::to_bson(write_concern)?);
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response.validate()?;
        let body: UpdateResponseBody = crate::bson::from_document(response.raw_response.clone())
            .map_err(|e| {
                Error::invalid_response(format!("invalid update response: {}", e))
            })?;

        if let Some(write_error) = body.write_errors.and_then(|errors| errors.into_iter().next())
        {
            return Err(ErrorKind::Write(WriteFailure::WriteError(write_error)).into());
        }

        if let Some(write_concern_error) = body.write_concern_error {
            return Err(
                ErrorKind::Write(WriteFailure::WriteConcernError(write_concern_error)).into(),
            );
        }

        let matched_count = if body.upserted.is_some() { 0 } else { body.n };

        Ok(UpdateResult {
            matched_count,
            modified_count: body.n_modified,
            upserted_id: body
                .upserted
                .and_then(|upserted| upserted.into_iter().next())
                .map(|upserted| upserted.id),
        })
    }

    fn retryability(&self) -> Retryability {
        if self.multi {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponseBody {
    n: u64,

    #[serde(rename = "nModified", default)]
    n_modified: u64,

    upserted: Option<Vec<UpsertedId>>,

    write_errors: Option<Vec<WriteError>>,

    write_concern_error: Option<WriteConcernError>,
}

#[derive(Debug, Deserialize)]
struct UpsertedId {
    #[serde(rename = "_id")]
    id: Bson,
}
