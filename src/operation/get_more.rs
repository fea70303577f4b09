use serde::Deserialize;

use super::{Namespace, Operation};
use crate::{
    bson::Document,
    cmap::{Command, CommandResponse, StreamDescription},
    doc,
    error::Result,
    selection_criteria::SelectionCriteria,
};

/// Retrieves the next batch of an open cursor. A getMore must run against the server the
/// cursor was opened on; the executor either uses the cursor's pinned connection or selects
/// by address.
#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<u32>,
    selection_criteria: SelectionCriteria,
}

impl GetMore {
    pub(crate) fn new(
        ns: Namespace,
        cursor_id: i64,
        address: crate::options::ServerAddress,
        batch_size: Option<u32>,
    ) -> Self {
        Self {
            ns,
            cursor_id,
            batch_size,
            selection_criteria: SelectionCriteria::from_address(address),
        }
    }
}

impl Operation for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            (Self::NAME): self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if let Some(batch_size) = self.batch_size {
            if let Ok(batch_size) = i32::try_from(batch_size) {
                body.insert("batchSize", batch_size);
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let body: GetMoreResponseBody = response.body()?;

        Ok(GetMoreResult {
            batch: body.cursor.next_batch,
            exhausted: body.cursor.id == 0,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}

#[derive(Debug, Deserialize)]
struct GetMoreResponseBody {
    cursor: NextBatchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextBatchBody {
    id: i64,
    #[serde(default)]
    next_batch: Vec<Document>,
}

/// The results of a getMore round trip.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    /// The documents returned in this batch.
    pub(crate) batch: Vec<Document>,

    /// Whether the cursor on the server was exhausted.
    pub(crate) exhausted: bool,
}
