use serde::Deserialize;

use super::{Namespace, Operation, Retryability};
use crate::{
    bson::Document,
    cmap::{Command, CommandResponse, StreamDescription},
    concern::ReadConcern,
    doc,
    error::Result,
    selection_criteria::SelectionCriteria,
};

/// Counts the documents in a collection matching a filter.
#[derive(Debug)]
pub(crate) struct Count {
    ns: Namespace,
    filter: Option<Document>,
    read_concern: Option<ReadConcern>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Count {
    pub(crate) fn new(
        ns: Namespace,
        filter: Option<Document>,
        read_concern: Option<ReadConcern>,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            ns,
            filter,
            read_concern,
            selection_criteria,
        }
    }
}

impl Operation for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! { (Self::NAME): self.ns.coll.clone() };

        if let Some(ref filter) = self.filter {
            body.insert("query", filter.clone());
        }
        if let Some(ref read_concern) = self.read_concern {
            body.insert("readConcern", doc! { "level": read_concern.level.as_str() });
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let body: ResponseBody = response.body()?;
        Ok(body.n)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }

    fn supports_read_concern(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    n: u64,
}
