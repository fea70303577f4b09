use serde::Deserialize;

use super::{append_options, Namespace, Operation, Retryability};
use crate::{
    bson::Document,
    cmap::{Command, CommandResponse, StreamDescription},
    cursor::CursorSpecification,
    doc,
    error::Result,
    options::FindOptions,
    selection_criteria::SelectionCriteria,
};

/// Runs a query, producing the specification of the cursor serving its results.
#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Option<Document>,
    options: Option<FindOptions>,
}

impl Find {
    pub(crate) fn new(
        ns: Namespace,
        filter: Option<Document>,
        options: Option<FindOptions>,
    ) -> Self {
        Self {
            ns,
            filter,
            options,
        }
    }
}

impl Operation for Find {
    type O = CursorSpecification;

    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! { (Self::NAME): self.ns.coll.clone() };

        if let Some(ref filter) = self.filter {
            body.insert("filter", filter.clone());
        }
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let body: CursorBody = response.body()?;
        let ns = Namespace::from_full_name(&body.cursor.ns)?;

        Ok(CursorSpecification::new(
            ns,
            response.source_address().clone(),
            body.cursor.id,
            self.options.as_ref().and_then(|opts| opts.batch_size),
            body.cursor.first_batch,
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|opts| opts.selection_criteria.as_ref())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }

    fn supports_read_concern(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,
    pub(crate) ns: String,
    #[serde(default)]
    pub(crate) first_batch: Vec<Document>,
}
