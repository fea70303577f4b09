use super::Operation;
use crate::{
    bson::Document,
    cmap::{Command, CommandResponse, StreamDescription},
    doc,
    error::Result,
};

/// Releases a batch of server sessions on client shutdown. Best effort: the sessions expire
/// on their own if the command never arrives.
#[derive(Debug)]
pub(crate) struct EndSessions {
    session_ids: Vec<Document>,
}

impl EndSessions {
    /// The maximum number of session ids a single `endSessions` command may carry.
    pub(crate) const MAX_BATCH_SIZE: usize = 10_000;

    pub(crate) fn new(session_ids: Vec<Document>) -> Self {
        debug_assert!(session_ids.len() <= Self::MAX_BATCH_SIZE);
        Self { session_ids }
    }
}

impl Operation for EndSessions {
    type O = ();

    const NAME: &'static str = "endSessions";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            (Self::NAME): self
                .session_ids
                .iter()
                .cloned()
                .map(crate::bson::Bson::Document)
                .collect::<Vec<_>>(),
        };

        Ok(Command::new(Self::NAME, "admin", body))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response.validate()
    }

    fn supports_sessions(&self) -> bool {
        false
    }
}
