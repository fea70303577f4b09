use super::Operation;
use crate::{
    bson::Document,
    bson_util,
    cmap::{Command, CommandResponse, StreamDescription},
    error::{ErrorKind, Result},
    selection_criteria::SelectionCriteria,
};

/// Commands the driver never attaches a session to, because the server rejects it.
const SESSIONS_UNSUPPORTED_COMMANDS: &[&str] = &["killcursors", "parallelcollectionscan"];

/// An arbitrary command provided by the user, run as-is.
#[derive(Debug)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
}

impl RunCommand {
    pub(crate) fn new(
        db: String,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Result<Self> {
        if bson_util::first_key(&command).is_none() {
            return Err(ErrorKind::InvalidArgument {
                message: "an empty document cannot be passed to a run_command operation"
                    .to_string(),
            }
            .into());
        }

        Ok(Self {
            db,
            command,
            selection_criteria,
        })
    }

    fn command_name(&self) -> &str {
        bson_util::first_key(&self.command).unwrap_or("")
    }
}

impl Operation for RunCommand {
    type O = Document;

    // The name is the command's first key, provided at runtime.
    const NAME: &'static str = "";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        Ok(Command::new(
            self.command_name(),
            self.db.clone(),
            self.command.clone(),
        ))
    }

    fn handle_response(
        &self,
        response: CommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        response.validate()?;
        Ok(response.raw_response)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn supports_sessions(&self) -> bool {
        !SESSIONS_UNSUPPORTED_COMMANDS.contains(&self.command_name().to_lowercase().as_str())
    }

    fn name(&self) -> &str {
        self.command_name()
    }
}
