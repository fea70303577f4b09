mod header;
mod message;

pub(crate) use self::message::{next_request_id, DocumentSequence, Message};
