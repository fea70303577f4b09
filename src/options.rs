//! Contains all of the types needed to specify options to the driver's methods.

pub use crate::{
    client::options::*,
    client::session::SessionOptions,
    concern::*,
    db::FindOptions,
    selection_criteria::*,
};
