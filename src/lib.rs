//! `mongolite` is a lightweight, pure-Rust, async client for MongoDB-compatible document
//! databases. It speaks the BSON-based wire protocol, continuously discovers and monitors the
//! deployment it is connected to, routes operations according to read preferences, and
//! provides sessions with causal consistency and retryable semantics.
//!
//! To connect, pass a connection string to [`Client::with_uri_str`]:
//!
//! ```no_run
//! # use mongolite::{error::Result, Client};
//! # async fn connect() -> Result<()> {
//! let client = Client::with_uri_str("mongodb://localhost:27017").await?;
//! let db = client.database("app");
//! let reply = db.run_command(mongolite::doc! { "ping": 1 }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
pub mod bson;
mod bson_util;
mod client;
mod cmap;
pub mod concern;
mod cursor;
mod db;
pub mod error;
pub mod event;
mod hello;
mod operation;
pub mod options;
pub mod results;
mod runtime;
mod sdam;
pub mod selection_criteria;
mod serde_util;
mod srv;

pub use crate::{
    client::{
        session::{ClientSession, ClusterTime},
        Client,
    },
    cursor::Cursor,
    db::Database,
    sdam::public::{ServerInfo, ServerType, TopologyType},
};
