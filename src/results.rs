//! Contains the types of results returned by operations.

use crate::bson::Bson;

/// The result of an update operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct UpdateResult {
    /// The number of documents that matched the filter.
    pub matched_count: u64,

    /// The number of documents that were modified by the operation.
    pub modified_count: u64,

    /// The `_id` field of the upserted document, if an upsert took place.
    pub upserted_id: Option<Bson>,
}
