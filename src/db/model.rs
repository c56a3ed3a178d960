//! Row models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::SettingsPatch;

/// Head of the pending-writes queue as seen by the outbox worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub id: i64,
    pub collection: String,
    pub document_id: Option<String>,
    pub patch: SettingsPatch,
    pub version: i64,
    pub attempt: i32,
}
