//! SQLite state that survives restarts.
//!
//! `local_storage` holds the last settings snapshot under a single key, and
//! `pending_writes` is the ordered queue of settings patches still owed to
//! the backend.

pub mod model;
pub mod repo;

pub use model::PendingWrite;
pub use repo::*;
