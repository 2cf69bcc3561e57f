//! Persistent state: one record per target.
//!
//! The state document is a single JSON object keyed by target id:
//!
//! ```text
//! {
//!   "t1": { "value": "7", "value_hash": "…", "last_checked_at": "…", … }
//! }
//! ```
//!
//! [`JsonFileStore`] keeps it on disk with atomic replace, [`MemoryStore`]
//! keeps it in memory for tests and dry runs.

mod json_file;
mod memory;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use crate::model::Record;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Errors that can occur while reading or writing state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    #[error("failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("{path} is not a valid state document: {reason}")]
    CorruptOnLoad { path: PathBuf, reason: String },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, PersistenceError>;

/// Keyed storage of records.
///
/// Single writer: callers serialize mutating calls. Readers get copies, so a
/// record can only change through [`StateStore::put`].
pub trait StateStore: Send {
    /// The stored record for `id`, if any.
    fn get(&self, id: &str) -> Option<Record>;

    /// Replace the record for `id` and make it durable before returning.
    ///
    /// On error the previous record for `id` is still in place.
    fn put(&mut self, id: &str, record: Record) -> Result<()>;

    /// Drop the record for `id`, returning what was there.
    fn remove(&mut self, id: &str) -> Result<Option<Record>>;

    /// Every stored record, by id.
    fn records(&self) -> BTreeMap<String, Record>;

    /// Persist anything not yet durable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
