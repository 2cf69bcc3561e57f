//! Core data model for the tracker.
//!
//! Targets are what we look at, snapshots are what we saw, records are
//! what we remember, and change events are what we tell people.

mod change;
mod record;
mod snapshot;
mod target;

pub use change::{ChangeEvent, ChangeKind, Direction, FieldChange, Phase};
pub use record::Record;
pub use snapshot::{Field, Snapshot};
pub use target::{Engine, Extract, Filter, Target};
