//! In-memory state, for tests and dry runs.

use std::collections::BTreeMap;

use crate::model::Record;

use super::{Result, StateStore};

/// A state store that forgets everything when dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, Record>,
}

impl From<BTreeMap<String, Record>> for MemoryStore {
    fn from(records: BTreeMap<String, Record>) -> Self {
        Self { records }
    }
}

impl StateStore for MemoryStore {
    fn get(&self, id: &str) -> Option<Record> {
        self.records.get(id).cloned()
    }

    fn put(&mut self, id: &str, record: Record) -> Result<()> {
        self.records.insert(id.to_string(), record);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<Option<Record>> {
        Ok(self.records.remove(id))
    }

    fn records(&self) -> BTreeMap<String, Record> {
        self.records.clone()
    }
}
