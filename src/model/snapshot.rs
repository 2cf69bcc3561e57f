//! Snapshot: the canonical result of observing one target once.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One named value pulled from a page.
///
/// `value` is `None` when the field was expected but missing, so a
/// disappearing value shows up as a change instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            value: value.map(Into::into),
        }
    }
}

/// A normalized observation. Fields are sorted by name and unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub target: String,
    pub fields: Vec<Field>,
    pub captured_at: Timestamp,
}

impl Snapshot {
    /// Structural equality over the field sequence. Capture time is ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        self.fields == other.fields
    }

    /// Hex SHA-256 over the canonical field encoding.
    pub fn content_hash(&self) -> String {
        content_hash(&self.fields)
    }

    /// Look up a field by name.
    #[cfg(test)]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.fields[i])
    }
}

/// Hash a field sequence.
///
/// Each name and value is length-prefixed, with a marker byte telling a
/// missing value apart from an empty one.
pub fn content_hash(fields: &[Field]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.name.len() as u64).to_be_bytes());
        hasher.update(field.name.as_bytes());
        match &field.value {
            Some(value) => {
                hasher.update([1]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0]),
        }
    }
    hex::encode(hasher.finalize())
}
