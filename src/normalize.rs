//! Normalization: raw observations into canonical snapshots.
//!
//! Two observations of the same content must produce identical field
//! sequences, whatever order the page rendered them in.

use std::collections::HashSet;

use jiff::Timestamp;

use crate::fetch::RawObservation;
use crate::model::{Field, Snapshot, Target};

/// Turn a raw observation into a snapshot.
///
/// - Text is whitespace-collapsed and trimmed; non-breaking and thin
///   spaces count as whitespace.
/// - Empty values become `None` rather than disappearing.
/// - Unnamed items are named by position (`#1`, `#2`, ...).
/// - The target's filter is applied to field names.
/// - Duplicate names keep their first occurrence.
/// - Fields are sorted by name.
pub fn normalize(target: &Target, raw: &RawObservation, captured_at: Timestamp) -> Snapshot {
    let mut seen = HashSet::new();
    let mut fields: Vec<Field> = raw
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let name = item
                .name
                .as_deref()
                .map(clean_text)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("#{}", i + 1));
            let value = item
                .value
                .as_deref()
                .map(clean_text)
                .filter(|v| !v.is_empty());
            Field::new(name, value)
        })
        .filter(|f| target.filter.keeps(&f.name))
        .filter(|f| seen.insert(f.name.clone()))
        .collect();

    fields.sort_by(|a, b| a.name.cmp(&b.name));

    Snapshot {
        target: raw.target.clone(),
        fields,
        captured_at,
    }
}

/// Collapse runs of whitespace to a single space and trim the ends.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
