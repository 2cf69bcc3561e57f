//! Record: the persisted last-known state of one target.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::snapshot::{Field, Snapshot};

/// What the state document holds for one target.
///
/// Replaced as a whole on every check; never edited field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Canonical fields of the latest snapshot.
    #[serde(with = "value_repr")]
    pub value: Vec<Field>,

    /// Hash of `value`.
    pub value_hash: String,

    /// Hash of the value this one replaced, if it ever changed.
    pub previous_value_hash: Option<String>,

    /// When the stored snapshot was captured.
    pub captured_at: Timestamp,

    pub first_seen_at: Timestamp,
    pub last_checked_at: Timestamp,
    pub last_changed_at: Timestamp,
}

impl Record {
    /// A record for a target seen for the first time.
    pub fn first(snapshot: &Snapshot, now: Timestamp) -> Self {
        Self {
            value: snapshot.fields.clone(),
            value_hash: snapshot.content_hash(),
            previous_value_hash: None,
            captured_at: snapshot.captured_at,
            first_seen_at: now,
            last_checked_at: now,
            last_changed_at: now,
        }
    }

    /// Rebuild the stored snapshot.
    pub fn snapshot(&self, target: &str) -> Snapshot {
        Snapshot {
            target: target.to_string(),
            fields: self.value.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Stored form of a record's fields.
///
/// A lone `value` field is written as its bare string (or `null`), anything
/// else as an object keyed by field name.
mod value_repr {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Field;

    const SINGLE: &str = "value";

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Single(Option<String>),
        Named(BTreeMap<String, Option<String>>),
    }

    pub fn serialize<S: Serializer>(fields: &[Field], serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match fields {
            [only] if only.name == SINGLE => Repr::Single(only.value.clone()),
            _ => Repr::Named(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.value.clone()))
                    .collect(),
            ),
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Field>, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Single(value) => vec![Field {
                name: SINGLE.to_string(),
                value,
            }],
            Repr::Named(map) => map
                .into_iter()
                .map(|(name, value)| Field { name, value })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_bookkeeping() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let snapshot = Snapshot {
            target: "t1".into(),
            fields: vec![Field::new("value", Some("5"))],
            captured_at: now,
        };
        let record = Record::first(&snapshot, now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["value"], "5");
        assert!(json["previous_value_hash"].is_null());
        assert!(json.get("last_checked_at").is_some());
        assert!(json.get("last_changed_at").is_some());
    }

    #[test]
    fn snapshot_round_trips_through_record() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let snapshot = Snapshot {
            target: "t1".into(),
            fields: vec![Field::new("value", Some("5"))],
            captured_at: now,
        };

        let rebuilt = Record::first(&snapshot, now).snapshot("t1");
        assert!(rebuilt.same_content(&snapshot));
        assert_eq!(rebuilt.captured_at, snapshot.captured_at);
    }

    #[test]
    fn named_fields_are_stored_as_an_object() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let snapshot = Snapshot {
            target: "shop".into(),
            fields: vec![
                Field::new("RTX 5090 Astral", Some("39 990 kr")),
                Field::new("RTX 5090 TUF", None::<String>),
            ],
            captured_at: now,
        };
        let record = Record::first(&snapshot, now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["value"]["RTX 5090 Astral"], "39 990 kr");
        assert!(json["value"]["RTX 5090 TUF"].is_null());

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_single_value_round_trips_as_null() {
        let now = Timestamp::new(1_700_000_000, 0).unwrap();
        let snapshot = Snapshot {
            target: "t1".into(),
            fields: vec![Field::new("value", None::<String>)],
            captured_at: now,
        };
        let record = Record::first(&snapshot, now);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["value"].is_null());
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.value, record.value);
    }
}
