//! Comparing a fresh snapshot with what the store remembers.
//!
//! Pure: the caller reads the previous record and writes the returned one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use jiff::Timestamp;

use crate::model::{ChangeEvent, ChangeKind, Direction, Field, FieldChange, Record, Snapshot};

/// Outcome of comparing one snapshot.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub event: ChangeEvent,

    /// What the store should hold afterwards.
    pub record: Record,
}

/// Classify `snapshot` against the stored `previous` record.
///
/// Equality is over normalized fields only. Capture times never make two
/// snapshots differ.
pub fn compare(previous: Option<&Record>, snapshot: Snapshot, now: Timestamp) -> Comparison {
    let Some(previous) = previous else {
        let record = Record::first(&snapshot, now);
        return Comparison {
            event: event(ChangeKind::Created, None, snapshot, Vec::new(), now),
            record,
        };
    };

    let before = previous.snapshot(&snapshot.target);

    if before.same_content(&snapshot) {
        let record = Record {
            last_checked_at: now,
            ..previous.clone()
        };
        return Comparison {
            event: event(ChangeKind::Unchanged, Some(before), snapshot, Vec::new(), now),
            record,
        };
    }

    let changes = field_changes(&previous.value, &snapshot.fields);
    let record = Record {
        value: snapshot.fields.clone(),
        value_hash: snapshot.content_hash(),
        previous_value_hash: Some(previous.value_hash.clone()),
        captured_at: snapshot.captured_at,
        first_seen_at: previous.first_seen_at,
        last_checked_at: now,
        last_changed_at: now,
    };
    Comparison {
        event: event(ChangeKind::Updated, Some(before), snapshot, changes, now),
        record,
    }
}

/// The event for a target whose resource no longer exists.
///
/// Only the check that drops a stored record is `Removed`. A target that
/// was already gone is `Unchanged`.
pub fn removed(target: &str, previous: Option<&Record>, now: Timestamp) -> ChangeEvent {
    let kind = if previous.is_some() {
        ChangeKind::Removed
    } else {
        ChangeKind::Unchanged
    };
    ChangeEvent {
        target: target.to_string(),
        kind,
        previous: previous.map(|r| r.snapshot(target)),
        current: None,
        changes: Vec::new(),
        failure: None,
        at: now,
    }
}

fn event(
    kind: ChangeKind,
    previous: Option<Snapshot>,
    current: Snapshot,
    changes: Vec<FieldChange>,
    at: Timestamp,
) -> ChangeEvent {
    ChangeEvent {
        target: current.target.clone(),
        kind,
        previous,
        current: Some(current),
        changes,
        failure: None,
        at,
    }
}

/// Per-field differences, ordered by field name.
pub fn field_changes(old: &[Field], new: &[Field]) -> Vec<FieldChange> {
    let before: BTreeMap<&str, &Option<String>> =
        old.iter().map(|f| (f.name.as_str(), &f.value)).collect();
    let after: BTreeMap<&str, &Option<String>> =
        new.iter().map(|f| (f.name.as_str(), &f.value)).collect();
    let names: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    names
        .into_iter()
        .filter_map(|name| match (before.get(name), after.get(name)) {
            (None, Some(value)) => Some(FieldChange::Added {
                name: name.to_string(),
                value: (*value).clone(),
            }),
            (Some(value), None) => Some(FieldChange::Removed {
                name: name.to_string(),
                value: (*value).clone(),
            }),
            (Some(from), Some(to)) if from != to => Some(FieldChange::Changed {
                name: name.to_string(),
                from: (*from).clone(),
                to: (*to).clone(),
                direction: direction(from.as_deref(), to.as_deref()),
            }),
            _ => None,
        })
        .collect()
}

/// Compare the digits of two values as numbers: `35 990 kr` < `36 490:-`.
fn direction(from: Option<&str>, to: Option<&str>) -> Option<Direction> {
    match digits(from?)?.cmp(&digits(to?)?) {
        Ordering::Less => Some(Direction::Up),
        Ordering::Greater => Some(Direction::Down),
        Ordering::Equal => None,
    }
}

fn digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Timestamp {
        Timestamp::new(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(fields: &[(&str, Option<&str>)], captured: i64) -> Snapshot {
        Snapshot {
            target: "t1".into(),
            fields: fields.iter().map(|(n, v)| Field::new(*n, *v)).collect(),
            captured_at: at(captured),
        }
    }

    #[test]
    fn absent_record_is_created() {
        let cmp = compare(None, snapshot(&[("value", Some("5"))], 0), at(0));

        assert_eq!(cmp.event.kind, ChangeKind::Created);
        assert!(cmp.event.previous.is_none());
        assert_eq!(cmp.record.first_seen_at, at(0));
        assert_eq!(cmp.record.last_changed_at, at(0));
        assert_eq!(cmp.record.previous_value_hash, None);
    }

    #[test]
    fn equal_content_is_unchanged_and_only_check_time_moves() {
        let first = compare(None, snapshot(&[("value", Some("5"))], 0), at(0)).record;

        let cmp = compare(Some(&first), snapshot(&[("value", Some("5"))], 300), at(300));

        assert_eq!(cmp.event.kind, ChangeKind::Unchanged);
        assert!(cmp.event.changes.is_empty());
        assert_eq!(cmp.record.last_checked_at, at(300));
        assert_eq!(cmp.record.last_changed_at, at(0));
        assert_eq!(cmp.record.value_hash, first.value_hash);
    }

    #[test]
    fn different_content_is_updated_and_both_times_move() {
        let first = compare(None, snapshot(&[("value", Some("5"))], 0), at(0)).record;

        let cmp = compare(Some(&first), snapshot(&[("value", Some("7"))], 600), at(600));

        assert_eq!(cmp.event.kind, ChangeKind::Updated);
        assert_eq!(
            cmp.event.previous.as_ref().unwrap().fields[0].value.as_deref(),
            Some("5")
        );
        assert_eq!(
            cmp.event.current.as_ref().unwrap().fields[0].value.as_deref(),
            Some("7")
        );
        assert_eq!(cmp.record.last_checked_at, at(600));
        assert_eq!(cmp.record.last_changed_at, at(600));
        assert_eq!(cmp.record.first_seen_at, at(0));
        assert_eq!(cmp.record.previous_value_hash, Some(first.value_hash));
    }

    #[test]
    fn value_disappearing_is_an_update() {
        let first = compare(None, snapshot(&[("value", Some("5"))], 0), at(0)).record;

        let cmp = compare(Some(&first), snapshot(&[("value", None)], 1), at(1));

        assert_eq!(cmp.event.kind, ChangeKind::Updated);
        assert_eq!(
            cmp.event.changes,
            vec![FieldChange::Changed {
                name: "value".into(),
                from: Some("5".into()),
                to: None,
                direction: None,
            }]
        );
    }

    #[test]
    fn field_changes_cover_added_removed_and_direction() {
        let old = snapshot(
            &[
                ("ASUS TUF", Some("35 990 kr")),
                ("Gigabyte", Some("32 990 kr")),
                ("MSI Suprim", Some("38 990 kr")),
            ],
            0,
        );
        let new = snapshot(
            &[
                ("ASUS TUF", Some("34 490 kr")),
                ("MSI Suprim", Some("39 490:-")),
                ("Zotac", Some("31 990 kr")),
            ],
            1,
        );

        let changes = field_changes(&old.fields, &new.fields);

        assert_eq!(
            changes,
            vec![
                FieldChange::Changed {
                    name: "ASUS TUF".into(),
                    from: Some("35 990 kr".into()),
                    to: Some("34 490 kr".into()),
                    direction: Some(Direction::Down),
                },
                FieldChange::Removed {
                    name: "Gigabyte".into(),
                    value: Some("32 990 kr".into()),
                },
                FieldChange::Changed {
                    name: "MSI Suprim".into(),
                    from: Some("38 990 kr".into()),
                    to: Some("39 490:-".into()),
                    direction: Some(Direction::Up),
                },
                FieldChange::Added {
                    name: "Zotac".into(),
                    value: Some("31 990 kr".into()),
                },
            ]
        );
    }

    #[test]
    fn same_digits_have_no_direction() {
        assert_eq!(direction(Some("35 990 kr"), Some("35990:-")), None);
        assert_eq!(direction(Some("Slutsåld"), Some("5 st")), None);
        assert_eq!(direction(Some("4"), Some("12")), Some(Direction::Up));
    }

    #[test]
    fn removed_event_carries_previous_snapshot() {
        let first = compare(None, snapshot(&[("value", Some("5"))], 0), at(0)).record;

        let event = removed("t1", Some(&first), at(10));

        assert_eq!(event.kind, ChangeKind::Removed);
        assert!(event.current.is_none());
        assert_eq!(event.previous.unwrap().fields, first.value);
    }

    #[test]
    fn already_gone_is_unchanged() {
        let event = removed("t1", None, at(10));

        assert_eq!(event.kind, ChangeKind::Unchanged);
        assert!(event.previous.is_none() && event.current.is_none());
    }
}
