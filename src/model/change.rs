//! Change events: how a new observation relates to the stored one.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::snapshot::Snapshot;

/// Emitted once per target per cycle. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub target: String,
    pub kind: ChangeKind,
    pub previous: Option<Snapshot>,
    pub current: Option<Snapshot>,

    /// Field-level differences between `previous` and `current`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,

    /// Why the check failed. Set only for [`ChangeKind::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,

    pub at: Timestamp,
}

impl ChangeEvent {
    /// A failed check. The stored record is left alone.
    pub fn failed(
        target: &str,
        phase: Phase,
        reason: impl Into<String>,
        previous: Option<Snapshot>,
        at: Timestamp,
    ) -> Self {
        Self {
            target: target.to_string(),
            kind: ChangeKind::Failed,
            previous,
            current: None,
            changes: Vec::new(),
            failure: Some(Failure {
                phase,
                reason: reason.into(),
            }),
            at,
        }
    }

    /// True for events a human wants to hear about right away: fields that
    /// appeared since the last check, or values going down. A target's
    /// first snapshot is not urgent.
    pub fn is_urgent(&self) -> bool {
        self.changes.iter().any(|c| {
            matches!(
                c,
                FieldChange::Added { .. }
                    | FieldChange::Changed {
                        direction: Some(Direction::Down),
                        ..
                    }
            )
        })
    }
}

/// Classification of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
    Unchanged,
    Failed,
}

impl ChangeKind {
    /// Whether the stored state moved.
    pub fn is_change(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }
}

/// A difference in one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "camelCase")]
pub enum FieldChange {
    Added {
        name: String,
        value: Option<String>,
    },
    Removed {
        name: String,
        value: Option<String>,
    },
    Changed {
        name: String,
        from: Option<String>,
        to: Option<String>,
        /// Numeric direction, when both sides carry digits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
}

impl FieldChange {
    pub fn name(&self) -> &str {
        match self {
            Self::Added { name, .. } | Self::Removed { name, .. } | Self::Changed { name, .. } => {
                name
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
}

/// Where in the per-target pipeline a check stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Fetching,
    Persisting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetching => "fetching",
            Self::Persisting => "persisting",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub phase: Phase,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ChangeKind, changes: Vec<FieldChange>) -> ChangeEvent {
        ChangeEvent {
            target: "t1".into(),
            kind,
            previous: None,
            current: None,
            changes,
            failure: None,
            at: Timestamp::UNIX_EPOCH,
        }
    }

    #[test]
    fn urgency_follows_new_things_and_drops() {
        assert!(!event(ChangeKind::Created, vec![]).is_urgent());
        assert!(!event(ChangeKind::Unchanged, vec![]).is_urgent());

        let drop = FieldChange::Changed {
            name: "gpu".into(),
            from: Some("30 000 kr".into()),
            to: Some("25 000 kr".into()),
            direction: Some(Direction::Down),
        };
        assert!(event(ChangeKind::Updated, vec![drop]).is_urgent());

        let rise = FieldChange::Changed {
            name: "gpu".into(),
            from: Some("25 000 kr".into()),
            to: Some("30 000 kr".into()),
            direction: Some(Direction::Up),
        };
        assert!(!event(ChangeKind::Updated, vec![rise]).is_urgent());

        let added = FieldChange::Added {
            name: "gpu".into(),
            value: Some("25 000 kr".into()),
        };
        assert!(event(ChangeKind::Updated, vec![added]).is_urgent());
    }

    #[test]
    fn failed_event_serializes_phase() {
        let event = ChangeEvent::failed(
            "t1",
            Phase::Fetching,
            "timed out",
            None,
            Timestamp::UNIX_EPOCH,
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "failed");
        assert_eq!(json["failure"]["phase"], "fetching");
        assert!(json.get("changes").is_none());
    }
}
