//! Output formatting for CLI display.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use jiff::Timestamp;

use crate::model::{Extract, Record, Target};

/// Stored state per configured target, then any records no target claims.
pub(super) fn format_status(records: &BTreeMap<String, Record>, targets: &[Target]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<24} {:<17} {:<17}",
        "TARGET", "VALUE", "LAST CHECKED", "LAST CHANGED"
    );

    for target in targets {
        match records.get(&target.id) {
            Some(record) => {
                let _ = writeln!(out, "{}", status_row(&target.id, record));
            }
            None => {
                let _ = writeln!(out, "{:<20} never checked", target.id);
            }
        }
    }

    for (id, record) in records {
        if !targets.iter().any(|t| &t.id == id) {
            let _ = writeln!(out, "{}  (not configured)", status_row(id, record));
        }
    }

    out
}

fn status_row(id: &str, record: &Record) -> String {
    format!(
        "{:<20} {:<24} {:<17} {:<17}",
        id,
        summary(record),
        when(record.last_checked_at),
        when(record.last_changed_at),
    )
}

/// A single `value` field shows its value; anything else a field count.
fn summary(record: &Record) -> String {
    match record.value.as_slice() {
        [only] if only.name == "value" => only.value.clone().unwrap_or_else(|| "—".to_string()),
        fields => format!("{} field(s)", fields.len()),
    }
}

fn when(ts: Timestamp) -> String {
    ts.strftime("%Y-%m-%d %H:%M").to_string()
}

/// One line per target: id, extraction kind, URL.
pub(super) fn format_targets(targets: &[Target]) -> String {
    let mut out = String::new();
    for target in targets {
        let kind = match &target.extract {
            None => "body",
            Some(Extract::Text { .. }) => "text",
            Some(Extract::List { .. }) => "list",
            Some(Extract::EmbeddedJson { .. }) => "embedded-json",
        };
        let _ = writeln!(out, "{:<20} {:<14} {}", target.label(), kind, target.url);
    }
    out
}
