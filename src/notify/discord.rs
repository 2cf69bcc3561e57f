//! Discord webhook messages: one embed per target, a table of fields, and
//! a mention when something urgent happened.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::DiscordConfig;
use crate::model::{ChangeEvent, ChangeKind, Direction, Field, FieldChange, Target};
use crate::tracker::CycleReport;

use super::{NotifyError, Sink};

/// Discord's per-message embed limit.
const MAX_EMBEDS: usize = 10;

/// Discord's embed description limit, in characters.
const MAX_DESCRIPTION: usize = 4096;

/// Discord's embed field value limit, in characters.
const MAX_FIELD_VALUE: usize = 1024;

/// Discord's limit on all embed text in one message, in characters.
const MAX_MESSAGE_CHARS: usize = 6000;

const NAME_WIDTH: usize = 38;
const VALUE_WIDTH: usize = 12;

const GREEN: u32 = 0x2E_CC_71;
const RED: u32 = 0xE7_4C_3C;
const ORANGE: u32 = 0xE6_7E_22;
const GREY: u32 = 0x95_A5_A6;

/// Posts a summary of each cycle to a Discord webhook.
pub struct DiscordSink {
    client: Client,
    webhook_url: String,
    silent_if_unchanged: bool,
    mention: Option<String>,

    /// Target id → (label, url).
    targets: HashMap<String, (String, String)>,
}

impl DiscordSink {
    pub fn new(
        webhook_url: &str,
        config: &DiscordConfig,
        targets: &[Target],
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
            silent_if_unchanged: config.silent_if_unchanged,
            mention: config.mention.clone().filter(|m| !m.is_empty()),
            targets: targets
                .iter()
                .map(|t| (t.id.clone(), (t.label().to_string(), t.url.clone())))
                .collect(),
        })
    }

    /// The webhook payloads for `report`, in sending order.
    fn messages(&self, report: &CycleReport) -> Vec<Value> {
        let embeds: Vec<Value> = report
            .events
            .iter()
            .map(|event| {
                let (label, url) = self
                    .targets
                    .get(&event.target)
                    .map_or((event.target.as_str(), None), |(label, url)| {
                        (label.as_str(), Some(url.as_str()))
                    });
                embed(event, label, url)
            })
            .collect();

        let urgent = report.events.iter().any(ChangeEvent::is_urgent);

        batches(embeds)
            .into_iter()
            .enumerate()
            .map(|(i, batch)| {
                let mut payload = json!({ "embeds": batch });
                if i == 0
                    && urgent
                    && let Some(mention) = &self.mention
                {
                    payload["content"] = json!(format!("{mention}  New item or price drop detected!"));
                }
                payload
            })
            .collect()
    }
}

#[async_trait]
impl Sink for DiscordSink {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn publish(&self, report: &CycleReport) -> Result<(), NotifyError> {
        if report.events.is_empty() || (self.silent_if_unchanged && !report.has_news()) {
            debug!("nothing changed, staying quiet");
            return Ok(());
        }

        let messages = self.messages(report);
        for payload in &messages {
            self.client
                .post(&self.webhook_url)
                .json(payload)
                .send()
                .await?
                .error_for_status()?;
        }
        info!(messages = messages.len(), "discord summary sent");
        Ok(())
    }
}

/// Group embeds into messages within Discord's count and size limits.
fn batches(embeds: Vec<Value>) -> Vec<Vec<Value>> {
    let mut batches: Vec<Vec<Value>> = Vec::new();
    let mut current = Vec::new();
    let mut chars = 0;
    for embed in embeds {
        let size = embed_chars(&embed);
        if !current.is_empty() && (current.len() == MAX_EMBEDS || chars + size > MAX_MESSAGE_CHARS)
        {
            batches.push(std::mem::take(&mut current));
            chars = 0;
        }
        chars += size;
        current.push(embed);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Characters Discord counts toward the per-message limit.
fn embed_chars(embed: &Value) -> usize {
    let len = |v: &Value| v.as_str().map_or(0, |s| s.chars().count());
    let fields = embed["fields"].as_array().map_or(0, |fields| {
        fields.iter().map(|f| len(&f["name"]) + len(&f["value"])).sum()
    });
    len(&embed["title"]) + len(&embed["description"]) + len(&embed["footer"]["text"]) + fields
}

/// One embed describing one target's check.
fn embed(event: &ChangeEvent, label: &str, url: Option<&str>) -> Value {
    let fields = shown_fields(event);

    let body = match (&event.kind, &event.failure) {
        (ChangeKind::Failed, Some(failure)) => format!("{}\n", failure.reason),
        _ => table(fields, &event.changes),
    };

    let mut embed = json!({
        "title": format!("🖥️  {label}"),
        "description": fenced(&body, MAX_DESCRIPTION),
        "color": color(event, fields),
        "footer": { "text": status(event, fields) },
        "timestamp": event.at.to_string(),
    });
    if let Some(url) = url {
        embed["url"] = json!(url);
    }
    if event.kind == ChangeKind::Updated && !event.changes.is_empty() {
        embed["fields"] = json!([{
            "name": "⚡ Changes detected",
            "value": truncate(&change_lines(&event.changes), MAX_FIELD_VALUE),
            "inline": false,
        }]);
    }
    embed
}

/// The fields worth showing: what we see now, or what we last saw.
fn shown_fields(event: &ChangeEvent) -> &[Field] {
    event
        .current
        .as_ref()
        .or(event.previous.as_ref())
        .map(|s| s.fields.as_slice())
        .unwrap_or_default()
}

/// Wrap `body` in a code block of at most `max` characters.
fn fenced(body: &str, max: usize) -> String {
    const OPEN: &str = "```\n";
    const CLOSE: &str = "```";
    let mut body = truncate(body, max.saturating_sub(OPEN.len() + CLOSE.len() + 1));
    if !body.ends_with('\n') {
        body.push('\n');
    }
    format!("{OPEN}{body}{CLOSE}")
}

/// A fixed-width table of fields with change markers.
fn table(fields: &[Field], changes: &[FieldChange]) -> String {
    let header = format!("{:<3} {:<NAME_WIDTH$} {:>VALUE_WIDTH$}", "#", "Item", "Value");
    let divider = "─".repeat(header.chars().count());

    let mut out = String::new();
    let _ = writeln!(out, "{header}\n{divider}");
    for (i, field) in fields.iter().enumerate() {
        let marker = changes
            .iter()
            .find(|c| c.name() == field.name)
            .map_or("  ", marker_for);
        let value = field.value.as_deref().unwrap_or("—");
        let _ = writeln!(
            out,
            "{marker}{:<2} {:<NAME_WIDTH$} {value:>VALUE_WIDTH$}",
            i + 1,
            truncate(&field.name, NAME_WIDTH),
        );
    }

    let gone: Vec<&str> = changes
        .iter()
        .filter(|c| matches!(c, FieldChange::Removed { .. }))
        .map(FieldChange::name)
        .collect();
    if !gone.is_empty() {
        let _ = writeln!(out, "{divider}\nGone this run:");
        for name in gone {
            let _ = writeln!(out, "❌  {}", truncate(name, NAME_WIDTH));
        }
    }

    out
}

fn marker_for(change: &FieldChange) -> &'static str {
    match change {
        FieldChange::Added { .. } => "🆕",
        FieldChange::Changed {
            direction: Some(Direction::Down),
            ..
        } => "📉",
        FieldChange::Changed {
            direction: Some(Direction::Up),
            ..
        } => "📈",
        FieldChange::Changed { .. } => "🔄",
        FieldChange::Removed { .. } => "❌",
    }
}

fn change_lines(changes: &[FieldChange]) -> String {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "—".to_string());
    changes
        .iter()
        .map(|change| match change {
            FieldChange::Added { name, value } => {
                format!("🆕 **New:** {name}\n    Value: **{}**", or_dash(value))
            }
            FieldChange::Removed { name, .. } => format!("❌ **Gone:** {name}"),
            FieldChange::Changed {
                name,
                from,
                to,
                direction,
            } => {
                let (icon, what) = match direction {
                    Some(Direction::Down) => ("📉", "Price drop"),
                    Some(Direction::Up) => ("📈", "Price increase"),
                    None => ("🔄", "Changed"),
                };
                format!(
                    "{icon} **{what}:** {}\n    {} → **{}**",
                    truncate(name, 45),
                    or_dash(from),
                    or_dash(to)
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn color(event: &ChangeEvent, fields: &[Field]) -> u32 {
    match event.kind {
        ChangeKind::Failed => GREY,
        _ if fields.is_empty() => GREY,
        ChangeKind::Updated if event.is_urgent() => RED,
        ChangeKind::Updated | ChangeKind::Removed => ORANGE,
        ChangeKind::Created | ChangeKind::Unchanged => GREEN,
    }
}

fn status(event: &ChangeEvent, fields: &[Field]) -> String {
    match (&event.kind, &event.failure) {
        (ChangeKind::Created, _) => format!("📋 Initial snapshot — {} field(s)", fields.len()),
        (ChangeKind::Updated, _) => format!("⚠️  {} change(s) detected", event.changes.len().max(1)),
        (ChangeKind::Removed, _) => "❌  No longer exists".to_string(),
        (ChangeKind::Failed, Some(failure)) => format!("⚠️  Check failed while {}", failure.phase),
        (ChangeKind::Failed, None) => "⚠️  Check failed".to_string(),
        (ChangeKind::Unchanged, _) if event.current.is_none() => "❌  Still gone".to_string(),
        (ChangeKind::Unchanged, _) if fields.is_empty() => "⚠️  Nothing found".to_string(),
        (ChangeKind::Unchanged, _) => format!("✅  {} field(s) — no changes", fields.len()),
    }
}

/// Cut `text` to `max` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
