//! Where change events go after a cycle.
//!
//! A [`Sink`] receives the whole [`CycleReport`] so it can batch. [`Sinks`]
//! fans a report out to every configured sink; one sink failing is logged
//! and does not affect the others.

mod discord;
mod jsonl;
mod logging;

use std::io;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{NotifyConfig, WEBHOOK_ENV};
use crate::model::Target;
use crate::tracker::CycleReport;

pub use discord::DiscordSink;
pub use jsonl::JsonLinesSink;
pub use logging::LogSink;

/// Errors that can occur while delivering events.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A destination for cycle reports.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn publish(&self, report: &CycleReport) -> Result<(), NotifyError>;
}

/// Every configured sink.
#[derive(Default)]
pub struct Sinks {
    sinks: Vec<Box<dyn Sink>>,
}

impl Sinks {
    /// Build the sinks named in `config`.
    pub fn from_config(config: &NotifyConfig, targets: &[Target]) -> Result<Self, NotifyError> {
        let mut sinks = Self::default();

        if config.log {
            sinks.push(Box::new(LogSink));
        }

        if let Some(path) = &config.jsonl {
            let sink = if path.as_os_str() == "-" {
                JsonLinesSink::stdout()
            } else {
                JsonLinesSink::file(path)
            };
            sinks.push(Box::new(sink));
        }

        if let Some(discord) = &config.discord {
            match discord.webhook_url.as_deref().filter(|u| !u.is_empty()) {
                Some(url) => sinks.push(Box::new(DiscordSink::new(url, discord, targets)?)),
                None => warn!("discord is configured without a webhook URL (set {WEBHOOK_ENV})"),
            }
        }

        Ok(sinks)
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hand `report` to every sink in turn.
    pub async fn publish(&self, report: &CycleReport) {
        for sink in &self.sinks {
            match sink.publish(report).await {
                Ok(()) => debug!(sink = sink.name(), "report published"),
                Err(e) => warn!(sink = sink.name(), error = %e, "failed to publish report"),
            }
        }
    }
}
