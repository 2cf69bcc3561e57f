//! One log line per event.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::tracker::CycleReport;

use super::{NotifyError, Sink};

pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, report: &CycleReport) -> Result<(), NotifyError> {
        for event in &report.events {
            let id = event.target.as_str();
            match &event.failure {
                Some(failure) => {
                    warn!(id, phase = %failure.phase, reason = %failure.reason, "check failed");
                }
                None if event.kind.is_change() => {
                    info!(id, kind = ?event.kind, changes = event.changes.len(), "change detected");
                    for change in &event.changes {
                        info!(id, ?change, "field changed");
                    }
                }
                None => debug!(id, "unchanged"),
            }
        }
        Ok(())
    }
}
