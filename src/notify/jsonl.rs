//! Events as JSON lines, for piping into other tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::tracker::CycleReport;

use super::{NotifyError, Sink};

/// Appends one JSON object per event to a file or stdout.
pub struct JsonLinesSink {
    output: Output,
}

enum Output {
    Stdout,
    File(PathBuf),
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self {
            output: Output::Stdout,
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            output: Output::File(path.as_ref().to_path_buf()),
        }
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn publish(&self, report: &CycleReport) -> Result<(), NotifyError> {
        let mut lines = Vec::new();
        for event in &report.events {
            serde_json::to_writer(&mut lines, event)?;
            lines.push(b'\n');
        }
        if lines.is_empty() {
            return Ok(());
        }

        match &self.output {
            Output::Stdout => write_all(tokio::io::stdout(), &lines).await,
            Output::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                write_all(file, &lines).await
            }
        }
    }
}

async fn write_all(mut out: impl AsyncWrite + Unpin + Send, bytes: &[u8]) -> Result<(), NotifyError> {
    out.write_all(bytes).await?;
    out.flush().await?;
    Ok(())
}
