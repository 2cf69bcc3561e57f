//! The tracking loop.
//!
//! One cycle takes every target through fetch → normalize → compare →
//! persist, then hands the resulting events to the sinks. A failing target
//! becomes a `failed` event; it never stops the others.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::diff::{self, Comparison};
use crate::fetch::{FetchError, Fetcher};
use crate::model::{ChangeEvent, ChangeKind, Phase, Target};
use crate::normalize::normalize;
use crate::notify::Sinks;
use crate::storage::{self, StateStore};

/// What one cycle produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,

    /// One event per attempted target, in configuration order.
    pub events: Vec<ChangeEvent>,

    /// False when cancellation cut the cycle short.
    pub completed: bool,
}

impl CycleReport {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Whether anything other than `unchanged` happened.
    pub fn has_news(&self) -> bool {
        self.events.iter().any(|e| e.kind != ChangeKind::Unchanged)
    }
}

/// Owns the store and drives cycles over a fixed set of targets.
pub struct Tracker<F, S> {
    fetcher: F,
    store: Mutex<S>,
    targets: Vec<Target>,
    sinks: Sinks,
    concurrency: usize,
}

impl<F: Fetcher, S: StateStore> Tracker<F, S> {
    pub fn new(fetcher: F, store: S, targets: Vec<Target>) -> Self {
        Self {
            fetcher,
            store: Mutex::new(store),
            targets,
            sinks: Sinks::default(),
            concurrency: 1,
        }
    }

    /// Check up to `n` targets at once.
    #[must_use]
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// Run cycles until cancelled, sleeping `interval` between them.
    /// With `once`, run a single cycle and stop.
    pub async fn run(
        &self,
        interval: Duration,
        once: bool,
        cancel: &CancellationToken,
    ) -> storage::Result<()> {
        loop {
            self.run_cycle(cancel).await;
            if once || cancel.is_cancelled() {
                break;
            }

            debug!(?interval, "sleeping until next cycle");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        info!("shutting down");
        self.store.lock().await.flush()
    }

    /// Check every target once and publish the result.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let id = Uuid::new_v4();
        async move {
            let started_at = Timestamp::now();
            info!(targets = self.targets.len(), "cycle started");

            let outcomes: Vec<Option<ChangeEvent>> = stream::iter(&self.targets)
                .map(|target| self.check(target, cancel))
                .buffered(self.concurrency)
                .collect()
                .await;

            let completed = outcomes.iter().all(Option::is_some);
            let report = CycleReport {
                id,
                started_at,
                finished_at: Timestamp::now(),
                events: outcomes.into_iter().flatten().collect(),
                completed,
            };

            info!(
                created = report.count(ChangeKind::Created),
                updated = report.count(ChangeKind::Updated),
                removed = report.count(ChangeKind::Removed),
                unchanged = report.count(ChangeKind::Unchanged),
                failed = report.count(ChangeKind::Failed),
                completed,
                "cycle finished"
            );
            self.sinks.publish(&report).await;
            report
        }
        .instrument(info_span!("cycle", %id))
        .await
    }

    /// One target, one event. `None` when cancelled before finishing.
    async fn check(&self, target: &Target, cancel: &CancellationToken) -> Option<ChangeEvent> {
        if cancel.is_cancelled() {
            debug!(id = %target.id, "skipped, cancelled");
            return None;
        }
        self.track(target, cancel)
            .instrument(info_span!("target", id = %target.id))
            .await
    }

    async fn track(&self, target: &Target, cancel: &CancellationToken) -> Option<ChangeEvent> {
        let raw = match self.fetcher.fetch(target, cancel).await {
            Ok(raw) => raw,
            Err(FetchError::Cancelled) => {
                debug!("fetch cancelled");
                return None;
            }
            Err(FetchError::NotFound { url }) => {
                info!(%url, "resource is gone");
                return Some(self.forget(target).await);
            }
            Err(e) => {
                warn!(error = %e, "fetch failed");
                let previous = self
                    .store
                    .lock()
                    .await
                    .get(&target.id)
                    .map(|r| r.snapshot(&target.id));
                return Some(ChangeEvent::failed(
                    &target.id,
                    Phase::Fetching,
                    e.to_string(),
                    previous,
                    Timestamp::now(),
                ));
            }
        };

        let now = Timestamp::now();
        let snapshot = normalize(target, &raw, now);

        // Held from read to write so a key's updates can't interleave.
        let mut store = self.store.lock().await;
        let previous = store.get(&target.id);
        let Comparison { event, record } = diff::compare(previous.as_ref(), snapshot, now);

        if let Err(e) = store.put(&target.id, record) {
            warn!(error = %e, "failed to persist record");
            return Some(ChangeEvent::failed(
                &target.id,
                Phase::Persisting,
                e.to_string(),
                previous.map(|r| r.snapshot(&target.id)),
                now,
            ));
        }

        debug!(kind = ?event.kind, changes = event.changes.len(), "checked");
        Some(event)
    }

    async fn forget(&self, target: &Target) -> ChangeEvent {
        let now = Timestamp::now();
        let mut store = self.store.lock().await;
        match store.remove(&target.id) {
            Ok(previous) => diff::removed(&target.id, previous.as_ref(), now),
            Err(e) => {
                warn!(error = %e, "failed to remove record");
                let previous = store.get(&target.id).map(|r| r.snapshot(&target.id));
                ChangeEvent::failed(&target.id, Phase::Persisting, e.to_string(), previous, now)
            }
        }
    }
}
