//! Scripted fetcher for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::Target;

use super::{FetchError, Fetcher, RawItem, RawObservation};

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Items(Vec<(String, Option<String>)>),
    Timeout,
    Unreachable,
    NotFound,
}

impl Step {
    /// A page whose single `value` field reads `v`.
    pub fn value(v: &str) -> Self {
        Self::Items(vec![("value".into(), Some(v.into()))])
    }
}

/// Replays scripted outcomes per target id. The last step repeats forever.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), steps.into_iter().collect());
        self
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<RawObservation, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        *self.calls.lock().unwrap().entry(target.id.clone()).or_default() += 1;

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts
                .get_mut(&target.id)
                .unwrap_or_else(|| panic!("no script for {}", target.id));
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        };

        match step {
            Step::Items(items) => Ok(RawObservation {
                target: target.id.clone(),
                items: items
                    .into_iter()
                    .map(|(name, value)| RawItem {
                        name: Some(name),
                        value,
                    })
                    .collect(),
            }),
            Step::Timeout => Err(FetchError::Timeout {
                during: "page load".into(),
            }),
            Step::Unreachable => Err(FetchError::Unreachable {
                url: target.url.clone(),
                reason: "connection refused".into(),
            }),
            Step::NotFound => Err(FetchError::NotFound {
                url: target.url.clone(),
            }),
        }
    }
}
