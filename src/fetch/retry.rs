//! Bounded exponential backoff around any fetcher.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::Target;

use super::{FetchError, Fetcher, RawObservation};

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    /// Delay before retrying after the given failed attempt (1-based).
    ///
    /// Doubles each time, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A fetcher that retries transient failures of its inner fetcher.
///
/// Permanent failures (`NotFound`, extraction errors, cancellation) are
/// returned immediately. Waiting between attempts stops early when the
/// cancellation token fires.
pub struct Retrying<F> {
    inner: F,
    backoff: Backoff,
}

impl<F> Retrying<F> {
    pub fn new(inner: F, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for Retrying<F> {
    async fn fetch(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<RawObservation, FetchError> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.fetch(target, cancel).await {
                Ok(observation) => return Ok(observation),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    debug!(attempt, ?delay, error = %e, "retrying fetch");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(FetchError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(attempts = attempt, error = %e, "giving up on fetch");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fetch::fake::{ScriptedFetcher, Step};

    fn backoff(max_attempts: u32) -> Backoff {
        Backoff {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let b = Backoff {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(350));
        assert_eq!(b.delay(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let fetcher = ScriptedFetcher::new()
            .script("t1", [Step::Timeout, Step::Unreachable, Step::value("5")]);
        let retrying = Retrying::new(fetcher, backoff(3));
        let target = Target::bare("t1", "https://example.com");

        let raw = retrying
            .fetch(&target, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(raw.items[0].value.as_deref(), Some("5"));
        assert_eq!(retrying.inner.calls("t1"), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let fetcher =
            ScriptedFetcher::new().script("t1", [Step::Timeout, Step::Timeout, Step::value("5")]);
        let retrying = Retrying::new(fetcher, backoff(2));
        let target = Target::bare("t1", "https://example.com");

        let err = retrying
            .fetch(&target, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(retrying.inner.calls("t1"), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let fetcher = ScriptedFetcher::new().script("t1", [Step::NotFound, Step::value("5")]);
        let retrying = Retrying::new(fetcher, backoff(5));
        let target = Target::bare("t1", "https://example.com");

        let err = retrying
            .fetch(&target, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::NotFound { .. }));
        assert_eq!(retrying.inner.calls("t1"), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let fetcher = ScriptedFetcher::new().script("t1", [Step::Timeout, Step::value("5")]);
        let retrying = Retrying::new(
            fetcher,
            Backoff {
                max_attempts: 5,
                base_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
            },
        );
        let target = Target::bare("t1", "https://example.com");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = retrying.fetch(&target, &cancel).await.unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(retrying.inner.calls("t1"), 1);
    }
}
