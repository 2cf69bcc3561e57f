//! Fetching: observe a target and return what the page said.
//!
//! The [`Fetcher`] trait is the I/O boundary of the tracker. The real
//! implementation drives a browser over WebDriver ([`webdriver`]); tests
//! substitute scripted fetchers. [`Retrying`] wraps any fetcher with
//! bounded exponential backoff for transient failures.

mod extract;
#[cfg(test)]
pub mod fake;
mod retry;
pub mod webdriver;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::Target;

pub use extract::selector;
pub use retry::{Backoff, Retrying};

/// What a fetch brought back, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    pub target: String,
    pub items: Vec<RawItem>,
}

/// One extracted item: a name and a value, either possibly missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub name: Option<String>,
    pub value: Option<String>,
}

impl RawItem {
    pub fn named(name: &str, value: Option<String>) -> Self {
        Self {
            name: Some(name.to_string()),
            value,
        }
    }
}

/// Errors that can occur while fetching a target.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("timed out {during}")]
    Timeout { during: String },

    #[error("{url} no longer exists")]
    NotFound { url: String },

    #[error("browser session failed: {0}")]
    Session(String),

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::Session(_)
        )
    }
}

/// Observe one target.
///
/// Implementations must release every resource they acquire before
/// returning, on success and on failure alike.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<RawObservation, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_network_shaped() {
        assert!(
            FetchError::Timeout {
                during: "page load".into()
            }
            .is_transient()
        );
        assert!(
            FetchError::Unreachable {
                url: "https://x".into(),
                reason: "dns".into()
            }
            .is_transient()
        );
        assert!(FetchError::Session("502".into()).is_transient());

        assert!(
            !FetchError::NotFound {
                url: "https://x".into()
            }
            .is_transient()
        );
        assert!(!FetchError::Extract("bad selector".into()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
    }
}
