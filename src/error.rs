//! Platform Error Taxonomy
//!
//! Rate-limit responses must be distinguishable from generic upstream
//! failures so the budget ledger can record a cooldown instead of retrying.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the platform client.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// 429 with a retry-after hint. Never retried; recorded as a cooldown.
    #[error("rate limited on {endpoint}, retry after {retry_after:?}")]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },

    /// 401 or an explicit suspension hint. Aborts the entire run.
    #[error("fatal platform error: {0}")]
    Fatal(String),

    /// 5xx. Retryable with fixed backoff.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Other 4xx. Never retried.
    #[error("bad request {status}: {body}")]
    BadRequest { status: u16, body: String },

    /// Transport-level failure. Retryable.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl PlatformError {
    /// Whether the retry loop may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Upstream { .. } | PlatformError::Network(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PlatformError::Fatal(_))
    }
}
