//! Error types for the pnsindex pipeline.

use thiserror::Error;

/// Errors that can occur during ingestion and reconciliation.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),

    #[error("failed to fetch logs for blocks {from}..={to} after {attempts} attempts: {reason}")]
    FetchFailed {
        from: u64,
        to: u64,
        attempts: u32,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("cursor regression: stored {current}, requested {requested}")]
    CursorRegression { current: u64, requested: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Message fragments that providers use for throttling and for
/// "range too large" responses. Both are answered by shrinking the window.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "too many requests",
    "exceeded",
    "query returned more than",
];

impl IndexerError {
    /// Returns `true` if the provider rejected the request because of
    /// throttling or because the block range returned too many results.
    pub fn is_rate_limit_or_size(&self) -> bool {
        match self {
            Self::Rpc(msg) => {
                let msg = msg.to_lowercase();
                RATE_LIMIT_MARKERS.iter().any(|m| msg.contains(m))
            }
            _ => false,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_messages() {
        for msg in [
            "HTTP 429 Too Many Requests",
            "Rate limit reached for this key",
            "daily request count exceeded",
            "query returned more than 10000 results",
        ] {
            assert!(IndexerError::Rpc(msg.into()).is_rate_limit_or_size(), "{msg}");
        }
    }

    #[test]
    fn other_rpc_errors_are_transient() {
        let err = IndexerError::Rpc("connection reset by peer".into());
        assert!(!err.is_rate_limit_or_size());
        assert!(err.is_retryable());
        assert!(IndexerError::Timeout(30_000).is_retryable());
        assert!(!IndexerError::Storage("disk full".into()).is_retryable());
    }
}
