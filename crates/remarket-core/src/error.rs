//! Error types for the remarketing pipeline.
//!
//! Two layers: `RemarketError` is the general-purpose error for config,
//! storage, and wiring problems. `SendError` is the classified taxonomy
//! raised by channel senders — the scheduler only ever distinguishes
//! "soft/retryable" from "everything else", so all provider-specific
//! classification happens at the sender, never above it.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, RemarketError>;

/// General error type for the remarketing pipeline.
#[derive(Debug, Error)]
pub enum RemarketError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemarketError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }
}

/// Classified failure raised by a channel sender.
///
/// `RateLimited` is the only retryable variant: the scheduler reschedules
/// the job and writes no log entry. Every other variant is terminal for
/// the attempt and feeds the retry policy.
#[derive(Debug, Error)]
pub enum SendError {
    /// Provider asked us to back off. Carries the retry-after duration
    /// extracted from the provider response.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The recipient blocked the bot, kicked it, or the bot lacks
    /// permission to message them. Terminal for that recipient.
    #[error("blocked: {0}")]
    Blocked(String),

    /// Bad recipient id or malformed payload. Terminal, distinguished
    /// from `Blocked` for reporting.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything else: transport failure, 5xx, unparseable response.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Successful outcome of a sender invocation.
///
/// `MoreWork` is a first-class signal distinct from both success and
/// failure: the job stays alive and is rescheduled, which is how a
/// drip-fed campaign keeps itself running through the scheduler's
/// ordinary timer loop.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// The job is done; optional provider response for the audit log.
    Done { response: Option<serde_json::Value> },
    /// The job made progress but more remains; re-run after the delay.
    MoreWork { resume_after: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_display() {
        let e = SendError::Blocked("user blocked the bot".into());
        assert!(e.to_string().contains("blocked"));

        let e = SendError::RateLimited {
            retry_after: Duration::from_secs(5),
        };
        assert!(e.to_string().contains("rate limited"));
    }

    #[test]
    fn test_remarket_error_helpers() {
        let e = RemarketError::config("missing bot token");
        assert!(matches!(e, RemarketError::Config(_)));
        assert!(e.to_string().contains("missing bot token"));
    }
}
