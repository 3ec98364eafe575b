//! Retry policy — what happens to a job after a hard sender failure.
//!
//! Soft signals (rate limit, drip continuation) are handled before this
//! policy and never consume attempts. Here we only decide the fate of
//! classified terminal errors and unclassified provider errors.

use std::time::Duration;

use remarket_core::error::SendError;

/// Retry policy for hard failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Default attempt ceiling, used when a job declares none.
    pub max_attempts: u32,
    /// Base delay for exponential backoff on unclassified errors.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        }
    }
}

/// The policy's verdict for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rewrite the job at `now + delay` and try again.
    Retry { delay: Duration },
    /// Write a failure log entry and delete the job.
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do with a failed attempt. `attempts` is the count
    /// of hard failures already consumed; `job_max` is the job's own
    /// ceiling (0 means "use the policy default").
    ///
    /// Blocked and invalid-request errors are terminal: retrying them
    /// cannot succeed. Unclassified provider errors back off
    /// exponentially until the ceiling. Rate limits retry at exactly the
    /// provider-requested delay and are normally intercepted before this
    /// policy so they never consume attempts.
    pub fn decide(&self, error: &SendError, attempts: u32, job_max: u32) -> RetryDecision {
        match error {
            SendError::RateLimited { retry_after } => RetryDecision::Retry {
                delay: *retry_after,
            },
            SendError::Blocked(_) | SendError::InvalidRequest(_) => RetryDecision::GiveUp,
            SendError::Provider(_) => {
                let ceiling = if job_max > 0 { job_max } else { self.max_attempts };
                if attempts + 1 >= ceiling {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::Retry {
                        delay: self.backoff(attempts),
                    }
                }
            }
        }
    }

    /// Exponential backoff: base × 2^attempts, shift capped to keep the
    /// multiplication sane.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.base_delay * 2u32.pow(attempts.min(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_blocked_and_invalid_are_terminal() {
        let p = policy();
        assert_eq!(
            p.decide(&SendError::Blocked("blocked".into()), 0, 0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            p.decide(&SendError::InvalidRequest("bad id".into()), 0, 0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_provider_error_backs_off_then_gives_up() {
        let p = policy();
        let err = SendError::Provider("502".into());
        assert_eq!(
            p.decide(&err, 0, 0),
            RetryDecision::Retry {
                delay: Duration::from_secs(10)
            }
        );
        assert_eq!(
            p.decide(&err, 1, 0),
            RetryDecision::Retry {
                delay: Duration::from_secs(20)
            }
        );
        // Third attempt hits the ceiling of 3.
        assert_eq!(p.decide(&err, 2, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn test_job_ceiling_overrides_default() {
        let p = policy();
        let err = SendError::Provider("oops".into());
        assert_eq!(p.decide(&err, 0, 1), RetryDecision::GiveUp);
        assert!(matches!(
            p.decide(&err, 3, 10),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_rate_limit_uses_provider_delay() {
        let p = policy();
        let err = SendError::RateLimited {
            retry_after: Duration::from_secs(17),
        };
        assert_eq!(
            p.decide(&err, 99, 3),
            RetryDecision::Retry {
                delay: Duration::from_secs(17)
            }
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(10));
        assert_eq!(p.backoff(1), Duration::from_secs(20));
        assert_eq!(p.backoff(3), Duration::from_secs(80));
        // Shift cap keeps large attempt counts finite.
        assert_eq!(p.backoff(100), p.backoff(8));
    }
}
