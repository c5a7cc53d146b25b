//! Retry policy for the HTTP client's retry loop.
//!
//! Three independent predicates decide whether an attempt is repeated:
//! rate limiting (`429` + `Retry-After`), the absence of any response
//! (dial/transport failure), and everything else, which is final.

use std::time::Duration;

use crate::error::Error;
use crate::response::Response;

/// Bounded retry configuration.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Upper bound on the cumulative rate-limit wait of one call.
    pub max_wait: Duration,
    /// Wait used for a `429` without a numeric `Retry-After`.
    pub default_rate_limit_wait: Duration,
    /// Wait between attempts that got no response.
    pub dial_retry_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_wait: Duration::from_secs(60),
            default_rate_limit_wait: Duration::from_secs(10),
            dial_retry_wait: Duration::from_secs(1),
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given duration, then attempt again.
    Retry(Duration),
    /// Return the current outcome to the caller.
    Stop,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    pub fn default_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.default_rate_limit_wait = wait;
        self
    }

    pub fn dial_retry_wait(mut self, wait: Duration) -> Self {
        self.dial_retry_wait = wait;
        self
    }

    /// Decide what to do after attempt number `attempt` (0-based).
    ///
    /// `rate_limit_waited` is the rate-limit wait already spent on this call.
    pub fn decide(
        &self,
        outcome: &Result<Response, Error>,
        attempt: u32,
        rate_limit_waited: Duration,
    ) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::Stop;
        }

        match outcome {
            Ok(response) if response.status == 429 => {
                let budget = self.max_wait.saturating_sub(rate_limit_waited);
                if budget.is_zero() {
                    return RetryDecision::Stop;
                }
                let wanted = response
                    .retry_after_secs()
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_rate_limit_wait);
                RetryDecision::Retry(wanted.min(budget))
            }
            Ok(_) => RetryDecision::Stop,
            Err(e) if e.is_retryable() => RetryDecision::Retry(self.dial_retry_wait),
            Err(_) => RetryDecision::Stop,
        }
    }
}
