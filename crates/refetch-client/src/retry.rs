//! Retry policy helpers.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Retry policy configuration.
///
/// The delay before retry `n` (1-based) is
/// `min_delay * factor^(n - 1)`, multiplied by a random factor in `[1, 2)`
/// when `randomize` is set, and capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub retries: u32,
    /// Exponential backoff factor.
    pub factor: f64,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Randomize delays.
    pub randomize: bool,
    /// Retry responses that carried a GraphQL `errors` array.
    pub retry_application_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            factor: 2.0,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            randomize: true,
            retry_application_errors: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// Default policy with a custom retry count.
    #[must_use]
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Returns `true` if this error kind may be retried at all.
    #[must_use]
    pub fn is_retryable(&self, error: &ClientError) -> bool {
        match error {
            ClientError::Transport(err) => err.is_retryable(),
            ClientError::Application(_) => self.retry_application_errors,
            ClientError::Json(_) => true,
            ClientError::Canceled
            | ClientError::Protocol { .. }
            | ClientError::Config { .. }
            | ClientError::Refetch { .. } => false,
        }
    }

    /// Decide whether to retry after `attempt` attempts have failed.
    #[must_use]
    pub fn decide(&self, error: &ClientError, attempt: u32) -> RetryDecision {
        if attempt > self.retries {
            return RetryDecision::DoNotRetry;
        }
        if !self.is_retryable(error) {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }

    /// Delay before the retry that follows attempt `attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let random = if self.randomize {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        let base = self.min_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent) * random;
        let capped = base.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

/// Retry setting as accepted from configuration and per-call options.
///
/// Mirrors the accepted shapes: `true`/`false`, a retry count, or a
/// structured policy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrySetting {
    /// `true` keeps the default policy, `false` disables retries.
    Enabled(bool),
    /// Default policy with this many retries.
    Count(u32),
    /// Fully specified policy.
    Policy(RetryConfig),
}

impl Default for RetrySetting {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

impl RetrySetting {
    /// Resolve a per-call setting against the client policy.
    ///
    /// A disabled client policy stays disabled, and `false` disables either
    /// way. `true` keeps the client policy as is. A count replaces only the
    /// retry budget, keeping the client's timing and flags.
    #[must_use]
    pub fn resolve(&self, global: &RetryPolicy) -> RetryPolicy {
        if global.retries == 0 {
            return global.clone();
        }
        match self {
            Self::Enabled(true) => global.clone(),
            Self::Enabled(false) => RetryPolicy::disabled(),
            Self::Count(retries) => RetryPolicy {
                retries: *retries,
                ..global.clone()
            },
            Self::Policy(config) => config.to_policy(),
        }
    }

    /// Resolve into a concrete policy.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        match self {
            Self::Enabled(true) => RetryPolicy::default(),
            Self::Enabled(false) => RetryPolicy::disabled(),
            Self::Count(retries) => RetryPolicy::with_retries(*retries),
            Self::Policy(config) => config.to_policy(),
        }
    }
}

impl From<bool> for RetrySetting {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl From<u32> for RetrySetting {
    fn from(retries: u32) -> Self {
        Self::Count(retries)
    }
}

impl From<RetryConfig> for RetrySetting {
    fn from(config: RetryConfig) -> Self {
        Self::Policy(config)
    }
}

/// Serializable retry policy table. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries allowed after the initial attempt.
    pub retries: u32,
    /// Exponential backoff factor.
    pub factor: f64,
    /// Delay before the first retry, in milliseconds.
    pub min_timeout_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_timeout_ms: u64,
    /// Randomize delays.
    pub randomize: bool,
    /// Retry responses that carried a GraphQL `errors` array.
    pub retry_application_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retries: policy.retries,
            factor: policy.factor,
            min_timeout_ms: u64::try_from(policy.min_delay.as_millis()).unwrap_or(u64::MAX),
            max_timeout_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX),
            randomize: policy.randomize,
            retry_application_errors: policy.retry_application_errors,
        }
    }
}

impl RetryConfig {
    /// Convert into a runtime policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            factor: self.factor,
            min_delay: Duration::from_millis(self.min_timeout_ms),
            max_delay: Duration::from_millis(self.max_timeout_ms),
            randomize: self.randomize,
            retry_application_errors: self.retry_application_errors,
        }
    }
}
