//! Retry policy for provider calls.
//!
//! Every remote call made by a driver goes through [`RetryPolicy::run`]. Only
//! errors matched by the call's [`RetryOn`] class are retried, each after an
//! exponentially growing delay. A call is attempted at most
//! [`RetryConfig::max_attempts`] times, after which the last transient error is
//! surfaced as [`DeployError::RetriesExhausted`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::errors::{DeployError, RemoteError};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * factor^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Which provider failures count as transient for a given call.
///
/// Rate limiting is transient for every class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Only rate limiting.
    Throttling,
    /// Rate limiting, plus a role or key that has not propagated yet.
    RolePropagation,
    /// Rate limiting, plus concurrent-modification conflicts.
    Conflict,
}

impl RetryOn {
    /// Returns true if `error` should be retried under this class.
    #[must_use]
    pub fn matches(self, error: &RemoteError) -> bool {
        if error.is_throttled() {
            return true;
        }
        match self {
            Self::Throttling => false,
            Self::RolePropagation => error.is_role_propagation(),
            Self::Conflict => error.is_conflict(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of invocations, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_factor")]
    pub factor: u32,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::default(),
            jitter_strategy: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed delay between a bounded number of attempts.
    #[must_use]
    pub fn fixed(delay_ms: u64, max_attempts: usize) -> Self {
        Self::default()
            .with_base_delay_ms(delay_ms)
            .with_max_attempts(max_attempts)
            .with_backoff(BackoffStrategy::Constant)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the exponential factor.
    #[must_use]
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Effective attempt budget; a zero budget still makes one call.
    #[must_use]
    pub fn attempt_budget(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base
                .saturating_mul(u64::from(self.factor).saturating_pow(exponent))
                .min(max),
            BackoffStrategy::Linear => base
                .saturating_mul(u64::from(exponent).saturating_add(1))
                .min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Runs provider calls under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a config.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes `operation` until it succeeds, fails permanently, or the
    /// attempt budget is spent.
    ///
    /// Non-transient errors are returned immediately as [`DeployError::Remote`].
    /// Backoff sleeps end early with [`DeployError::Cancelled`] when `cancel`
    /// fires.
    pub async fn run<T, F, Fut>(
        &self,
        name: &str,
        retry_on: RetryOn,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let budget = self.config.attempt_budget();
        let mut attempts = 0;

        loop {
            cancel.check()?;
            attempts += 1;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !retry_on.matches(&error) {
                return Err(DeployError::remote(name, error));
            }
            if attempts >= budget {
                return Err(DeployError::RetriesExhausted {
                    operation: name.to_string(),
                    attempts,
                    source: error,
                });
            }

            let delay = self.config.delay_for(attempts - 1);
            debug!(
                operation = %name,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Retrying after transient error"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(DeployError::Cancelled(
                        cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{codes, ErrorCategory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.factor, 2);
        assert_eq!(config.jitter_strategy, JitterStrategy::None);
    }

    #[test]
    fn test_retry_config_deserializes_with_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_exponential_delays() {
        let config = RetryConfig::new().with_base_delay_ms(100).with_factor(2);
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);
        assert_eq!(config.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_fixed_delays() {
        let config = RetryConfig::fixed(2000, 4);
        assert_eq!(config.delay_for(0), Duration::from_millis(2000));
        assert_eq!(config.delay_for(3), Duration::from_millis(2000));
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Full);
        for _ in 0..10 {
            assert!(config.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_retry_on_classes() {
        let throttled = RemoteError::throttled("slow down");
        let conflict = RemoteError::conflict("busy");
        let propagation = RemoteError::new(
            codes::INVALID_PARAMETER,
            "The role defined for the function cannot be assumed by Lambda.",
        );

        assert!(RetryOn::Throttling.matches(&throttled));
        assert!(!RetryOn::Throttling.matches(&conflict));
        assert!(RetryOn::Conflict.matches(&conflict));
        assert!(RetryOn::RolePropagation.matches(&propagation));
        assert!(!RetryOn::RolePropagation.matches(&conflict));
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let policy = RetryPolicy::new(fast_config(5));
        let token = CancellationToken::new();
        let mut calls = 0;

        let result = policy
            .run("op", RetryOn::Throttling, &token, || {
                calls += 1;
                async { Ok::<_, RemoteError>(42) }
            })
            .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let policy = RetryPolicy::new(fast_config(5));
        let token = CancellationToken::new();
        let mut calls = 0;

        let result = policy
            .run("op", RetryOn::Throttling, &token, || {
                calls += 1;
                let current = calls;
                async move {
                    if current < 3 {
                        Err(RemoteError::throttled("slow down"))
                    } else {
                        Ok(current)
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_exactly_max_attempts_then_terminal() {
        let policy = RetryPolicy::new(fast_config(5));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let result: Result<(), _> = policy
            .run("create_function", RetryOn::Throttling, &token, || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::throttled("Rate exceeded")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let error = result.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Transient);
        assert!(matches!(error, DeployError::RetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let policy = RetryPolicy::new(fast_config(5));
        let token = CancellationToken::new();
        let mut calls = 0;

        let result: Result<(), _> = policy
            .run("get_role", RetryOn::Throttling, &token, || {
                calls += 1;
                async { Err(RemoteError::not_found("no such role")) }
            })
            .await;

        assert_eq!(calls, 1);
        assert!(result.unwrap_err().is_remote_not_found());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(5)
                .with_base_delay_ms(60_000),
        );
        let token = Arc::new(CancellationToken::new());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel("operator abort");
            })
        };

        let result: Result<(), _> = policy
            .run("op", RetryOn::Throttling, &token, || async {
                Err(RemoteError::throttled("slow down"))
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(DeployError::Cancelled(r)) if r == "operator abort"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        token.cancel("stop");
        let mut calls = 0;

        let result = policy
            .run("op", RetryOn::Throttling, &token, || {
                calls += 1;
                async { Ok::<_, RemoteError>(()) }
            })
            .await;

        assert_eq!(calls, 0);
        tokio_test::assert_err!(result);
    }
}
