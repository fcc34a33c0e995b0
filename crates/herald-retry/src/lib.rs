//! Backoff strategies and a classified retry executor.
//!
//! Uploads are the only operation herald retries. Each failure is classified
//! as [`ErrorClass::Retryable`] (transport errors, 5xx, rate limiting) or
//! [`ErrorClass::Permanent`]; only the former consumes another attempt.
//!
//! # Example
//!
//! ```
//! use herald_retry::{ErrorClass, RetryExecutor, RetryPolicy};
//!
//! let executor = RetryExecutor::from_policy(RetryPolicy::Immediate);
//! let result = executor.run_classified(
//!     |attempt| if attempt < 3 { Err("flaky") } else { Ok(attempt) },
//!     |_| ErrorClass::Retryable,
//!     |_, _, _| {},
//! );
//! assert_eq!(result.unwrap(), 3);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// Retry without waiting
    Immediate,
    /// Delay doubles each attempt
    Exponential,
    /// Delay grows by `base_delay` each attempt
    #[default]
    Linear,
    /// Same delay every attempt
    Constant,
}

/// Named retry presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Ten attempts, linear 50ms backoff, no jitter
    #[default]
    Upload,
    /// Exponential backoff for flaky or rate-limited hosts
    Patient,
    /// Retries with no delay; intended for tests
    Immediate,
    /// Single attempt
    Never,
}

impl RetryPolicy {
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Upload => RetryStrategyConfig::default(),
            RetryPolicy::Patient => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Immediate => RetryStrategyConfig {
                strategy: RetryStrategyType::Immediate,
                max_attempts: 10,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: 0.0,
            },
            RetryPolicy::Never => RetryStrategyConfig {
                max_attempts: 1,
                ..RetryStrategyConfig::default()
            },
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Randomization factor; 0.3 spreads each delay over 70%..130%.
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Linear,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: 0.0,
        }
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Delay to wait after the given (1-indexed) failed attempt.
///
/// ```
/// use herald_retry::{RetryStrategyConfig, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig::default();
/// assert_eq!(calculate_delay(&config, 1), Duration::from_millis(50));
/// assert_eq!(calculate_delay(&config, 3), Duration::from_millis(150));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter = jitter.clamp(0.0, 1.0);
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    let millis = (delay.as_millis() as f64 * factor).round() as u64;
    Duration::from_millis(millis)
}

/// Failure returned once the executor stops retrying.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made, including the final one.
    pub attempts: u32,
    pub class: ErrorClass,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "after {} tries: {}", self.attempts, self.error)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Runs a fallible operation until it succeeds, fails permanently, or runs
/// out of attempts.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn config(&self) -> &RetryStrategyConfig {
        &self.config
    }

    /// Run `operation`, consulting `classify` on every failure.
    ///
    /// `on_retry` is called with the failed attempt number, its error and the
    /// delay before the next attempt. Permanent errors stop immediately.
    pub fn run_classified<T, E, F, C, R>(
        &self,
        mut operation: F,
        classify: C,
        mut on_retry: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
        R: FnMut(u32, &E, Duration),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let class = classify(&err);
                    if class == ErrorClass::Permanent || attempt >= max_attempts {
                        return Err(RetryError {
                            attempts: attempt,
                            class,
                            error: err,
                        });
                    }

                    let delay = calculate_delay(&self.config, attempt);
                    on_retry(attempt, &err, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn immediate(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryStrategyConfig {
            max_attempts,
            ..RetryPolicy::Immediate.to_config()
        })
    }

    #[test]
    fn upload_policy_is_linear_fifty_millis() {
        let config = RetryPolicy::Upload.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Linear);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(calculate_delay(&config, 1), Duration::from_millis(50));
        assert_eq!(calculate_delay(&config, 4), Duration::from_millis(200));
    }

    #[test]
    fn never_policy_makes_one_attempt() {
        let calls = Cell::new(0);
        let result = RetryExecutor::from_policy(RetryPolicy::Never).run_classified(
            |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>("boom")
            },
            |_| ErrorClass::Retryable,
            |_, _, _| {},
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 9), Duration::from_secs(10));
        assert_eq!(calculate_delay(&config, u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn constant_and_immediate_delays() {
        let mut config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(2),
            ..RetryStrategyConfig::default()
        };
        assert_eq!(calculate_delay(&config, 7), Duration::from_secs(2));
        config.strategy = RetryStrategyType::Immediate;
        assert_eq!(calculate_delay(&config, 7), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            max_attempts: 3,
        };
        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn retryable_errors_are_retried_until_success() {
        let retries = Cell::new(0);
        let result = immediate(5).run_classified(
            |attempt| if attempt < 3 { Err("flaky") } else { Ok("done") },
            |_| ErrorClass::Retryable,
            |_, _, _| retries.set(retries.get() + 1),
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(retries.get(), 2);
    }

    #[test]
    fn permanent_error_stops_after_first_attempt() {
        let result = immediate(5).run_classified(
            |_| Err::<(), _>("denied"),
            |_| ErrorClass::Permanent,
            |_, _, _| panic!("permanent errors must not be retried"),
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.class, ErrorClass::Permanent);
    }

    #[test]
    fn exhausted_budget_reports_attempts() {
        let result = immediate(4).run_classified(
            |_| Err::<(), _>(std::io::Error::other("upload failed")),
            |_| ErrorClass::Retryable,
            |_, _, _| {},
        );
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.to_string(), "after 4 tries: upload failed");
    }

    #[test]
    fn config_parses_humantime_durations() {
        let config: RetryStrategyConfig =
            serde_json::from_str(r#"{"strategy":"exponential","base_delay":"250ms"}"#).unwrap();
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.max_delay, Duration::from_secs(5));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_cap(attempt in 1u32..1000, base in 0u64..10_000, cap in 0u64..60_000) {
                for strategy in [
                    RetryStrategyType::Immediate,
                    RetryStrategyType::Exponential,
                    RetryStrategyType::Linear,
                    RetryStrategyType::Constant,
                ] {
                    let config = RetryStrategyConfig {
                        strategy,
                        max_attempts: 10,
                        base_delay: Duration::from_millis(base),
                        max_delay: Duration::from_millis(cap),
                        jitter: 0.0,
                    };
                    prop_assert!(calculate_delay(&config, attempt) <= Duration::from_millis(cap));
                }
            }
        }
    }
}
