//! Exponential backoff for transient GAM failures.
//!
//! Retries are invisible to the executor: an action either gets a usable
//! result within its budget or reports the last attempt as a failure.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to retry and how quickly to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` (0-based) is `backoff_factor ** n` seconds.
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: u32) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    /// Delay to wait before the retry numbered `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = u64::from(self.backoff_factor).saturating_pow(attempt);
        Duration::from_secs(secs)
    }

    /// Run `op` until it yields a result `is_transient` rejects, or the budget
    /// runs out. The last result is returned either way.
    pub fn run<T, E>(
        &self,
        sleeper: &dyn Sleeper,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&Result<T, E>) -> Option<String>,
    ) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            let result = op();
            let Some(reason) = is_transient(&result) else {
                return result;
            };
            if attempt >= self.max_retries {
                tracing::warn!(attempts = attempt + 1, "giving up after transient failure: {}", reason);
                return result;
            }
            let delay = self.delay_for(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                "transient failure ({}), retrying in {}",
                reason,
                humantime::format_duration(delay)
            );
            sleeper.sleep(delay);
            attempt += 1;
        }
    }
}

/// Abstraction over `thread::sleep` so backoff can be observed in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Recognize rate-limit and quota signals in GAM's error output.
pub fn transient_signal(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    if lower.contains("rate limit") {
        Some("rate limit")
    } else if lower.contains("quota exceeded") {
        Some("quota exceeded")
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;

    fn rate_limited(result: &Result<&'static str, &'static str>) -> Option<String> {
        match result {
            Err(e) => transient_signal(e).map(str::to_string),
            Ok(_) => None,
        }
    }

    #[test]
    fn retries_until_success_with_exponential_delays() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = policy.run(
            &sleeper,
            || {
                calls += 1;
                if calls <= 2 { Err("Rate Limit Exceeded") } else { Ok("done") }
            },
            rate_limited,
        );
        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 3);
        assert_eq!(
            *sleeper.delays.lock(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn exhausted_budget_returns_last_failure() {
        let policy = RetryPolicy::new(3, 2);
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = policy.run(
            &sleeper,
            || {
                calls += 1;
                Err::<&str, _>("quota exceeded for project")
            },
            rate_limited,
        );
        assert_eq!(result, Err("quota exceeded for project"));
        assert_eq!(calls, 4);
        assert_eq!(
            *sleeper.delays.lock(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result = policy.run(
            &sleeper,
            || {
                calls += 1;
                Err::<&str, _>("user not found")
            },
            rate_limited,
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.delays.lock().is_empty());
    }

    #[test]
    fn zero_retries_runs_once() {
        let policy = RetryPolicy::new(0, 2);
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let _ = policy.run(
            &sleeper,
            || {
                calls += 1;
                Err::<&str, _>("rate limit")
            },
            rate_limited,
        );
        assert_eq!(calls, 1);
    }
}
