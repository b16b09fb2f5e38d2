//! Fixed-schedule retry for mutating IoT Analytics calls.
//!
//! Creating a channel or datastore in the same apply as the IAM role it
//! assumes fails with "Unable to assume role" until the role has propagated.
//! Mutations are therefore retried on a fixed schedule. Every error is
//! retried; the last one is returned unchanged once the schedule runs out.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Seconds slept after each failed attempt of the default schedule.
pub const DEFAULT_DELAYS_SECS: [u64; 6] = [1, 2, 5, 8, 10, 0];

/// An ordered list of delays, one per attempt.
///
/// Attempt `i` (0-based) that fails is followed by a sleep of `delays[i]`,
/// unless it was the last attempt. The number of attempts equals the number
/// of delays, and is never less than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// Build a schedule from explicit delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Build a schedule from whole seconds.
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    /// The configured delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total time slept before attempt `attempt` (1-based) starts.
    pub fn latency_before(&self, attempt: usize) -> Duration {
        self.delays
            .iter()
            .take(attempt.saturating_sub(1))
            .sum()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_DELAYS_SECS)
    }
}

/// Run `f` until it succeeds or the schedule is exhausted.
pub async fn retry_with_schedule<F, Fut, T, E>(
    schedule: &RetrySchedule,
    operation: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = schedule.max_attempts();
    let mut num_attempts = 0;

    loop {
        let result = f().await;
        num_attempts += 1;

        match result {
            Ok(value) => {
                if num_attempts > 1 {
                    debug!(operation, num_attempts, "Request succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) => {
                if num_attempts >= max_attempts {
                    warn!(
                        operation,
                        num_attempts,
                        error = %error,
                        "Request failed, retry schedule exhausted"
                    );
                    return Err(error);
                }
                let delay = schedule
                    .delays
                    .get(num_attempts - 1)
                    .copied()
                    .unwrap_or_default();
                warn!(
                    operation,
                    num_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %error,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    async fn simulate_retries(
        schedule: &RetrySchedule,
        values: Vec<Result<u32, String>>,
    ) -> (Result<u32, String>, usize) {
        let values_it = Mutex::new(values.into_iter());
        let calls = Mutex::new(0usize);
        let result = retry_with_schedule(schedule, "test", || {
            *calls.lock().unwrap() += 1;
            let next = values_it.lock().unwrap().next().unwrap();
            async move { next }
        })
        .await;
        let calls = *calls.lock().unwrap();
        (result, calls)
    }

    fn failures(n: usize) -> Vec<Result<u32, String>> {
        (0..n).map(|i| Err(format!("attempt {}", i + 1))).collect()
    }

    #[test]
    fn test_default_schedule() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.max_attempts(), 6);
        assert_eq!(schedule.latency_before(1), Duration::ZERO);
        assert_eq!(schedule.latency_before(3), Duration::from_secs(3));
        assert_eq!(schedule.latency_before(6), Duration::from_secs(26));
    }

    #[test]
    fn test_empty_schedule_still_attempts_once() {
        assert_eq!(RetrySchedule::new(Vec::new()).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let start = Instant::now();
        let (result, calls) = simulate_retries(&RetrySchedule::default(), vec![Ok(7)]).await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_attempt_k_sleeps_prefix_sum() {
        let schedule = RetrySchedule::default();
        for k in 1..=6usize {
            let mut values = failures(k - 1);
            values.push(Ok(k as u32));
            let start = Instant::now();
            let (result, calls) = simulate_retries(&schedule, values).await;
            assert_eq!(result, Ok(k as u32));
            assert_eq!(calls, k);
            assert_eq!(start.elapsed(), schedule.latency_before(k));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_after_six_attempts() {
        let mut values = failures(6);
        values.push(Ok(1));
        let start = Instant::now();
        let (result, calls) = simulate_retries(&RetrySchedule::default(), values).await;
        assert_eq!(result, Err("attempt 6".to_string()));
        assert_eq!(calls, 6);
        // The trailing zero delay is never slept.
        assert_eq!(start.elapsed(), Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_schedule() {
        let schedule = RetrySchedule::from_secs(&[3]);
        let (result, calls) = simulate_retries(&schedule, failures(2)).await;
        assert_eq!(result, Err("attempt 1".to_string()));
        assert_eq!(calls, 1);

        let schedule = RetrySchedule::from_secs(&[3, 0]);
        let start = Instant::now();
        let (result, calls) = simulate_retries(&schedule, vec![Err("x".into()), Ok(2)]).await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
