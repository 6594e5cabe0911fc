//! Exponential backoff for the background jobs.
//!
//! Only store outages are worth retrying; a validation or transition error
//! will fail the same way on every attempt.

use marquee_core::BookingError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

pub fn is_transient(err: &BookingError) -> bool {
    matches!(err, BookingError::UpstreamUnavailable(_))
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent. Returns the last error in the latter two cases.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    job: &str,
    mut operation: F,
) -> Result<T, BookingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BookingError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} retries", job, attempt);
                }
                return Ok(result);
            }
            Err(err) if !is_transient(&err) || attempt >= policy.max_retries => return Err(err),
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    job,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay,
                    err
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
