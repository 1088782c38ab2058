//! Retry combinator shared by the fetch, walk and live-import paths.
//!
//! `retry` runs an async operation until it succeeds, the predicate declines
//! to retry the error, or the policy's attempt budget is spent. The last error
//! is returned unchanged.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the predicate says stop.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts: Some(max_attempts), backoff: Backoff::None, jitter: false }
    }

    pub fn fixed(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self { max_attempts, backoff: Backoff::Fixed(delay), jitter: false }
    }

    pub fn exponential(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Backoff::Exponential { base, max },
            jitter: true,
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(*max)
            }
        };
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}

/// Run `op` under `policy`. `op` receives the 1-based attempt number;
/// `should_retry` sees every error and the attempt that produced it.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, mut op: F, mut should_retry: P) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E, u32) -> bool,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if policy.exhausted(attempt) || !should_retry(&e, attempt) {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
