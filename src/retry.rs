//! Declarative retry policy and a generic "retry this async operation" helper.
//!
//! Delay before attempt `n + 1` (1-based `n`):
//!   base_delay * n^backoff_exponent + uniform(0..=jitter_max)
//! Only errors accepted by the policy's `retryable` predicate are retried.

use std::{fmt, future::Future, time::Duration};

use rand::Rng;
use tracing::warn;

use crate::config::RetryCfg;

pub struct RetryPolicy<E> {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub backoff_exponent: u32,
  pub jitter_max: Duration,
  pub retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
  fn clone(&self) -> Self { *self }
}
impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("base_delay", &self.base_delay)
      .field("backoff_exponent", &self.backoff_exponent)
      .field("jitter_max", &self.jitter_max)
      .finish()
  }
}

impl<E> RetryPolicy<E> {
  pub fn from_cfg(cfg: &RetryCfg, retryable: fn(&E) -> bool) -> Self {
    Self {
      max_attempts: cfg.max_attempts.max(1),
      base_delay: Duration::from_millis(cfg.base_delay_ms),
      backoff_exponent: cfg.backoff_exponent,
      jitter_max: Duration::from_millis(cfg.jitter_max_ms),
      retryable,
    }
  }

  /// Deterministic part of the delay after the `attempt`-th failure (1-based).
  pub fn base_delay_for(&self, attempt: u32) -> Duration {
    let factor = attempt.max(1).saturating_pow(self.backoff_exponent);
    self.base_delay.saturating_mul(factor)
  }

  /// Full delay including random jitter.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let jitter_ms = self.jitter_max.as_millis() as u64;
    let jitter = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=jitter_ms) };
    self.base_delay_for(attempt) + Duration::from_millis(jitter)
  }

  /// Upper bound of the total time spent sleeping for one operation.
  pub fn max_total_delay(&self) -> Duration {
    (1..self.max_attempts)
      .map(|a| self.base_delay_for(a) + self.jitter_max)
      .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
  }
}

/// Why `retry` gave up.
#[derive(Debug)]
pub struct RetryError<E> {
  pub error: E,
  pub attempts: u32,
  /// True when the last error was retryable and the attempt budget ran out.
  pub exhausted: bool,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy's
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy<E>, label: &str, mut op: F) -> Result<T, RetryError<E>>
where
  E: fmt::Display,
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let mut attempt = 1;
  loop {
    match op(attempt).await {
      Ok(v) => return Ok(v),
      Err(e) => {
        let retryable = (policy.retryable)(&e);
        if !retryable || attempt >= policy.max_attempts {
          return Err(RetryError { error: e, attempts: attempt, exhausted: retryable });
        }
        let delay = policy.delay_for(attempt);
        warn!(
          target: "lesson",
          %label,
          attempt,
          max_attempts = policy.max_attempts,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "Retryable failure; backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
    }
  }
}
