//! Engine configuration and retry policy.

use std::time::Duration;

use catena_config::{RetryBackoff, RetryDef};

/// Configuration for the chain engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Retry policy for steps whose chain does not declare one.
  pub retry: RetryPolicy,
  /// Per-call timeout for steps that do not declare `timeout_ms`.
  pub default_timeout: Option<Duration>,
  /// Events buffered per execution for slow subscribers.
  pub event_buffer: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      default_timeout: None,
      event_buffer: 256,
    }
  }
}

/// How transient and timeout failures are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total number of agent calls per step, including the first.
  pub max_attempts: u32,
  pub backoff: RetryBackoff,
  pub initial_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: RetryBackoff::Exponential,
      initial_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(5),
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      ..Default::default()
    }
  }

  /// Build a policy from a chain's retry overrides, keeping `self` for
  /// anything the chain leaves out.
  pub fn with_overrides(&self, def: &RetryDef) -> Self {
    Self {
      max_attempts: def.max_attempts.max(1),
      backoff: def.backoff,
      initial_delay: Duration::from_millis(def.initial_delay_ms),
      max_delay: def
        .max_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(self.max_delay),
    }
  }

  /// Override the number of retries after the first call.
  pub fn with_max_retries(&self, retries: u32) -> Self {
    Self {
      max_attempts: retries.saturating_add(1),
      ..self.clone()
    }
  }

  /// Delay before retry number `retry` (0-indexed).
  pub fn delay_for_attempt(&self, retry: u32) -> Duration {
    let delay = match self.backoff {
      RetryBackoff::Constant => self.initial_delay,
      RetryBackoff::Linear => self.initial_delay.saturating_mul(retry.saturating_add(1)),
      RetryBackoff::Exponential => self
        .initial_delay
        .saturating_mul(2u32.saturating_pow(retry.min(31))),
    };
    delay.min(self.max_delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy(backoff: RetryBackoff) -> RetryPolicy {
    RetryPolicy {
      max_attempts: 5,
      backoff,
      initial_delay: Duration::from_millis(100),
      max_delay: Duration::from_millis(1000),
    }
  }

  #[test]
  fn test_constant_backoff() {
    let p = policy(RetryBackoff::Constant);
    assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
    assert_eq!(p.delay_for_attempt(7), Duration::from_millis(100));
  }

  #[test]
  fn test_linear_backoff() {
    let p = policy(RetryBackoff::Linear);
    assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
    assert_eq!(p.delay_for_attempt(2), Duration::from_millis(300));
    assert_eq!(p.delay_for_attempt(20), Duration::from_millis(1000));
  }

  #[test]
  fn test_exponential_backoff_is_capped() {
    let p = policy(RetryBackoff::Exponential);
    assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
    assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
    assert_eq!(p.delay_for_attempt(3), Duration::from_millis(800));
    assert_eq!(p.delay_for_attempt(4), Duration::from_millis(1000));
    assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
  }

  #[test]
  fn test_overrides() {
    let base = RetryPolicy::default();
    let def = RetryDef {
      max_attempts: 0,
      backoff: RetryBackoff::Constant,
      initial_delay_ms: 5,
      max_delay_ms: None,
    };

    let p = base.with_overrides(&def);
    assert_eq!(p.max_attempts, 1);
    assert_eq!(p.initial_delay, Duration::from_millis(5));
    assert_eq!(p.max_delay, base.max_delay);

    assert_eq!(p.with_max_retries(2).max_attempts, 3);
  }
}
