//! Fixed-window request counting for webhook triggers.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
  Allowed,
  Limited { retry_after: u64 },
}

struct Window {
  started: Instant,
  count: u32,
}

/// Best-effort fixed-window limiter keyed by an opaque string (the gateway
/// uses `webhook:{id}:{ip}`). Counters live in process memory and decay when
/// the window rolls over; brief overshoot near window boundaries is accepted.
/// Rejected requests do not consume from the window.
pub struct FixedWindowLimiter {
  window: Duration,
  windows: DashMap<String, Window>,
}

impl FixedWindowLimiter {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      windows: DashMap::new(),
    }
  }

  /// Check and consume one slot for `key` under the given capacity.
  pub fn check(&self, key: &str, capacity: u32) -> RateDecision {
    let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
      started: Instant::now(),
      count: 0,
    });

    if entry.started.elapsed() >= self.window {
      entry.started = Instant::now();
      entry.count = 0;
    }

    if entry.count >= capacity {
      let remaining = self.window.saturating_sub(entry.started.elapsed());
      return RateDecision::Limited {
        retry_after: remaining.as_secs().max(1),
      };
    }

    entry.count += 1;
    RateDecision::Allowed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn third_request_over_capacity_two_is_limited() {
    let limiter = FixedWindowLimiter::new(Duration::from_secs(60));
    assert_eq!(limiter.check("webhook:1:10.0.0.1", 2), RateDecision::Allowed);
    assert_eq!(limiter.check("webhook:1:10.0.0.1", 2), RateDecision::Allowed);
    assert!(matches!(
      limiter.check("webhook:1:10.0.0.1", 2),
      RateDecision::Limited { retry_after } if retry_after >= 1
    ));
  }

  #[test]
  fn keys_are_independent() {
    let limiter = FixedWindowLimiter::new(Duration::from_secs(60));
    assert_eq!(limiter.check("webhook:1:10.0.0.1", 1), RateDecision::Allowed);
    assert_eq!(limiter.check("webhook:1:10.0.0.2", 1), RateDecision::Allowed);
    assert!(matches!(
      limiter.check("webhook:1:10.0.0.1", 1),
      RateDecision::Limited { .. }
    ));
  }

  #[test]
  fn window_rollover_resets_the_counter() {
    let limiter = FixedWindowLimiter::new(Duration::from_millis(20));
    assert_eq!(limiter.check("k", 1), RateDecision::Allowed);
    assert!(matches!(limiter.check("k", 1), RateDecision::Limited { .. }));
    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(limiter.check("k", 1), RateDecision::Allowed);
  }
}
