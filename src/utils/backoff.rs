use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;

/// Per-operation backoff state derived from a [`BackoffPolicy`].
///
/// Delays start at `base_delay_ms`, double on every attempt and are capped at
/// `max_delay_ms`. Up to a quarter of each delay is randomised so that watch loops
/// recovering from the same outage do not hammer the store in lock step.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempts: usize,
    current: Duration,
}

impl ExponentialBackoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            current: Duration::from_millis(policy.base_delay_ms),
        }
    }

    /// Number of failed attempts recorded so far
    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }

    /// Records a failed attempt and returns how long to wait before the next one,
    /// or `None` once a bounded policy is exhausted.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.policy.max_retries != 0 && self.attempts >= self.policy.max_retries {
            return None;
        }

        let cap = Duration::from_millis(self.policy.max_delay_ms);
        let delay = self.current.min(cap);
        self.current = (self.current * 2).min(cap);

        let jitter_ms = (delay.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return Some(delay);
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        Some(delay - Duration::from_millis(jitter))
    }
}
