use std::time::Duration;

use super::backoff::ExponentialBackoff;
use crate::BackoffPolicy;

fn policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        base_delay_ms: 8,
        max_delay_ms: 64,
    }
}

#[test]
fn bounded_policy_stops_after_max_retries() {
    let mut backoff = ExponentialBackoff::new(policy(3));

    assert!(backoff.next_delay().is_some());
    assert!(backoff.next_delay().is_some());
    assert!(backoff.next_delay().is_none());
    assert_eq!(backoff.attempts(), 3);
}

#[test]
fn unlimited_policy_never_gives_up() {
    let mut backoff = ExponentialBackoff::new(policy(0));

    for _ in 0..1000 {
        assert!(backoff.next_delay().is_some());
    }
}

#[test]
fn delays_grow_and_respect_the_cap() {
    let mut backoff = ExponentialBackoff::new(policy(0));

    let first = backoff.next_delay().unwrap();
    assert!(first <= Duration::from_millis(8));
    assert!(first >= Duration::from_millis(6));

    let mut last = first;
    for _ in 0..20 {
        last = backoff.next_delay().unwrap();
        assert!(last <= Duration::from_millis(64));
    }
    // jitter removes at most a quarter of the capped delay
    assert!(last >= Duration::from_millis(48));
}

#[test]
fn largest_configurable_cap_does_not_overflow() {
    let mut backoff = ExponentialBackoff::new(BackoffPolicy {
        max_retries: 0,
        base_delay_ms: u64::MAX / 2,
        max_delay_ms: u64::MAX,
    });

    // u64::MAX ms is about 1.8e16 s, so doubling it stays far below Duration::MAX
    for _ in 0..64 {
        let delay = backoff.next_delay().unwrap();
        assert!(delay <= Duration::from_millis(u64::MAX));
    }
}
